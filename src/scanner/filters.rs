//! Entry filters injected into the walker and reconciler.
//!
//! Two strategies ship by default:
//! - [`HiddenFiles`]: drops anything below the scan root whose path has a
//!   component starting with `.`; the walker does not descend into hidden
//!   directories either.
//! - [`BypassRegistry`]: config-level glob patterns; a file matching any of them
//!   is never queued.
//!
//! Any `Fn(&Path) -> bool` closure is also a [`PathFilter`], so embedders can
//! plug in their own veto without touching config.

#![allow(missing_docs)]

use std::path::{Component, Path};

use regex::Regex;

use crate::core::errors::{AuxError, Result};

/// A predicate that vetoes paths.
pub trait PathFilter {
    /// True when `path` must be dropped.
    fn rejects(&self, path: &Path) -> bool;
}

impl<F> PathFilter for F
where
    F: Fn(&Path) -> bool,
{
    fn rejects(&self, path: &Path) -> bool {
        self(path)
    }
}

/// Filter that rejects nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PathFilter for AllowAll {
    fn rejects(&self, _path: &Path) -> bool {
        false
    }
}

/// Hidden-entry suppression, evaluated on root-relative paths.
#[derive(Debug, Clone, Copy)]
pub struct HiddenFiles {
    enabled: bool,
}

impl HiddenFiles {
    #[must_use]
    pub const fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl Default for HiddenFiles {
    fn default() -> Self {
        Self::new(true)
    }
}

impl PathFilter for HiddenFiles {
    fn rejects(&self, relative: &Path) -> bool {
        self.enabled
            && relative.components().any(|component| match component {
                Component::Normal(name) => name.as_encoded_bytes().first() == Some(&b'.'),
                _ => false,
            })
    }
}

/// Compiled glob pattern for path matching.
#[derive(Debug, Clone)]
struct GlobPattern {
    original: String,
    compiled: Regex,
}

/// Config-driven bypass list.
#[derive(Debug, Clone, Default)]
pub struct BypassRegistry {
    patterns: Vec<GlobPattern>,
}

impl BypassRegistry {
    /// Compile shell-style globs: `*` within a component, `**` across
    /// components, `?` for one character.
    pub fn new(patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|pat| {
                Ok(GlobPattern {
                    original: pat.clone(),
                    compiled: glob_to_regex(pat)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    #[must_use]
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// The first pattern matching `path`, if any.
    #[must_use]
    pub fn matching_pattern(&self, path: &Path) -> Option<&str> {
        let normalized = normalize_path_for_matching(path);
        self.patterns
            .iter()
            .find(|pattern| pattern.compiled.is_match(&normalized))
            .map(|pattern| pattern.original.as_str())
    }
}

impl PathFilter for BypassRegistry {
    fn rejects(&self, path: &Path) -> bool {
        self.matching_pattern(path).is_some()
    }
}

/// Validate that a glob pattern can be compiled.
pub fn validate_glob_pattern(pattern: &str) -> Result<()> {
    glob_to_regex(pattern).map(|_| ())
}

/// Convert a shell-style glob pattern to an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let normalized_pattern = pattern.replace('\\', "/");
    let mut regex_str = String::with_capacity(pattern.len() * 2);
    regex_str.push('^');

    let chars: Vec<char> = normalized_pattern.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' if i + 1 < chars.len() && chars[i + 1] == '*' => {
                if i + 2 < chars.len() && chars[i + 2] == '/' {
                    regex_str.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    regex_str.push_str(".*");
                    i += 2;
                }
            }
            '*' => {
                regex_str.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                regex_str.push_str("[^/]");
                i += 1;
            }
            '.' | '+' | '(' | ')' | '{' | '}' | '[' | ']' | '^' | '$' | '|' | '\\' => {
                regex_str.push('\\');
                regex_str.push(chars[i]);
                i += 1;
            }
            c => {
                regex_str.push(c);
                i += 1;
            }
        }
    }

    regex_str.push('$');

    Regex::new(&regex_str).map_err(|err| AuxError::InvalidConfig {
        details: format!("invalid glob pattern {pattern:?}: {err}"),
    })
}

fn normalize_path_for_matching(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
