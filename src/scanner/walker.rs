//! Deterministic, resumable directory traversal.
//!
//! A [`Traversal`] walks one root depth-first with an explicit stack. Entries
//! inside a directory are visited in byte-wise name order and every directory
//! is emitted after all of its descendants (child-first). The root itself is
//! never emitted. Because the order is a pure function of the tree, a caller
//! resumes by skipping the first `n` entries of a fresh traversal.

#![allow(missing_docs)]

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::core::errors::AuxError;
use crate::scanner::filters::{HiddenFiles, PathFilter};

/// Kind of a walked entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// A single entry discovered during a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
}

impl WalkEntry {
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// Walker with an injectable hidden-entry predicate.
///
/// The predicate sees root-relative paths. Rejected directories are neither
/// emitted nor descended into.
pub struct Walker {
    hidden: Box<dyn PathFilter>,
}

impl Walker {
    pub fn new(hidden: Box<dyn PathFilter>) -> Self {
        Self { hidden }
    }

    /// Walker using [`HiddenFiles`] with the given switch.
    #[must_use]
    pub fn with_hidden_files(ignore_hidden: bool) -> Self {
        Self::new(Box::new(HiddenFiles::new(ignore_hidden)))
    }

    /// Lazily traverse `root`.
    ///
    /// A missing or unreadable root yields an empty sequence.
    pub fn traverse<'a>(&'a self, root: &Path) -> Traversal<'a> {
        let mut stack = Vec::new();
        match read_sorted(root) {
            Ok(children) => stack.push(Frame {
                dir: root.to_path_buf(),
                children: children.into_iter(),
            }),
            Err(err) => log_unavailable(root, &err, "scan root unavailable"),
        }
        Traversal {
            root: root.to_path_buf(),
            hidden: self.hidden.as_ref(),
            stack,
        }
    }
}

impl Default for Walker {
    fn default() -> Self {
        Self::with_hidden_files(true)
    }
}

struct Child {
    name: OsString,
    is_dir: bool,
}

struct Frame {
    dir: PathBuf,
    children: std::vec::IntoIter<Child>,
}

/// Lazy child-first iterator over one root.
pub struct Traversal<'a> {
    root: PathBuf,
    hidden: &'a dyn PathFilter,
    stack: Vec<Frame>,
}

impl Traversal<'_> {
    fn is_hidden(&self, path: &Path) -> bool {
        path.strip_prefix(&self.root)
            .is_ok_and(|relative| self.hidden.rejects(relative))
    }
}

impl Iterator for Traversal<'_> {
    type Item = WalkEntry;

    fn next(&mut self) -> Option<WalkEntry> {
        loop {
            let frame = self.stack.last_mut()?;
            let Some(child) = frame.children.next() else {
                let finished = self.stack.pop()?;
                if self.stack.is_empty() {
                    // Root exhausted; the root itself is not an entry.
                    return None;
                }
                return Some(WalkEntry {
                    path: finished.dir,
                    kind: EntryKind::Directory,
                });
            };

            let path = frame.dir.join(&child.name);
            if self.is_hidden(&path) {
                continue;
            }

            if !child.is_dir {
                return Some(WalkEntry {
                    path,
                    kind: EntryKind::File,
                });
            }

            let children = match read_sorted(&path) {
                Ok(children) => children,
                Err(err) => {
                    log_unavailable(&path, &err, "unreadable directory treated as empty");
                    Vec::new()
                }
            };
            self.stack.push(Frame {
                dir: path,
                children: children.into_iter(),
            });
        }
    }
}

fn log_unavailable(dir: &Path, source: &std::io::Error, message: &str) {
    let err = AuxError::DirectoryUnavailable {
        path: dir.to_path_buf(),
        details: source.to_string(),
    };
    warn!(code = err.code(), error = %err, "{message}");
}

/// List a directory's regular files and real subdirectories, sorted by name.
///
/// Symlinks and special files are left out.
fn read_sorted(dir: &Path) -> std::io::Result<Vec<Child>> {
    let mut children = Vec::new();
    for entry_result in fs::read_dir(dir)? {
        let entry = match entry_result {
            Ok(entry) => entry,
            Err(err) => {
                debug!(dir = %dir.display(), error = %err, "skipping unreadable directory entry");
                continue;
            }
        };
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() || file_type.is_file() {
            children.push(Child {
                name: entry.file_name(),
                is_dir: file_type.is_dir(),
            });
        }
    }
    children.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(children)
}
