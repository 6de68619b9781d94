//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{AuxError, Result};
use crate::scanner::mime::MimeType;

/// Longest accepted checkpoint lifetime: 30 days.
pub const MAX_CHECKPOINT_TTL_SECS: u64 = 30 * 24 * 60 * 60;

/// Full configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub scanner: ScannerConfig,
    pub types: TypesConfig,
    pub thresholds: ThresholdsConfig,
    pub budget: BudgetConfig,
    pub paths: PathsConfig,
}

/// Which roots get scanned and which entries are filtered before reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScannerConfig {
    pub root_paths: Vec<PathBuf>,
    /// Append `<uploads_dir>/YYYY/MM` for this month and last month on background scans.
    pub include_dated_dirs: bool,
    pub uploads_dir: Option<PathBuf>,
    pub ignore_hidden_files: bool,
    /// Glob patterns; a matching file is never queued.
    pub bypass_patterns: Vec<String>,
}

/// Per-type enable switches, folded into a single allow-list at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TypesConfig {
    pub jpeg: bool,
    pub png: bool,
    pub gif: bool,
    pub pdf: bool,
}

/// Size gates applied to both new and known files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ThresholdsConfig {
    /// Files smaller than this are never queued.
    pub min_size_bytes: u64,
    /// PNGs larger than this are never queued. Zero disables the gate.
    pub png_max_size_bytes: u64,
}

/// Time/memory budget and batching knobs for a single scan invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BudgetConfig {
    pub time_limit_secs: u64,
    /// Process memory ceiling. Zero means unknown: the memory guard always passes.
    pub memory_limit_bytes: u64,
    pub memory_headroom_bytes: u64,
    pub check_interval: u64,
    pub resume_overlap: u64,
    pub checkpoint_ttl_secs: u64,
    pub batch_size: usize,
}

/// Filesystem paths used by auxinv.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    /// Records under this directory are stored relative to it.
    pub base_dir: Option<PathBuf>,
    pub sqlite_db: PathBuf,
    pub state_file: PathBuf,
    pub journal: PathBuf,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            root_paths: Vec::new(),
            include_dated_dirs: false,
            uploads_dir: None,
            ignore_hidden_files: true,
            bypass_patterns: Vec::new(),
        }
    }
}

impl Default for TypesConfig {
    fn default() -> Self {
        Self {
            jpeg: true,
            png: true,
            gif: true,
            pdf: false,
        }
    }
}

impl TypesConfig {
    /// Fold the per-type switches into one allow-list.
    #[must_use]
    pub fn enabled_types(&self) -> BTreeSet<MimeType> {
        [
            (self.jpeg, MimeType::Jpeg),
            (self.png, MimeType::Png),
            (self.gif, MimeType::Gif),
            (self.pdf, MimeType::Pdf),
        ]
        .into_iter()
        .filter_map(|(enabled, mime)| enabled.then_some(mime))
        .collect()
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            time_limit_secs: 15,
            memory_limit_bytes: 256 * 1024 * 1024,
            memory_headroom_bytes: 2_097_000,
            check_interval: 100,
            resume_overlap: 20,
            checkpoint_ttl_secs: 300,
            batch_size: 1_000,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                tracing::warn!("HOME not set, falling back to /tmp for data paths");
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let cfg = home_dir.join(".config").join("auxinv").join("config.toml");
        let data = home_dir.join(".local").join("share").join("auxinv");
        Self {
            config_file: cfg,
            base_dir: None,
            sqlite_db: data.join("inventory.sqlite3"),
            state_file: data.join("scan-state.json"),
            journal: data.join("scan-journal.jsonl"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| AuxError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(AuxError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("AUXINV_SCANNER_ROOT_PATHS") {
            self.scanner.root_paths = env::split_paths(&raw).collect();
        }
        set_bool(
            &mut lookup,
            "AUXINV_SCANNER_INCLUDE_DATED_DIRS",
            &mut self.scanner.include_dated_dirs,
        )?;
        if let Some(raw) = lookup("AUXINV_SCANNER_UPLOADS_DIR") {
            self.scanner.uploads_dir = Some(PathBuf::from(raw));
        }
        set_bool(
            &mut lookup,
            "AUXINV_SCANNER_IGNORE_HIDDEN_FILES",
            &mut self.scanner.ignore_hidden_files,
        )?;

        set_bool(&mut lookup, "AUXINV_TYPES_JPEG", &mut self.types.jpeg)?;
        set_bool(&mut lookup, "AUXINV_TYPES_PNG", &mut self.types.png)?;
        set_bool(&mut lookup, "AUXINV_TYPES_GIF", &mut self.types.gif)?;
        set_bool(&mut lookup, "AUXINV_TYPES_PDF", &mut self.types.pdf)?;

        set_u64(
            &mut lookup,
            "AUXINV_THRESHOLDS_MIN_SIZE_BYTES",
            &mut self.thresholds.min_size_bytes,
        )?;
        set_u64(
            &mut lookup,
            "AUXINV_THRESHOLDS_PNG_MAX_SIZE_BYTES",
            &mut self.thresholds.png_max_size_bytes,
        )?;

        set_u64(&mut lookup, "AUXINV_BUDGET_TIME_LIMIT_SECS", &mut self.budget.time_limit_secs)?;
        set_u64(
            &mut lookup,
            "AUXINV_BUDGET_MEMORY_LIMIT_BYTES",
            &mut self.budget.memory_limit_bytes,
        )?;
        set_u64(
            &mut lookup,
            "AUXINV_BUDGET_MEMORY_HEADROOM_BYTES",
            &mut self.budget.memory_headroom_bytes,
        )?;
        set_u64(&mut lookup, "AUXINV_BUDGET_CHECK_INTERVAL", &mut self.budget.check_interval)?;
        set_u64(&mut lookup, "AUXINV_BUDGET_RESUME_OVERLAP", &mut self.budget.resume_overlap)?;
        set_u64(
            &mut lookup,
            "AUXINV_BUDGET_CHECKPOINT_TTL_SECS",
            &mut self.budget.checkpoint_ttl_secs,
        )?;
        if let Some(raw) = lookup("AUXINV_BUDGET_BATCH_SIZE") {
            self.budget.batch_size =
                usize::try_from(parse_u64("AUXINV_BUDGET_BATCH_SIZE", &raw)?).map_err(|error| {
                    AuxError::ConfigParse {
                        context: "env",
                        details: format!("AUXINV_BUDGET_BATCH_SIZE={raw:?}: {error}"),
                    }
                })?;
        }

        if let Some(raw) = lookup("AUXINV_PATHS_BASE_DIR") {
            self.paths.base_dir = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("AUXINV_PATHS_SQLITE_DB") {
            self.paths.sqlite_db = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("AUXINV_PATHS_STATE_FILE") {
            self.paths.state_file = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("AUXINV_PATHS_JOURNAL") {
            self.paths.journal = PathBuf::from(raw);
        }
        Ok(())
    }

    /// Strip trailing slashes so roots compare equal to their completed-set entries.
    fn normalize_paths(&mut self) {
        for path in &mut self.scanner.root_paths {
            *path = strip_trailing_slash(path);
        }
        if let Some(uploads) = self.scanner.uploads_dir.as_mut() {
            *uploads = strip_trailing_slash(uploads);
        }
        if let Some(base) = self.paths.base_dir.as_mut() {
            *base = strip_trailing_slash(base);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.types.enabled_types().is_empty() {
            return Err(AuxError::InvalidConfig {
                details: "at least one of types.jpeg/png/gif/pdf must be enabled".to_string(),
            });
        }

        let png_max = self.thresholds.png_max_size_bytes;
        if png_max != 0 && png_max < self.thresholds.min_size_bytes {
            return Err(AuxError::InvalidConfig {
                details: format!(
                    "thresholds.png_max_size_bytes ({png_max}) must be 0 or >= min_size_bytes ({})",
                    self.thresholds.min_size_bytes
                ),
            });
        }

        let budget = &self.budget;
        if budget.check_interval == 0 {
            return Err(AuxError::InvalidConfig {
                details: "budget.check_interval must be >= 1".to_string(),
            });
        }
        if budget.batch_size == 0 {
            return Err(AuxError::InvalidConfig {
                details: "budget.batch_size must be >= 1".to_string(),
            });
        }
        if !(1..=MAX_CHECKPOINT_TTL_SECS).contains(&budget.checkpoint_ttl_secs) {
            return Err(AuxError::InvalidConfig {
                details: format!(
                    "budget.checkpoint_ttl_secs must be between 1 and {MAX_CHECKPOINT_TTL_SECS}, got {}",
                    budget.checkpoint_ttl_secs
                ),
            });
        }
        if budget.resume_overlap > budget.check_interval {
            return Err(AuxError::InvalidConfig {
                details: format!(
                    "budget.resume_overlap ({}) must not exceed budget.check_interval ({})",
                    budget.resume_overlap, budget.check_interval
                ),
            });
        }

        if self.scanner.include_dated_dirs && self.scanner.uploads_dir.is_none() {
            return Err(AuxError::InvalidConfig {
                details: "scanner.include_dated_dirs requires scanner.uploads_dir".to_string(),
            });
        }
        for pattern in &self.scanner.bypass_patterns {
            crate::scanner::filters::validate_glob_pattern(pattern)?;
        }

        Ok(())
    }
}

fn strip_trailing_slash(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if s.len() > 1
        && let Some(stripped) = s.strip_suffix('/')
    {
        return PathBuf::from(stripped);
    }
    path.to_path_buf()
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_u64<F>(lookup: &mut F, name: &str, slot: &mut u64) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = parse_u64(name, &raw)?;
    }
    Ok(())
}

fn set_bool<F>(lookup: &mut F, name: &str, slot: &mut bool) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = parse_bool(name, &raw)?;
    }
    Ok(())
}

fn parse_u64(name: &str, raw: &str) -> Result<u64> {
    raw.trim().parse::<u64>().map_err(|error| AuxError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    raw.trim().parse::<bool>().map_err(|error| AuxError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}
