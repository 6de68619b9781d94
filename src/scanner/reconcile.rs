//! Per-file decision: leave alone, queue again, or record as new.
//!
//! Change detection is size equality only. A file whose on-disk size matches
//! the size recorded after its last optimization is treated as unchanged.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::core::config::Config;
use crate::core::errors::{AuxError, Result};
use crate::core::paths::encode_record_path;
use crate::scanner::filters::{AllowAll, PathFilter};
use crate::scanner::mime::{MimeType, sniff_file};
use crate::scanner::reference::ReferenceIndex;
use crate::store::record::{FileRecord, NewRecord, RecordStore};

/// Why a file was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Metadata or content could not be read.
    Unreadable,
    /// Not a supported type, or the type is disabled.
    UnsupportedType,
    /// Matched a bypass pattern.
    Bypassed,
    /// Already queued.
    AlreadyPending,
    /// Smaller than `min_size_bytes`.
    BelowMinimum,
    /// PNG larger than `png_max_size_bytes`.
    AboveMaximum,
    /// Size matches the last optimized size.
    Unchanged,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unreadable => "unreadable",
            Self::UnsupportedType => "unsupported type",
            Self::Bypassed => "bypassed",
            Self::AlreadyPending => "already pending",
            Self::BelowMinimum => "below minimum size",
            Self::AboveMaximum => "above png maximum size",
            Self::Unchanged => "unchanged",
        };
        f.write_str(label)
    }
}

/// What to do with one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Nothing to write.
    Skip(SkipReason),
    /// Mark the record with this id pending again.
    Reoptimize(i64),
    /// Inventory a new file.
    Insert(NewRecord),
}

/// Type and size policy for queueing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileRules {
    /// Types eligible for queueing.
    pub enabled_types: BTreeSet<MimeType>,
    /// Files below this size are never queued.
    pub min_size_bytes: u64,
    /// Upper bound for PNG files; 0 disables it.
    pub png_max_size_bytes: u64,
    /// Queue known files again even when their size is unchanged.
    pub force: bool,
}

impl ReconcileRules {
    /// Rules from `[types]` and `[thresholds]`.
    #[must_use]
    pub fn from_config(config: &Config, force: bool) -> Self {
        Self {
            enabled_types: config.types.enabled_types(),
            min_size_bytes: config.thresholds.min_size_bytes,
            png_max_size_bytes: config.thresholds.png_max_size_bytes,
            force,
        }
    }

    fn threshold_violation(&self, mime: MimeType, size: u64) -> Option<SkipReason> {
        if size < self.min_size_bytes {
            Some(SkipReason::BelowMinimum)
        } else if mime == MimeType::Png
            && self.png_max_size_bytes > 0
            && size > self.png_max_size_bytes
        {
            Some(SkipReason::AboveMaximum)
        } else {
            None
        }
    }
}

/// Decide for a file whose type and size are already known.
#[must_use]
pub fn classify(
    existing: Option<&FileRecord>,
    mime: MimeType,
    size: u64,
    stored_path: String,
    rules: &ReconcileRules,
) -> Decision {
    if existing.is_some_and(|record| record.pending) {
        return Decision::Skip(SkipReason::AlreadyPending);
    }
    if let Some(reason) = rules.threshold_violation(mime, size) {
        return Decision::Skip(reason);
    }
    match existing {
        Some(record) if record.current_size == size && !rules.force => {
            Decision::Skip(SkipReason::Unchanged)
        }
        Some(record) => Decision::Reoptimize(record.id),
        None => Decision::Insert(NewRecord {
            path: stored_path,
            original_size: size,
        }),
    }
}

/// Filesystem-facing reconciler.
pub struct Reconciler {
    rules: ReconcileRules,
    bypass: Box<dyn PathFilter>,
    base_dir: Option<PathBuf>,
}

impl Reconciler {
    /// Paths under `base_dir` are stored relative to it.
    pub fn new(rules: ReconcileRules, bypass: Box<dyn PathFilter>, base_dir: Option<PathBuf>) -> Self {
        Self {
            rules,
            bypass,
            base_dir,
        }
    }

    /// Reconciler without a bypass predicate or base directory.
    #[must_use]
    pub fn with_rules(rules: ReconcileRules) -> Self {
        Self::new(rules, Box::new(AllowAll), None)
    }

    /// Rules in effect.
    #[must_use]
    pub fn rules(&self) -> &ReconcileRules {
        &self.rules
    }

    /// Toggle re-queueing of unchanged files.
    pub fn set_force(&mut self, force: bool) {
        self.rules.force = force;
    }

    /// Decide what to do with the regular file at `path`.
    ///
    /// Unreadable files are logged and skipped; only store failures are errors.
    pub fn reconcile(
        &self,
        path: &Path,
        index: &ReferenceIndex,
        store: &dyn RecordStore,
    ) -> Result<Decision> {
        let mime = match sniff_file(path) {
            Ok(Some(mime)) if self.rules.enabled_types.contains(&mime) => mime,
            Ok(_) => return Ok(Decision::Skip(SkipReason::UnsupportedType)),
            Err(source) => return Ok(unreadable(path, source)),
        };

        if self.bypass.rejects(path) {
            debug!(path = %path.display(), "skipping bypassed file");
            return Ok(Decision::Skip(SkipReason::Bypassed));
        }

        let stored_path = encode_record_path(path, self.base_dir.as_deref());
        let existing = index.lookup(&stored_path, store)?;
        if existing.as_ref().is_some_and(|record| record.pending) {
            debug!(path = %stored_path, "pending record");
            return Ok(Decision::Skip(SkipReason::AlreadyPending));
        }

        let size = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(source) => return Ok(unreadable(path, source)),
        };

        let decision = classify(existing.as_ref(), mime, size, stored_path, &self.rules);
        match (&decision, existing.as_ref()) {
            (Decision::Reoptimize(id), Some(record)) => debug!(
                path = %path.display(),
                id,
                recorded = record.current_size,
                current = size,
                "size mismatch, queueing again"
            ),
            (Decision::Insert(_), _) => debug!(path = %path.display(), size, "queueing new file"),
            (Decision::Skip(reason), _) => debug!(path = %path.display(), %reason, "file skipped"),
            (Decision::Reoptimize(_), None) => {}
        }
        Ok(decision)
    }
}

fn unreadable(path: &Path, source: std::io::Error) -> Decision {
    let err = AuxError::FileUnreadable {
        path: path.to_path_buf(),
        source,
    };
    warn!(code = err.code(), error = %err, "skipping unreadable file");
    Decision::Skip(SkipReason::Unreadable)
}
