//! Per-invocation lookup of known records by stored path.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::core::errors::Result;
use crate::core::resource::ResourceGuard;
use crate::store::record::{FileRecord, RecordStore};

/// Rough in-memory cost of one indexed record (path, struct, map slot).
pub const RECORD_FOOTPRINT_BYTES: u64 = 512;

/// Either every record held in memory, or a marker telling callers to ask
/// the store file by file.
#[derive(Debug)]
pub enum ReferenceIndex {
    /// Records keyed by stored path.
    Loaded(HashMap<String, FileRecord>),
    /// Too little memory to hold the index.
    Degraded,
}

impl ReferenceIndex {
    /// Load all records unless the estimated footprint would eat into the
    /// memory headroom.
    pub fn build(store: &dyn RecordStore, guard: &ResourceGuard) -> Result<Self> {
        let count = store.record_count()?;
        if !guard.has_memory_for(count.saturating_mul(RECORD_FOOTPRINT_BYTES)) {
            warn!(records = count, "not enough memory for reference index, using per-file lookups");
            return Ok(Self::Degraded);
        }
        let index = store.load_reference()?;
        info!(records = index.len(), "reference index loaded");
        Ok(Self::Loaded(index))
    }

    /// Whether lookups fall through to the store.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded)
    }

    /// Record stored under `path`, if any.
    pub fn lookup(&self, path: &str, store: &dyn RecordStore) -> Result<Option<FileRecord>> {
        match self {
            Self::Loaded(index) => Ok(index.get(path).cloned()),
            Self::Degraded => store.find_by_path(path),
        }
    }
}
