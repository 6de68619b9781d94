//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use aux_inventory::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{AuxError, Result};
pub use crate::core::resource::{ResourceGuard, ResourceProbe, ScriptedProbe, SystemProbe};

// Scanner
pub use crate::scanner::filters::{BypassRegistry, PathFilter};
pub use crate::scanner::mime::MimeType;
pub use crate::scanner::orchestrator::{
    PauseReason, ScanOrchestrator, ScanOutcome, ScanReport, ScanRequest, ScanSettings,
};
pub use crate::scanner::reconcile::{Decision, ReconcileRules, Reconciler};
pub use crate::scanner::walker::Walker;

// Store
pub use crate::store::batch::BatchWriter;
pub use crate::store::checkpoint::{CheckpointStore, ScanState};
pub use crate::store::record::{FileRecord, MemoryRecordStore, RecordStore};
#[cfg(feature = "sqlite")]
pub use crate::store::sqlite::SqliteRecordStore;

// Journal
pub use crate::logger::jsonl::{JournalConfig, ScanJournal};
