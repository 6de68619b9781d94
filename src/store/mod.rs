//! Persistence: file records, write batching, and scan checkpoints.

pub mod batch;
pub mod checkpoint;
pub mod record;
#[cfg(feature = "sqlite")]
pub mod sqlite;
