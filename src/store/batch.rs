//! Buffered writes between the reconciler and the record store.

use serde::Serialize;
use tracing::debug;

use crate::core::errors::Result;
use crate::store::record::{NewRecord, RecordStore};

/// Default number of buffered entries that triggers an automatic flush.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Totals written through a [`BatchWriter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    /// New records written.
    pub inserted: u64,
    /// Known records flipped back to pending.
    pub reoptimized: u64,
    /// Insert transactions issued.
    pub insert_flushes: u64,
    /// Pending-update transactions issued.
    pub reoptimize_flushes: u64,
}

/// Two independent buffers: new records and ids to flip back to pending.
///
/// Each buffer flushes on its own as soon as it holds `batch_size` entries, so
/// the entry after a full batch always lands in an empty buffer.
#[derive(Debug)]
pub struct BatchWriter {
    batch_size: usize,
    inserts: Vec<NewRecord>,
    reoptimize: Vec<i64>,
    stats: BatchStats,
}

impl BatchWriter {
    /// A `batch_size` of zero is treated as one.
    #[must_use]
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            inserts: Vec::with_capacity(batch_size.min(DEFAULT_BATCH_SIZE)),
            reoptimize: Vec::new(),
            stats: BatchStats::default(),
        }
    }

    /// Queue a new record, flushing inserts when the buffer is full.
    pub fn buffer_insert(&mut self, record: NewRecord, store: &mut dyn RecordStore) -> Result<()> {
        self.inserts.push(record);
        if self.inserts.len() >= self.batch_size {
            self.flush_inserts(store)?;
        }
        Ok(())
    }

    /// Queue `id` to be marked pending again.
    pub fn buffer_reoptimize(&mut self, id: i64, store: &mut dyn RecordStore) -> Result<()> {
        self.reoptimize.push(id);
        if self.reoptimize.len() >= self.batch_size {
            self.flush_reoptimize(store)?;
        }
        Ok(())
    }

    /// Write out both buffers.
    pub fn flush(&mut self, store: &mut dyn RecordStore) -> Result<()> {
        self.flush_inserts(store)?;
        self.flush_reoptimize(store)
    }

    /// Inserts buffered but not yet written.
    #[must_use]
    pub fn pending_inserts(&self) -> usize {
        self.inserts.len()
    }

    /// Ids buffered for re-queueing.
    #[must_use]
    pub fn pending_reoptimize(&self) -> usize {
        self.reoptimize.len()
    }

    /// Totals so far.
    #[must_use]
    pub fn stats(&self) -> BatchStats {
        self.stats
    }

    fn flush_inserts(&mut self, store: &mut dyn RecordStore) -> Result<()> {
        if self.inserts.is_empty() {
            return Ok(());
        }
        let written = store.insert_batch(&self.inserts)?;
        debug!(records = written, "flushed insert batch");
        self.inserts.clear();
        self.stats.inserted += written as u64;
        self.stats.insert_flushes += 1;
        Ok(())
    }

    fn flush_reoptimize(&mut self, store: &mut dyn RecordStore) -> Result<()> {
        if self.reoptimize.is_empty() {
            return Ok(());
        }
        let updated = store.mark_pending(&self.reoptimize)?;
        debug!(records = updated, "flushed reoptimize batch");
        self.stats.reoptimized += self.reoptimize.len() as u64;
        self.reoptimize.clear();
        self.stats.reoptimize_flushes += 1;
        Ok(())
    }
}

impl Default for BatchWriter {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}
