//! Record model and the persistence contract the scanner depends on.

use std::collections::HashMap;

use serde::Serialize;

use crate::core::errors::Result;

/// One inventoried file.
///
/// `path` is the natural key. Uniqueness is not enforced by storage; the
/// scanner looks a path up before inserting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    /// Storage-assigned id.
    pub id: i64,
    /// Path relative to the base directory, or absolute when outside it.
    pub path: String,
    /// Size seen when the file was first inventoried.
    pub original_size: u64,
    /// Size after the last optimization, 0 while the file has never been processed.
    pub current_size: u64,
    /// Queued for optimization.
    pub pending: bool,
    /// The optimizer kept a copy of the original.
    pub has_backup: bool,
    /// RFC 3339 time of the last write, if storage tracks it.
    pub updated_at: Option<String>,
}

/// A record about to be inserted; always created pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    /// Stored path, see [`FileRecord::path`].
    pub path: String,
    /// Size on disk when discovered.
    pub original_size: u64,
}

/// Rows affected by [`RecordStore::clear_pending`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClearPendingOutcome {
    /// Pending rows that never got a size, deleted outright.
    pub deleted: u64,
    /// Pending rows with a size, flipped back to not pending.
    pub reset: u64,
}

/// Durable storage of [`FileRecord`]s.
pub trait RecordStore {
    /// First record (lowest id) stored under `path`.
    fn find_by_path(&self, path: &str) -> Result<Option<FileRecord>>;

    /// Every record keyed by path; on duplicates the lowest id wins.
    fn load_reference(&self) -> Result<HashMap<String, FileRecord>>;

    /// Number of stored records.
    fn record_count(&self) -> Result<u64>;

    /// Insert all records in one transaction. Returns the number inserted.
    fn insert_batch(&mut self, records: &[NewRecord]) -> Result<usize>;

    /// Set `pending` on every listed id. Returns rows updated.
    fn mark_pending(&mut self, ids: &[i64]) -> Result<usize>;

    /// Records queued for optimization.
    fn count_pending(&self) -> Result<u64>;

    /// Records confirmed optimized: not pending and with a non-zero size.
    fn count_optimized(&self) -> Result<u64>;

    /// Optimized records, newest first. `page` is zero-based.
    fn optimized_page(&self, page: u32, per_page: u32) -> Result<Vec<FileRecord>>;

    /// Delete one record. Returns whether it existed.
    fn remove(&mut self, id: i64) -> Result<bool>;

    /// Drop queued work: delete pending rows without a size, un-pend the rest.
    fn clear_pending(&mut self) -> Result<ClearPendingOutcome>;

    /// Confirm a record as optimized at `size`. Returns whether it existed.
    fn mark_optimized(&mut self, id: i64, size: u64, has_backup: bool) -> Result<bool>;
}

/// Volatile store for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    rows: Vec<FileRecord>,
    next_id: i64,
}

impl MemoryRecordStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every row in insertion order.
    #[must_use]
    pub fn rows(&self) -> &[FileRecord] {
        &self.rows
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

impl RecordStore for MemoryRecordStore {
    fn find_by_path(&self, path: &str) -> Result<Option<FileRecord>> {
        Ok(self.rows.iter().find(|row| row.path == path).cloned())
    }

    fn load_reference(&self) -> Result<HashMap<String, FileRecord>> {
        let mut index = HashMap::with_capacity(self.rows.len());
        for row in &self.rows {
            index.entry(row.path.clone()).or_insert_with(|| row.clone());
        }
        Ok(index)
    }

    fn record_count(&self) -> Result<u64> {
        Ok(self.rows.len() as u64)
    }

    fn insert_batch(&mut self, records: &[NewRecord]) -> Result<usize> {
        let stamp = now_rfc3339();
        for record in records {
            self.next_id += 1;
            self.rows.push(FileRecord {
                id: self.next_id,
                path: record.path.clone(),
                original_size: record.original_size,
                current_size: 0,
                pending: true,
                has_backup: false,
                updated_at: Some(stamp.clone()),
            });
        }
        Ok(records.len())
    }

    fn mark_pending(&mut self, ids: &[i64]) -> Result<usize> {
        let mut updated = 0;
        for row in self.rows.iter_mut().filter(|row| ids.contains(&row.id)) {
            row.pending = true;
            updated += 1;
        }
        Ok(updated)
    }

    fn count_pending(&self) -> Result<u64> {
        Ok(self.rows.iter().filter(|row| row.pending).count() as u64)
    }

    fn count_optimized(&self) -> Result<u64> {
        Ok(self
            .rows
            .iter()
            .filter(|row| !row.pending && row.current_size > 0)
            .count() as u64)
    }

    fn optimized_page(&self, page: u32, per_page: u32) -> Result<Vec<FileRecord>> {
        let offset = page as usize * per_page as usize;
        Ok(self
            .rows
            .iter()
            .rev()
            .filter(|row| !row.pending && row.current_size > 0)
            .skip(offset)
            .take(per_page as usize)
            .cloned()
            .collect())
    }

    fn remove(&mut self, id: i64) -> Result<bool> {
        let before = self.rows.len();
        self.rows.retain(|row| row.id != id);
        Ok(self.rows.len() != before)
    }

    fn clear_pending(&mut self) -> Result<ClearPendingOutcome> {
        let before = self.rows.len();
        self.rows.retain(|row| !(row.pending && row.current_size == 0));
        let deleted = (before - self.rows.len()) as u64;
        let mut reset = 0;
        for row in self.rows.iter_mut().filter(|row| row.pending) {
            row.pending = false;
            reset += 1;
        }
        Ok(ClearPendingOutcome { deleted, reset })
    }

    fn mark_optimized(&mut self, id: i64, size: u64, has_backup: bool) -> Result<bool> {
        let stamp = now_rfc3339();
        Ok(self
            .rows
            .iter_mut()
            .find(|row| row.id == id)
            .map(|row| {
                row.current_size = size;
                row.pending = false;
                row.has_backup = has_backup;
                row.updated_at = Some(stamp);
            })
            .is_some())
    }
}
