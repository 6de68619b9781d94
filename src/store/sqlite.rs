//! SQLite record store: WAL-mode database holding the file inventory.
//!
//! Uses Write-Ahead Logging so status queries can run beside a scan, and
//! cached prepared statements for the hot point lookup.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, Row, params, params_from_iter};
use tracing::warn;

use crate::core::errors::{AuxError, Result};
use crate::store::record::{ClearPendingOutcome, FileRecord, NewRecord, RecordStore};

const RECORD_COLUMNS: &str = "id, path, orig_size, image_size, pending, backup, updated_at";

/// SQLite-backed [`RecordStore`].
pub struct SqliteRecordStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteRecordStore {
    /// Open (or create) the database at `path`, applying schema and PRAGMAs.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| AuxError::io(parent, source))?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        apply_pragmas(&conn)?;
        apply_schema(&conn)?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// In-memory database with the same schema.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
        })
    }

    /// Path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the connection is in WAL journal mode.
    pub fn is_wal_mode(&self) -> bool {
        self.conn
            .query_row("PRAGMA journal_mode", [], |row| row.get::<_, String>(0))
            .is_ok_and(|mode| mode.eq_ignore_ascii_case("wal"))
    }

    fn count(&self, sql: &str) -> Result<u64> {
        let count: i64 = self.conn.prepare_cached(sql)?.query_row([], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

impl RecordStore for SqliteRecordStore {
    fn find_by_path(&self, path: &str) -> Result<Option<FileRecord>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {RECORD_COLUMNS} FROM file_records WHERE path = ?1 ORDER BY id LIMIT 1"
        ))?;
        let mut rows = stmt.query_map(params![path], record_from_row)?;
        Ok(rows.next().transpose()?)
    }

    fn load_reference(&self) -> Result<HashMap<String, FileRecord>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {RECORD_COLUMNS} FROM file_records ORDER BY id"
        ))?;
        let mut index = HashMap::new();
        for record in stmt.query_map([], record_from_row)? {
            let record = record?;
            index.entry(record.path.clone()).or_insert(record);
        }
        Ok(index)
    }

    fn record_count(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM file_records")
    }

    fn insert_batch(&mut self, records: &[NewRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let stamp = now_rfc3339();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO file_records (path, orig_size, image_size, pending, backup, updated_at)
                 VALUES (?1, ?2, 0, 1, 0, ?3)",
            )?;
            for record in records {
                stmt.execute(params![record.path, to_sql_size(record.original_size), stamp])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    fn mark_pending(&mut self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let updated = self.conn.execute(
            &format!("UPDATE file_records SET pending = 1 WHERE id IN ({placeholders})"),
            params_from_iter(ids.iter()),
        )?;
        Ok(updated)
    }

    fn count_pending(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM file_records WHERE pending = 1")
    }

    fn count_optimized(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM file_records WHERE pending = 0 AND image_size > 0")
    }

    fn optimized_page(&self, page: u32, per_page: u32) -> Result<Vec<FileRecord>> {
        let offset = i64::from(page) * i64::from(per_page);
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {RECORD_COLUMNS} FROM file_records
             WHERE pending = 0 AND image_size > 0
             ORDER BY id DESC LIMIT ?1 OFFSET ?2"
        ))?;
        let rows = stmt
            .query_map(params![per_page, offset], record_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn remove(&mut self, id: i64) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM file_records WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn clear_pending(&mut self) -> Result<ClearPendingOutcome> {
        let tx = self.conn.transaction()?;
        let deleted = tx.execute(
            "DELETE FROM file_records
             WHERE pending = 1 AND (image_size IS NULL OR image_size = 0)",
            [],
        )?;
        let reset = tx.execute("UPDATE file_records SET pending = 0 WHERE pending = 1", [])?;
        tx.commit()?;
        Ok(ClearPendingOutcome {
            deleted: deleted as u64,
            reset: reset as u64,
        })
    }

    fn mark_optimized(&mut self, id: i64, size: u64, has_backup: bool) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE file_records
             SET image_size = ?1, pending = 0, backup = ?2, updated_at = ?3
             WHERE id = ?4",
            params![to_sql_size(size), has_backup, now_rfc3339(), id],
        )?;
        Ok(updated > 0)
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let original: i64 = row.get(2)?;
    let current: Option<i64> = row.get(3)?;
    Ok(FileRecord {
        id: row.get(0)?,
        path: row.get(1)?,
        original_size: u64::try_from(original).unwrap_or(0),
        current_size: current.and_then(|size| u64::try_from(size).ok()).unwrap_or(0),
        pending: row.get(4)?,
        has_backup: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn to_sql_size(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ──────────────────── schema & pragmas ────────────────────

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -8000;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = 5000;",
    )?;
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        warn!(mode = %mode, "requested WAL journal mode but sqlite kept another");
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS file_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL,
            orig_size INTEGER NOT NULL,
            image_size INTEGER NOT NULL DEFAULT 0,
            pending INTEGER NOT NULL DEFAULT 0,
            backup INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_file_records_path ON file_records(path);
        CREATE INDEX IF NOT EXISTS idx_file_records_pending ON file_records(pending);",
    )?;
    Ok(())
}

// ──────────────────── tests ────────────────────
