//! Scan journal: append-only line-delimited JSON, one line per notable event.
//!
//! Each line is a self-contained JSON object assembled in memory and written
//! with a single `write_all`, so a tailing reader never sees half a line.
//! When the file cannot be opened the journal degrades to `tracing` warnings
//! and then to silent discard; a scan never fails because of its journal.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions, rename};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::errors::{AuxError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ScanStarted,
    RootCompleted,
    ScanPaused,
    ScanCompleted,
    ScanFatal,
    PendingCleared,
    RecordRemoved,
    StateReset,
}

/// A single journal line; everything but `ts`, `event` and `severity` is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO 8601 UTC timestamp.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_visited: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inserted: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reoptimized: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Pause or fatal reason label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            root: None,
            files_visited: None,
            inserted: None,
            reoptimized: None,
            pending: None,
            duration_ms: None,
            reason: None,
            error_code: None,
            error_message: None,
            config_hash: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_root(mut self, root: &Path) -> Self {
        self.root = Some(root.display().to_string());
        self
    }

    #[must_use]
    pub fn with_error(mut self, err: &AuxError) -> Self {
        self.error_code = Some(err.code().to_string());
        self.error_message = Some(err.to_string());
        self
    }
}

#[derive(Debug, Clone)]
pub struct JournalConfig {
    pub path: PathBuf,
    /// Size that triggers rotation. Default: 10 MiB.
    pub max_size_bytes: u64,
    /// Rotated files kept beside the live one. Default: 3.
    pub max_rotated_files: u32,
}

impl JournalConfig {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            max_size_bytes: 10 * 1024 * 1024,
            max_rotated_files: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Normal,
    Discard,
}

/// Append-only journal writer with size-based rotation.
pub struct ScanJournal {
    config: JournalConfig,
    writer: Option<BufWriter<File>>,
    state: WriterState,
    bytes_written: u64,
}

impl ScanJournal {
    /// Open the journal; failure to open degrades to discard.
    pub fn open(config: JournalConfig) -> Self {
        let mut journal = Self {
            config,
            writer: None,
            state: WriterState::Discard,
            bytes_written: 0,
        };
        match open_append(&journal.config.path) {
            Ok((file, size)) => {
                journal.writer = Some(BufWriter::new(file));
                journal.state = WriterState::Normal;
                journal.bytes_written = size;
            }
            Err(err) => warn!(error = %err, "scan journal unavailable, entries will be dropped"),
        }
        journal
    }

    /// A journal that drops everything.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            config: JournalConfig::new(PathBuf::new()),
            writer: None,
            state: WriterState::Discard,
            bytes_written: 0,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == WriterState::Normal
    }

    /// Write a single entry as one line and flush it.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        if self.state == WriterState::Discard {
            return;
        }
        let line = match serde_json::to_string(entry) {
            Ok(json) => format!("{json}\n"),
            Err(err) => {
                warn!(error = %err, "could not serialize journal entry");
                return;
            }
        };

        if self.bytes_written + line.len() as u64 > self.config.max_size_bytes {
            self.rotate();
        }

        let written = self.writer.as_mut().is_some_and(|writer| {
            writer
                .write_all(line.as_bytes())
                .and_then(|()| writer.flush())
                .is_ok()
        });
        if written {
            self.bytes_written += line.len() as u64;
        } else {
            warn!(path = %self.config.path.display(), "scan journal write failed, disabling journal");
            self.writer = None;
            self.state = WriterState::Discard;
        }
    }

    fn rotate(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            let _ = writer.flush();
        }
        self.writer = None;

        let base = self.config.path.clone();
        for i in (1..self.config.max_rotated_files).rev() {
            let _ = rename(rotated_name(&base, i), rotated_name(&base, i + 1));
        }
        let _ = rename(&base, rotated_name(&base, 1));

        match open_append(&base) {
            Ok((file, _)) => {
                self.writer = Some(BufWriter::new(file));
                self.bytes_written = 0;
            }
            Err(err) => {
                warn!(error = %err, "scan journal rotation failed, disabling journal");
                self.state = WriterState::Discard;
            }
        }
    }
}

/// Read the last `limit` parseable entries of a journal, oldest first.
///
/// A missing journal is empty; malformed lines are skipped.
pub fn read_recent(path: &Path, limit: usize) -> Result<Vec<LogEntry>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(AuxError::io(path, err)),
    };
    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|err| AuxError::io(path, err))?;
        if let Ok(entry) = serde_json::from_str::<LogEntry>(&line) {
            entries.push(entry);
        }
    }
    let skip = entries.len().saturating_sub(limit);
    Ok(entries.split_off(skip))
}

// ──────────────────────── helpers ────────────────────────

/// Open or create a file for appending. Returns `(File, current_size)`.
fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| AuxError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| AuxError::io(path, source))?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok((file, size))
}

/// Build a rotated filename: `scan.jsonl` → `scan.jsonl.2`.
fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ──────────────────────── tests ────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_valid_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal").join("scan.jsonl");
        let mut journal = ScanJournal::open(JournalConfig::new(path.clone()));
        assert!(journal.is_active());

        let mut entry = LogEntry::new(EventType::ScanPaused, Severity::Info)
            .with_root(Path::new("/srv/uploads"));
        entry.files_visited = Some(180);
        entry.reason = Some("time".to_string());
        journal.write_entry(&entry);
        journal.write_entry(&LogEntry::new(EventType::ScanCompleted, Severity::Info));

        let raw = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "scan_paused");
        assert_eq!(first["files_visited"], 180);
        assert!(first.get("pending").is_none());
    }

    #[test]
    fn read_recent_returns_tail_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.jsonl");
        let mut journal = ScanJournal::open(JournalConfig::new(path.clone()));
        for visited in 0..5 {
            let mut entry = LogEntry::new(EventType::ScanStarted, Severity::Info);
            entry.files_visited = Some(visited);
            journal.write_entry(&entry);
        }
        let mut raw = fs::read_to_string(&path).unwrap();
        raw.push_str("not json\n");
        fs::write(&path, raw).unwrap();

        let tail = read_recent(&path, 2).unwrap();
        let visited: Vec<_> = tail.iter().map(|e| e.files_visited).collect();
        assert_eq!(visited, vec![Some(3), Some(4)]);
        assert!(read_recent(&dir.path().join("missing.jsonl"), 5).unwrap().is_empty());
    }

    #[test]
    fn rotation_moves_full_file_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.jsonl");
        let config = JournalConfig {
            path: path.clone(),
            max_size_bytes: 200,
            max_rotated_files: 2,
        };
        let mut journal = ScanJournal::open(config);
        for _ in 0..10 {
            journal.write_entry(&LogEntry::new(EventType::ScanCompleted, Severity::Info));
        }
        assert!(rotated_name(&path, 1).exists());
        assert!(fs::metadata(&path).unwrap().len() <= 200);
    }

    #[test]
    fn disabled_journal_drops_entries() {
        let mut journal = ScanJournal::disabled();
        assert!(!journal.is_active());
        journal.write_entry(&LogEntry::new(EventType::ScanStarted, Severity::Info));
    }

    #[test]
    fn error_details_are_recorded() {
        let err = AuxError::MemoryExhausted {
            root: PathBuf::from("/srv/uploads"),
            files_visited: 0,
        };
        let entry = LogEntry::new(EventType::ScanFatal, Severity::Critical).with_error(&err);
        assert_eq!(entry.error_code.as_deref(), Some("AUX-2003"));
    }
}
