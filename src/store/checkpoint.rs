//! Durable scan progress: completed roots plus an expiring in-root offset.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::{AuxError, Result};

const STATE_VERSION: u32 = 1;

/// Where an interrupted root left off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Absolute root being walked.
    pub root: PathBuf,
    /// Walker entries to skip when the root is walked again.
    pub files_visited: u64,
    /// After this the checkpoint is ignored and the root restarts.
    pub expires_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Checkpoint expiring `ttl` after `now`, or never if that overflows.
    #[must_use]
    pub fn new(root: PathBuf, files_visited: u64, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            root,
            files_visited,
            expires_at: now
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Expiry is inclusive.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Whether a cycle is in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    /// No cycle started, or the last one completed.
    #[default]
    Idle,
    /// Some roots remain.
    Scanning,
}

/// Everything a later invocation needs to pick a cycle back up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanState {
    /// Position inside the interrupted root, if any.
    #[serde(default)]
    pub checkpoint: Option<Checkpoint>,
    /// Roots finished in the current cycle.
    #[serde(default)]
    pub completed_roots: BTreeSet<PathBuf>,
    /// Cycle phase.
    #[serde(default)]
    pub phase: ScanPhase,
    /// End of the last full cycle.
    #[serde(default)]
    pub last_completed_at: Option<DateTime<Utc>>,
}

impl ScanState {
    /// Entries to skip in `root`; zero unless the checkpoint names it.
    #[must_use]
    pub fn resume_offset(&self, root: &Path) -> u64 {
        self.checkpoint
            .as_ref()
            .filter(|checkpoint| checkpoint.root == root)
            .map_or(0, |checkpoint| checkpoint.files_visited)
    }

    /// Whether `root` already finished in this cycle.
    #[must_use]
    pub fn is_root_completed(&self, root: &Path) -> bool {
        self.completed_roots.contains(root)
    }

    /// Forget progress of the current cycle, keeping `last_completed_at`.
    pub fn start_fresh_cycle(&mut self) {
        self.checkpoint = None;
        self.completed_roots.clear();
        self.phase = ScanPhase::Idle;
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    #[serde(flatten)]
    state: ScanState,
}

/// JSON file holding one [`ScanState`].
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    /// Store backed by the file at `path`; nothing is read yet.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Location of the state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the saved state. A missing file is an empty state; an expired
    /// checkpoint is dropped.
    pub fn load(&self, now: DateTime<Utc>) -> Result<ScanState> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(ScanState::default()),
            Err(err) => return Err(AuxError::io(&self.path, err)),
        };

        let file: StateFile =
            serde_json::from_slice(&raw).map_err(|e| AuxError::Serialization {
                context: "scan_state_load",
                details: format!("{}: {e}", self.path.display()),
            })?;

        if file.version != STATE_VERSION {
            return Err(AuxError::Serialization {
                context: "scan_state_version",
                details: format!(
                    "unsupported scan state version {} (expected {STATE_VERSION})",
                    file.version
                ),
            });
        }

        let mut state = file.state;
        if state
            .checkpoint
            .as_ref()
            .is_some_and(|checkpoint| checkpoint.is_expired(now))
        {
            state.checkpoint = None;
        }
        Ok(state)
    }

    /// Persist `state` atomically: temp file, then rename.
    pub fn save(&self, state: &ScanState) -> Result<()> {
        let temp_path = self.path.with_extension("tmp");

        if let Some(parent) = temp_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| AuxError::io(parent, e))?;
        }

        let file = {
            let mut opts = OpenOptions::new();
            opts.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                opts.mode(0o600);
            }
            opts.open(&temp_path)
                .map_err(|e| AuxError::io(&temp_path, e))?
        };

        let document = StateFile {
            version: STATE_VERSION,
            state: state.clone(),
        };
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &document).map_err(|e| {
            AuxError::Serialization {
                context: "scan_state_write",
                details: e.to_string(),
            }
        })?;
        writer.flush().map_err(|e| AuxError::io(&temp_path, e))?;

        fs::rename(&temp_path, &self.path).map_err(|e| AuxError::io(&self.path, e))?;
        Ok(())
    }

    /// Remove the state file if present.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(AuxError::io(&self.path, error)),
        }
    }
}
