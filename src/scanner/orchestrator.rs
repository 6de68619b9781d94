//! Scan orchestration: roots → walker → reconciler → batch writer, under budget.
//!
//! One call to [`ScanOrchestrator::run`] is one invocation. It walks every root
//! not yet completed in the current cycle, sampling the time and memory budget
//! every `check_interval` entries. Running out of budget flushes buffered
//! writes, records a checkpoint a little behind the current position and
//! returns [`ScanOutcome::Paused`]; the caller invokes again later to resume.
//!
//! State is explicit: the caller loads a [`ScanState`], passes it in, and
//! persists the one returned in the [`ScanReport`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::config::{BudgetConfig, Config};
use crate::core::errors::{AuxError, Result};
use crate::core::paths::{dated_upload_dirs, prune_nested_roots, resolve_absolute_path};
use crate::core::resource::{ResourceGuard, ResourceProbe, SystemProbe};
use crate::logger::jsonl::{EventType, LogEntry, ScanJournal, Severity};
use crate::scanner::filters::BypassRegistry;
use crate::scanner::reconcile::{Decision, ReconcileRules, Reconciler};
use crate::scanner::reference::ReferenceIndex;
use crate::scanner::walker::Walker;
use crate::store::batch::{BatchStats, BatchWriter};
use crate::store::checkpoint::{Checkpoint, CheckpointStore, ScanPhase, ScanState};
use crate::store::record::RecordStore;

/// What the caller asks one invocation to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    /// Roots in scan order; nested and duplicate roots are pruned.
    pub roots: Vec<PathBuf>,
    /// Queue known files again even when unchanged.
    pub force: bool,
    /// Wall-clock budget; `None` runs unconstrained.
    pub time_limit: Option<Duration>,
    /// Discard completed roots and checkpoint before scanning.
    pub fresh: bool,
}

impl ScanRequest {
    /// Time-boxed scan of the configured roots.
    #[must_use]
    pub fn interactive(config: &Config) -> Self {
        let secs = config.budget.time_limit_secs;
        Self {
            roots: config.scanner.root_paths.clone(),
            force: false,
            time_limit: (secs > 0).then(|| Duration::from_secs(secs)),
            fresh: false,
        }
    }

    /// Unconstrained scan of the configured roots plus, when enabled, the
    /// upload folders for `today`'s month and the month before.
    #[must_use]
    pub fn background(config: &Config, today: NaiveDate) -> Self {
        let mut roots = config.scanner.root_paths.clone();
        if config.scanner.include_dated_dirs
            && let Some(uploads) = &config.scanner.uploads_dir
        {
            roots.extend(dated_upload_dirs(uploads, today));
        }
        Self {
            roots,
            force: false,
            time_limit: None,
            fresh: false,
        }
    }
}

/// Budget knobs taken from `[budget]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSettings {
    /// Entries between budget checks, at least 1.
    pub check_interval: u64,
    /// How far behind the current position a checkpoint is recorded.
    pub resume_overlap: u64,
    /// Lifetime of a checkpoint. Saturates instead of overflowing.
    pub checkpoint_ttl: chrono::Duration,
    /// Buffered writes per flush.
    pub batch_size: usize,
    /// Process memory ceiling; 0 disables the memory budget.
    pub memory_limit_bytes: u64,
    /// Free memory that must remain below the ceiling.
    pub memory_headroom_bytes: u64,
}

impl From<&BudgetConfig> for ScanSettings {
    fn from(budget: &BudgetConfig) -> Self {
        Self {
            check_interval: budget.check_interval.max(1),
            resume_overlap: budget.resume_overlap,
            checkpoint_ttl: i64::try_from(budget.checkpoint_ttl_secs)
                .ok()
                .and_then(chrono::TimeDelta::try_seconds)
                .unwrap_or(chrono::TimeDelta::MAX),
            batch_size: budget.batch_size,
            memory_limit_bytes: budget.memory_limit_bytes,
            memory_headroom_bytes: budget.memory_headroom_bytes,
        }
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self::from(&BudgetConfig::default())
    }
}

/// Which budget ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// Wall-clock limit reached.
    Time,
    /// Memory headroom consumed.
    Memory,
}

impl fmt::Display for PauseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Time => f.write_str("time budget exhausted"),
            Self::Memory => f.write_str("memory budget exhausted"),
        }
    }
}

/// Conditions that end an invocation without a usable checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FatalReason {
    /// Memory ran out before the invocation got through one check interval.
    MemoryExhausted {
        /// Root being walked when memory ran out.
        root: PathBuf,
        /// Entries visited under that root.
        files_visited: u64,
    },
}

impl FatalReason {
    /// The matching [`AuxError`], for exit codes and messages.
    #[must_use]
    pub fn to_error(&self) -> AuxError {
        match self {
            Self::MemoryExhausted {
                root,
                files_visited,
            } => AuxError::MemoryExhausted {
                root: root.clone(),
                files_visited: *files_visited,
            },
        }
    }
}

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ScanOutcome {
    /// Every root finished; the cycle is over.
    Completed {
        /// Records queued for optimization after the final flush.
        pending: u64,
    },
    /// A budget ran out. The returned state holds the checkpoint.
    Paused {
        /// Budget that ran out.
        reason: PauseReason,
        /// Root the checkpoint points into.
        root: PathBuf,
        /// Resume position recorded in the checkpoint.
        files_visited: u64,
    },
    /// Stopped without progress worth resuming.
    Fatal {
        /// What went wrong.
        reason: FatalReason,
    },
}

/// Counters for one invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    /// Roots walked to the end in this invocation.
    pub roots_scanned: u64,
    /// Roots already completed earlier in the cycle.
    pub roots_skipped: u64,
    /// Entries walked and processed, files and directories.
    pub entries_visited: u64,
    /// Entries passed over to reach a checkpoint.
    pub entries_resumed: u64,
    /// Supported files handed to the reconciler.
    pub files_examined: u64,
    /// Files the reconciler decided to leave alone.
    pub files_skipped: u64,
    /// The reference index was not loaded; lookups went to the store.
    pub reference_degraded: bool,
    /// Writes flushed to the record store.
    pub writes: BatchStats,
    /// Wall-clock time of the invocation.
    pub duration_ms: u64,
}

/// Result of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// How the invocation ended.
    pub outcome: ScanOutcome,
    /// State to persist for the next invocation.
    pub state: ScanState,
    /// Counters.
    pub stats: ScanStats,
}

/// Drives one scan invocation.
pub struct ScanOrchestrator {
    walker: Walker,
    reconciler: Reconciler,
    settings: ScanSettings,
    probe: Option<Box<dyn ResourceProbe>>,
}

impl ScanOrchestrator {
    /// Orchestrator over explicit parts, using the system probe.
    pub fn new(walker: Walker, reconciler: Reconciler, settings: ScanSettings) -> Self {
        Self {
            walker,
            reconciler,
            settings,
            probe: None,
        }
    }

    /// Wire walker, reconciler and budget from configuration.
    ///
    /// `paths.base_dir` is resolved the same way scan roots are, so stored
    /// paths stay relative even when it is relative or crosses a symlink.
    pub fn from_config(config: &Config) -> Result<Self> {
        let bypass = BypassRegistry::new(&config.scanner.bypass_patterns)?;
        debug!(patterns = bypass.pattern_count(), "bypass patterns compiled");
        let reconciler = Reconciler::new(
            ReconcileRules::from_config(config, false),
            Box::new(bypass),
            config.paths.base_dir.as_deref().map(resolve_absolute_path),
        );
        Ok(Self::new(
            Walker::with_hidden_files(config.scanner.ignore_hidden_files),
            reconciler,
            ScanSettings::from(&config.budget),
        ))
    }

    /// Use `probe` for the next invocation instead of the system clock and RSS.
    #[must_use]
    pub fn with_probe(mut self, probe: Box<dyn ResourceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Budget knobs in effect.
    #[must_use]
    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    /// Run one invocation against `store`, starting from `state`.
    ///
    /// Only store failures are errors. Budget exhaustion and fatal memory
    /// pressure are reported through [`ScanOutcome`].
    pub fn run(
        &mut self,
        request: &ScanRequest,
        state: ScanState,
        store: &mut dyn RecordStore,
    ) -> Result<ScanReport> {
        let started = Instant::now();
        let probe: Box<dyn ResourceProbe> = match self.probe.take() {
            Some(probe) => probe,
            None => Box::new(SystemProbe::new(started, self.settings.memory_limit_bytes)),
        };
        let guard = ResourceGuard::new(
            probe,
            request.time_limit,
            self.settings.memory_headroom_bytes,
        );
        self.reconciler.set_force(request.force);
        info!(
            roots = request.roots.len(),
            time_boxed = guard.is_constrained(),
            force = request.force,
            "scan invocation starting"
        );

        let mut invocation = Invocation {
            walker: &self.walker,
            reconciler: &self.reconciler,
            settings: &self.settings,
            guard: &guard,
            state,
            stats: ScanStats::default(),
            batch: BatchWriter::new(self.settings.batch_size),
            processed: 0,
        };
        let outcome = invocation.scan(request, store)?;

        let Invocation {
            state,
            mut stats,
            batch,
            ..
        } = invocation;
        stats.writes = batch.stats();
        stats.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        Ok(ScanReport {
            outcome,
            state,
            stats,
        })
    }

    /// Load state, run one invocation, save state, and journal the outcome.
    pub fn run_persisted(
        &mut self,
        request: &ScanRequest,
        checkpoints: &CheckpointStore,
        store: &mut dyn RecordStore,
        journal: &mut ScanJournal,
    ) -> Result<ScanReport> {
        let state = checkpoints.load(Utc::now())?;
        let mut started = LogEntry::new(EventType::ScanStarted, Severity::Info);
        started.files_visited = state.checkpoint.as_ref().map(|c| c.files_visited);
        started.root = state
            .checkpoint
            .as_ref()
            .map(|c| c.root.display().to_string());
        journal.write_entry(&started);

        let report = match self.run(request, state, store) {
            Ok(report) => report,
            Err(err) => {
                journal.write_entry(
                    &LogEntry::new(EventType::ScanFatal, Severity::Critical).with_error(&err),
                );
                return Err(err);
            }
        };
        checkpoints.save(&report.state)?;
        journal.write_entry(&journal_entry(&report));
        Ok(report)
    }
}

/// Journal line summarising a finished invocation.
fn journal_entry(report: &ScanReport) -> LogEntry {
    let mut entry = match &report.outcome {
        ScanOutcome::Completed { pending } => {
            let mut entry = LogEntry::new(EventType::ScanCompleted, Severity::Info);
            entry.pending = Some(*pending);
            entry
        }
        ScanOutcome::Paused {
            reason,
            root,
            files_visited,
        } => {
            let mut entry =
                LogEntry::new(EventType::ScanPaused, Severity::Info).with_root(root);
            entry.files_visited = Some(*files_visited);
            entry.reason = Some(reason.to_string());
            entry
        }
        ScanOutcome::Fatal { reason } => {
            let err = reason.to_error();
            LogEntry::new(EventType::ScanFatal, Severity::Critical).with_error(&err)
        }
    };
    entry.inserted = Some(report.stats.writes.inserted);
    entry.reoptimized = Some(report.stats.writes.reoptimized);
    entry.duration_ms = Some(report.stats.duration_ms);
    entry
}

/// Mutable state of one invocation.
struct Invocation<'a> {
    walker: &'a Walker,
    reconciler: &'a Reconciler,
    settings: &'a ScanSettings,
    guard: &'a ResourceGuard,
    state: ScanState,
    stats: ScanStats,
    batch: BatchWriter,
    /// Entries processed in this invocation across all roots.
    processed: u64,
}

enum RootResult {
    Done,
    Stopped(ScanOutcome),
}

impl Invocation<'_> {
    fn scan(&mut self, request: &ScanRequest, store: &mut dyn RecordStore) -> Result<ScanOutcome> {
        if request.fresh {
            self.state.start_fresh_cycle();
        }

        let roots = prune_nested_roots(
            request
                .roots
                .iter()
                .map(|root| resolve_absolute_path(root))
                .collect(),
        );
        let remaining: Vec<&PathBuf> = roots
            .iter()
            .filter(|root| !self.state.is_root_completed(root))
            .collect();
        self.stats.roots_skipped = (roots.len() - remaining.len()) as u64;

        self.state.phase = ScanPhase::Scanning;
        if !remaining.is_empty() {
            let reference = ReferenceIndex::build(&*store, self.guard)?;
            self.stats.reference_degraded = reference.is_degraded();
            for root in remaining {
                if let RootResult::Stopped(outcome) = self.scan_root(root, &reference, store)? {
                    return Ok(outcome);
                }
            }
        }

        self.batch.flush(store)?;
        let pending = store.count_pending()?;
        self.state.completed_roots.clear();
        self.state.checkpoint = None;
        self.state.phase = ScanPhase::Idle;
        self.state.last_completed_at = Some(Utc::now());
        info!(pending, "scan cycle complete");
        Ok(ScanOutcome::Completed { pending })
    }

    fn scan_root(
        &mut self,
        root: &Path,
        reference: &ReferenceIndex,
        store: &mut dyn RecordStore,
    ) -> Result<RootResult> {
        let resume_from = self.state.resume_offset(root);
        info!(root = %root.display(), resume_from, "scanning root");

        let interval = self.settings.check_interval;
        let walker = self.walker;
        let mut counter: u64 = 0;
        for entry in walker.traverse(root) {
            if counter < resume_from {
                counter += 1;
                self.stats.entries_resumed += 1;
                continue;
            }

            if counter % interval == 0
                && let Some(reason) = self.budget_exhausted()
            {
                return self.stop(root, counter, reason, store).map(RootResult::Stopped);
            }

            counter += 1;
            self.processed += 1;
            self.stats.entries_visited += 1;
            if !entry.is_file() {
                continue;
            }

            self.stats.files_examined += 1;
            match self.reconciler.reconcile(&entry.path, reference, &*store)? {
                Decision::Skip(_) => self.stats.files_skipped += 1,
                Decision::Reoptimize(id) => self.batch.buffer_reoptimize(id, store)?,
                Decision::Insert(record) => self.batch.buffer_insert(record, store)?,
            }
        }

        self.batch.flush(store)?;
        if self
            .state
            .checkpoint
            .as_ref()
            .is_some_and(|checkpoint| checkpoint.root == root)
        {
            self.state.checkpoint = None;
        }
        self.state.completed_roots.insert(root.to_path_buf());
        self.stats.roots_scanned += 1;
        info!(root = %root.display(), entries = counter, "root complete");
        Ok(RootResult::Done)
    }

    fn budget_exhausted(&self) -> Option<PauseReason> {
        if self.guard.time_exhausted() {
            Some(PauseReason::Time)
        } else if self.guard.memory_exhausted() {
            Some(PauseReason::Memory)
        } else {
            None
        }
    }

    fn stop(
        &mut self,
        root: &Path,
        counter: u64,
        reason: PauseReason,
        store: &mut dyn RecordStore,
    ) -> Result<ScanOutcome> {
        if reason == PauseReason::Memory && self.processed < self.settings.check_interval {
            let fatal = FatalReason::MemoryExhausted {
                root: root.to_path_buf(),
                files_visited: counter,
            };
            warn!(error = %fatal.to_error(), "scan aborted");
            return Ok(ScanOutcome::Fatal { reason: fatal });
        }

        self.batch.flush(store)?;
        let resume_at = counter.saturating_sub(self.settings.resume_overlap);
        self.state.checkpoint = Some(Checkpoint::new(
            root.to_path_buf(),
            resume_at,
            Utc::now(),
            self.settings.checkpoint_ttl,
        ));
        info!(root = %root.display(), files_visited = counter, resume_at, %reason, "scan paused");
        Ok(ScanOutcome::Paused {
            reason,
            root: root.to_path_buf(),
            files_visited: counter,
        })
    }
}
