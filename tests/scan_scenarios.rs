//! End-to-end scan scenarios against a real SQLite store and checkpoint file.

mod common;

use std::fs;
use std::path::{Path, PathBuf};

use aux_inventory::core::config::Config;
use aux_inventory::core::resource::ScriptedProbe;
use aux_inventory::logger::jsonl::{EventType, JournalConfig, ScanJournal, read_recent};
use aux_inventory::scanner::orchestrator::{
    PauseReason, ScanOrchestrator, ScanOutcome, ScanRequest,
};
use aux_inventory::store::checkpoint::{CheckpointStore, ScanPhase, ScanState};
use aux_inventory::store::record::RecordStore;
use aux_inventory::store::sqlite::SqliteRecordStore;
use common::{GIF_HEAD, JPEG_HEAD, PNG_HEAD, write_file};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    data: PathBuf,
    config: Config,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("site");
        fs::create_dir_all(&root).unwrap();
        let root = fs::canonicalize(&root).unwrap();
        let data = dir.path().join("data");

        let mut config = Config::default();
        config.scanner.root_paths = vec![root.clone()];
        config.types.jpeg = true;
        config.types.png = true;
        config.types.gif = false;
        config.thresholds.min_size_bytes = 100;
        config.budget.memory_limit_bytes = 0;
        config.paths.sqlite_db = data.join("inventory.sqlite3");
        config.paths.state_file = data.join("scan-state.json");
        config.paths.journal = data.join("scan-journal.jsonl");

        Self {
            _dir: dir,
            root,
            data,
            config,
        }
    }

    fn store(&self) -> SqliteRecordStore {
        SqliteRecordStore::open(&self.config.paths.sqlite_db).unwrap()
    }

    fn checkpoints(&self) -> CheckpointStore {
        CheckpointStore::new(self.config.paths.state_file.clone())
    }

    fn stored(&self, name: &str) -> String {
        self.root.join(name).display().to_string()
    }

    fn scan(&self, store: &mut SqliteRecordStore) -> ScanOutcome {
        let mut orchestrator = ScanOrchestrator::from_config(&self.config).unwrap();
        orchestrator
            .run(
                &ScanRequest::interactive(&self.config),
                ScanState::default(),
                store,
            )
            .unwrap()
            .outcome
    }
}

fn flat_tree(root: &Path, count: usize) {
    for i in 0..count {
        write_file(&root.join(format!("img-{i:04}.jpg")), JPEG_HEAD, 200);
    }
}

fn distinct_paths(store: &SqliteRecordStore) -> usize {
    let reference = store.load_reference().unwrap();
    reference.len()
}

#[test]
fn only_supported_files_within_thresholds_are_queued() {
    let fx = Fixture::new();
    write_file(&fx.root.join("a.jpg"), JPEG_HEAD, 5000);
    write_file(&fx.root.join("b.png"), PNG_HEAD, 50);
    write_file(&fx.root.join("c.gif"), GIF_HEAD, 5000);
    fs::write(fx.root.join("notes.txt"), "hello").unwrap();

    let mut store = fx.store();
    assert_eq!(fx.scan(&mut store), ScanOutcome::Completed { pending: 1 });
    assert_eq!(store.count_pending().unwrap(), 1);

    let record = store.find_by_path(&fx.stored("a.jpg")).unwrap().unwrap();
    assert!(record.pending);
    assert_eq!(record.original_size, 5000);
    assert!(store.find_by_path(&fx.stored("b.png")).unwrap().is_none());
    assert!(store.find_by_path(&fx.stored("c.gif")).unwrap().is_none());
}

#[test]
fn size_change_requeues_the_same_record() {
    let fx = Fixture::new();
    write_file(&fx.root.join("a.jpg"), JPEG_HEAD, 5000);
    let mut store = fx.store();
    fx.scan(&mut store);

    let id = store.find_by_path(&fx.stored("a.jpg")).unwrap().unwrap().id;
    assert!(store.mark_optimized(id, 5000, true).unwrap());
    assert_eq!(store.count_pending().unwrap(), 0);

    assert_eq!(fx.scan(&mut store), ScanOutcome::Completed { pending: 0 });

    write_file(&fx.root.join("a.jpg"), JPEG_HEAD, 6000);
    assert_eq!(fx.scan(&mut store), ScanOutcome::Completed { pending: 1 });
    let record = store.find_by_path(&fx.stored("a.jpg")).unwrap().unwrap();
    assert_eq!(record.id, id);
    assert!(record.pending);
    assert_eq!(store.record_count().unwrap(), 1);
}

#[test]
fn force_requeues_unchanged_files() {
    let mut fx = Fixture::new();
    write_file(&fx.root.join("a.jpg"), JPEG_HEAD, 5000);
    let mut store = fx.store();
    fx.scan(&mut store);
    let id = store.find_by_path(&fx.stored("a.jpg")).unwrap().unwrap().id;
    store.mark_optimized(id, 5000, false).unwrap();

    fx.config.budget.time_limit_secs = 0;
    let mut request = ScanRequest::interactive(&fx.config);
    request.force = true;
    let report = ScanOrchestrator::from_config(&fx.config)
        .unwrap()
        .run(&request, ScanState::default(), &mut store)
        .unwrap();
    assert_eq!(report.outcome, ScanOutcome::Completed { pending: 1 });
    assert_eq!(report.stats.writes.reoptimized, 1);
    assert_eq!(report.stats.writes.inserted, 0);
}

#[test]
fn rescanning_an_unchanged_tree_writes_nothing() {
    let fx = Fixture::new();
    write_file(&fx.root.join("a.jpg"), JPEG_HEAD, 5000);
    write_file(&fx.root.join("nested/deeper/b.png"), PNG_HEAD, 800);
    let mut store = fx.store();
    fx.scan(&mut store);
    let before = store.load_reference().unwrap();

    let mut orchestrator = ScanOrchestrator::from_config(&fx.config).unwrap();
    let report = orchestrator
        .run(
            &ScanRequest::interactive(&fx.config),
            ScanState::default(),
            &mut store,
        )
        .unwrap();
    assert_eq!(report.outcome, ScanOutcome::Completed { pending: 2 });
    assert_eq!(report.stats.writes.inserted, 0);
    assert_eq!(report.stats.writes.reoptimized, 0);
    assert_eq!(store.load_reference().unwrap(), before);
}

#[test]
fn thresholds_and_bypass_patterns_keep_files_out() {
    let mut fx = Fixture::new();
    fx.config.thresholds.png_max_size_bytes = 1000;
    fx.config.scanner.bypass_patterns = vec!["**/cache/**".to_string()];
    write_file(&fx.root.join("big.png"), PNG_HEAD, 2000);
    write_file(&fx.root.join("ok.png"), PNG_HEAD, 900);
    write_file(&fx.root.join("cache/thumb.jpg"), JPEG_HEAD, 900);
    write_file(&fx.root.join(".hidden/x.jpg"), JPEG_HEAD, 900);

    let mut store = fx.store();
    assert_eq!(fx.scan(&mut store), ScanOutcome::Completed { pending: 1 });
    assert!(store.find_by_path(&fx.stored("ok.png")).unwrap().is_some());
}

#[test]
fn batches_flush_at_one_thousand_records() {
    let fx = Fixture::new();
    flat_tree(&fx.root, 1001);
    let mut store = fx.store();

    let mut orchestrator = ScanOrchestrator::from_config(&fx.config).unwrap();
    let report = orchestrator
        .run(
            &ScanRequest::background(&fx.config, chrono::Utc::now().date_naive()),
            ScanState::default(),
            &mut store,
        )
        .unwrap();
    assert_eq!(report.outcome, ScanOutcome::Completed { pending: 1001 });
    assert_eq!(report.stats.writes.inserted, 1001);
    assert_eq!(report.stats.writes.insert_flushes, 2);
    assert_eq!(store.record_count().unwrap(), 1001);
}

#[test]
fn paused_scan_resumes_from_saved_checkpoint() {
    let fx = Fixture::new();
    flat_tree(&fx.root, 250);
    let mut store = fx.store();
    let checkpoints = fx.checkpoints();
    let mut journal = ScanJournal::open(JournalConfig::new(fx.config.paths.journal.clone()));
    let request = ScanRequest::interactive(&fx.config);

    let mut first = ScanOrchestrator::from_config(&fx.config)
        .unwrap()
        .with_probe(Box::new(ScriptedProbe::unlimited().time_exhausted_after(2)));
    let report = first
        .run_persisted(&request, &checkpoints, &mut store, &mut journal)
        .unwrap();
    assert_eq!(
        report.outcome,
        ScanOutcome::Paused {
            reason: PauseReason::Time,
            root: fx.root.clone(),
            files_visited: 200,
        }
    );
    assert_eq!(store.record_count().unwrap(), 200);

    let saved = checkpoints.load(chrono::Utc::now()).unwrap();
    assert_eq!(saved.phase, ScanPhase::Scanning);
    assert_eq!(saved.resume_offset(&fx.root), 180);

    let mut second = ScanOrchestrator::from_config(&fx.config).unwrap();
    let report = second
        .run_persisted(&request, &checkpoints, &mut store, &mut journal)
        .unwrap();
    assert_eq!(report.outcome, ScanOutcome::Completed { pending: 250 });
    assert_eq!(report.stats.entries_resumed, 180);
    assert_eq!(report.stats.writes.inserted, 50);
    assert_eq!(store.record_count().unwrap(), 250);
    assert_eq!(distinct_paths(&store), 250);

    let state = checkpoints.load(chrono::Utc::now()).unwrap();
    assert!(state.checkpoint.is_none());
    assert!(state.completed_roots.is_empty());
    assert!(state.last_completed_at.is_some());

    let events: Vec<_> = read_recent(&fx.config.paths.journal, 10)
        .unwrap()
        .into_iter()
        .map(|entry| entry.event)
        .collect();
    assert_eq!(
        events,
        vec![
            EventType::ScanStarted,
            EventType::ScanPaused,
            EventType::ScanStarted,
            EventType::ScanCompleted,
        ]
    );
}

#[test]
fn early_memory_exhaustion_is_fatal_and_leaves_state_untouched() {
    let fx = Fixture::new();
    flat_tree(&fx.root, 150);
    let mut store = fx.store();
    let checkpoints = fx.checkpoints();

    let mut orchestrator = ScanOrchestrator::from_config(&fx.config)
        .unwrap()
        .with_probe(Box::new(ScriptedProbe::unlimited().memory_exhausted_after(1)));
    let report = orchestrator
        .run_persisted(
            &ScanRequest::interactive(&fx.config),
            &checkpoints,
            &mut store,
            &mut ScanJournal::disabled(),
        )
        .unwrap();
    assert!(matches!(report.outcome, ScanOutcome::Fatal { .. }));
    assert_eq!(store.record_count().unwrap(), 0);
    assert!(checkpoints.load(chrono::Utc::now()).unwrap().checkpoint.is_none());
}

#[test]
fn completed_roots_are_skipped_until_the_cycle_ends() {
    let fx = Fixture::new();
    let second_root = fx.data.join("second");
    fs::create_dir_all(&second_root).unwrap();
    let second_root = fs::canonicalize(&second_root).unwrap();
    flat_tree(&fx.root, 120);
    flat_tree(&second_root, 120);

    let mut config = fx.config.clone();
    config.scanner.root_paths = vec![fx.root.clone(), second_root.clone()];
    let checkpoints = fx.checkpoints();
    let mut store = fx.store();
    let request = ScanRequest::interactive(&config);

    // Budget checks land on entries 0 and 100 of each root; the fourth one,
    // entry 100 of the second root, runs out of time.
    let mut first = ScanOrchestrator::from_config(&config)
        .unwrap()
        .with_probe(Box::new(ScriptedProbe::unlimited().time_exhausted_after(3)));
    let report = first
        .run_persisted(&request, &checkpoints, &mut store, &mut ScanJournal::disabled())
        .unwrap();
    assert!(matches!(report.outcome, ScanOutcome::Paused { ref root, .. } if *root == second_root));
    assert!(report.state.is_root_completed(&fx.root));

    let mut second = ScanOrchestrator::from_config(&config).unwrap();
    let report = second
        .run_persisted(&request, &checkpoints, &mut store, &mut ScanJournal::disabled())
        .unwrap();
    assert_eq!(report.outcome, ScanOutcome::Completed { pending: 240 });
    assert_eq!(report.stats.roots_skipped, 1);
    assert_eq!(store.record_count().unwrap(), 240);
}

#[test]
fn maintenance_operations_shape_the_queue() {
    let fx = Fixture::new();
    for name in ["a.jpg", "b.jpg", "c.jpg"] {
        write_file(&fx.root.join(name), JPEG_HEAD, 4000);
    }
    let mut store = fx.store();
    fx.scan(&mut store);

    let a = store.find_by_path(&fx.stored("a.jpg")).unwrap().unwrap().id;
    let b = store.find_by_path(&fx.stored("b.jpg")).unwrap().unwrap().id;
    store.mark_optimized(a, 3000, true).unwrap();
    store.mark_optimized(b, 3500, false).unwrap();
    store.mark_pending(&[b]).unwrap();

    let page = store.optimized_page(0, 50).unwrap();
    assert_eq!(page.iter().map(|r| r.id).collect::<Vec<_>>(), vec![a]);

    let cleared = store.clear_pending().unwrap();
    assert_eq!(cleared.deleted, 1);
    assert_eq!(cleared.reset, 1);
    assert_eq!(store.count_pending().unwrap(), 0);
    assert_eq!(store.count_optimized().unwrap(), 2);

    assert!(store.remove(a).unwrap());
    assert!(!store.remove(a).unwrap());
    assert_eq!(store.record_count().unwrap(), 1);
}

#[cfg(unix)]
#[test]
fn base_dir_behind_a_symlink_still_yields_relative_paths() {
    let mut fx = Fixture::new();
    let real = fx.data.join("real_site");
    write_file(&real.join("themes/a.jpg"), JPEG_HEAD, 5000);
    let link = fx.data.join("site");
    std::os::unix::fs::symlink(&real, &link).unwrap();

    fx.config.paths.base_dir = Some(link.clone());
    fx.config.scanner.root_paths = vec![link.join("themes")];
    let mut store = fx.store();
    assert_eq!(fx.scan(&mut store), ScanOutcome::Completed { pending: 1 });

    let paths: Vec<String> = store.load_reference().unwrap().into_keys().collect();
    assert_eq!(paths, vec!["themes/a.jpg".to_string()]);
}

#[test]
fn force_never_requeues_files_outside_thresholds() {
    let mut fx = Fixture::new();
    fx.config.thresholds.png_max_size_bytes = 1000;
    write_file(&fx.root.join("big.png"), PNG_HEAD, 900);
    write_file(&fx.root.join("small.jpg"), JPEG_HEAD, 500);
    let mut store = fx.store();
    fx.scan(&mut store);
    for name in ["big.png", "small.jpg"] {
        let id = store.find_by_path(&fx.stored(name)).unwrap().unwrap().id;
        store.mark_optimized(id, 400, false).unwrap();
    }

    write_file(&fx.root.join("big.png"), PNG_HEAD, 2000);
    write_file(&fx.root.join("small.jpg"), JPEG_HEAD, 50);
    write_file(&fx.root.join("new-big.png"), PNG_HEAD, 5000);
    let mut request = ScanRequest::interactive(&fx.config);
    request.force = true;
    let report = ScanOrchestrator::from_config(&fx.config)
        .unwrap()
        .run(&request, ScanState::default(), &mut store)
        .unwrap();

    assert_eq!(report.outcome, ScanOutcome::Completed { pending: 0 });
    assert_eq!(report.stats.writes.inserted, 0);
    assert_eq!(report.stats.writes.reoptimized, 0);
    assert!(store.find_by_path(&fx.stored("new-big.png")).unwrap().is_none());
}
