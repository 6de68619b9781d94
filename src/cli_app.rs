//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use chrono::Utc;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use aux_inventory::core::config::Config;
use aux_inventory::core::errors::AuxError;
use aux_inventory::core::paths::{decode_record_path, resolve_absolute_path};
use aux_inventory::logger::jsonl::{
    EventType, JournalConfig, LogEntry, ScanJournal, Severity, read_recent,
};
use aux_inventory::scanner::orchestrator::{ScanOrchestrator, ScanOutcome, ScanReport, ScanRequest};
use aux_inventory::store::checkpoint::CheckpointStore;
use aux_inventory::store::record::{FileRecord, RecordStore};
use aux_inventory::store::sqlite::SqliteRecordStore;

/// Records shown per `list` page.
const PAGE_SIZE: u32 = 50;

/// auxinv: resumable inventory of optimizable images and documents.
#[derive(Debug, Parser)]
#[command(
    name = "auxinv",
    author,
    version,
    about = "Resumable scanner that keeps an inventory of optimizable files",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Scan roots and queue new or changed files.
    Scan(ScanArgs),
    /// Show queue counts and scan progress.
    Status,
    /// List optimized records, newest first.
    List(ListArgs),
    /// Delete one record by id.
    Remove(RemoveArgs),
    /// Drop queued work: delete never-optimized pending records, un-queue the rest.
    ClearPending,
    /// Forget scan progress (checkpoint and completed roots).
    Reset,
    /// View configuration state.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct ScanArgs {
    /// Roots to scan instead of `scanner.root_paths`.
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,
    /// Queue known files again even when their size is unchanged.
    #[arg(long)]
    force: bool,
    /// Pause after this many seconds (0 disables the limit).
    #[arg(long, value_name = "SECONDS", conflicts_with = "background")]
    time_limit: Option<u64>,
    /// Start a new cycle, discarding completed roots and checkpoint.
    #[arg(long)]
    fresh: bool,
    /// Unconstrained scan that also covers recent dated upload folders.
    #[arg(long)]
    background: bool,
}

#[derive(Debug, Clone, Args, Serialize)]
struct ListArgs {
    /// Page number, starting at 1.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    page: u32,
}

#[derive(Debug, Clone, Args, Serialize)]
struct RemoveArgs {
    /// Record id.
    id: i64,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand, Serialize)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// Operation stopped early and should be retried.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<AuxError> for CliError {
    fn from(err: AuxError) -> Self {
        match err {
            AuxError::InvalidConfig { .. }
            | AuxError::MissingConfig { .. }
            | AuxError::ConfigParse { .. } => Self::User(err.to_string()),
            other => Self::Runtime(other.to_string()),
        }
    }
}

/// Install the stderr `tracing` subscriber. `RUST_LOG` wins over the flags.
pub fn init_tracing(cli: &Cli) {
    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(!cli.no_color && io::stderr().is_terminal())
        .with_target(false)
        .try_init();
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Scan(args) => run_scan(cli, args),
        Command::Status => run_status(cli),
        Command::List(args) => run_list(cli, args),
        Command::Remove(args) => run_remove(cli, args),
        Command::ClearPending => run_clear_pending(cli),
        Command::Reset => run_reset(cli),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ──────────────────── scan ────────────────────

fn run_scan(cli: &Cli, args: &ScanArgs) -> Result<(), CliError> {
    let mut config = load_config(cli)?;
    if !args.paths.is_empty() {
        config.scanner.root_paths.clone_from(&args.paths);
    }

    let mut request = if args.background {
        ScanRequest::background(&config, chrono::Local::now().date_naive())
    } else {
        ScanRequest::interactive(&config)
    };
    if let Some(secs) = args.time_limit {
        request.time_limit = (secs > 0).then(|| std::time::Duration::from_secs(secs));
    }
    request.force = args.force;
    request.fresh = args.fresh;

    if request.roots.is_empty() {
        return Err(CliError::User(
            "no scan roots: pass PATH arguments or set scanner.root_paths".to_string(),
        ));
    }

    if let Ok(hash) = config.stable_hash() {
        debug!(config_hash = %hash, roots = request.roots.len(), "starting scan");
    }

    let mut store = open_store(&config)?;
    let checkpoints = CheckpointStore::new(config.paths.state_file.clone());
    let mut journal = open_journal(&config);
    let mut orchestrator = ScanOrchestrator::from_config(&config)?;
    let report = orchestrator.run_persisted(&request, &checkpoints, &mut store, &mut journal)?;

    match output_mode(cli) {
        OutputMode::Human => print_scan_report(&report),
        OutputMode::Json => {
            let payload = json!({
                "command": "scan",
                "outcome": serde_json::to_value(&report.outcome)?,
                "stats": serde_json::to_value(report.stats)?,
            });
            write_json_line(&payload)?;
        }
    }

    match &report.outcome {
        ScanOutcome::Completed { .. } => Ok(()),
        ScanOutcome::Paused { reason, .. } => Err(CliError::Partial(format!(
            "scan paused ({reason}); run `auxinv scan` again to continue"
        ))),
        ScanOutcome::Fatal { reason } => Err(CliError::Runtime(reason.to_error().to_string())),
    }
}

fn print_scan_report(report: &ScanReport) {
    let stats = &report.stats;
    match &report.outcome {
        ScanOutcome::Completed { pending } => {
            println!("{} {pending} file(s) pending optimization", "Scan complete.".green());
        }
        ScanOutcome::Paused {
            reason,
            root,
            files_visited,
        } => {
            println!(
                "{} {reason} in {} after {files_visited} entries",
                "Scan paused:".yellow(),
                root.display()
            );
        }
        ScanOutcome::Fatal { reason } => {
            println!("{} {}", "Scan aborted:".red(), reason.to_error());
        }
    }
    println!(
        "  Roots: {} scanned, {} already complete",
        stats.roots_scanned, stats.roots_skipped
    );
    println!(
        "  Entries: {} visited, {} skipped to resume; files: {} examined, {} left alone",
        stats.entries_visited, stats.entries_resumed, stats.files_examined, stats.files_skipped
    );
    println!(
        "  Queued: {} new, {} changed",
        stats.writes.inserted, stats.writes.reoptimized
    );
    if stats.reference_degraded {
        println!("  Note: low memory, records were looked up one at a time");
    }
    println!("  Took: {} ms", stats.duration_ms);
}

// ──────────────────── status ────────────────────

fn run_status(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let store = open_store(&config)?;
    let state = CheckpointStore::new(config.paths.state_file.clone()).load(Utc::now())?;
    let pending = store.count_pending()?;
    let optimized = store.count_optimized()?;
    let total = store.record_count()?;
    let last_event = read_recent(&config.paths.journal, 1)?.pop();

    match output_mode(cli) {
        OutputMode::Human => {
            println!("auxinv v{}", env!("CARGO_PKG_VERSION"));
            println!("  Database: {}", config.paths.sqlite_db.display());
            println!("  Records: {total} total, {pending} pending, {optimized} optimized");
            match &state.checkpoint {
                Some(checkpoint) => println!(
                    "  Checkpoint: {} at entry {} (expires {})",
                    checkpoint.root.display(),
                    checkpoint.files_visited,
                    checkpoint.expires_at.to_rfc3339()
                ),
                None => println!("  Checkpoint: none"),
            }
            println!("  Completed roots this cycle: {}", state.completed_roots.len());
            for root in &state.completed_roots {
                println!("    {}", root.display());
            }
            match state.last_completed_at {
                Some(at) => println!("  Last full scan: {}", at.to_rfc3339()),
                None => println!("  Last full scan: never"),
            }
            if let Some(entry) = &last_event {
                println!("  Last journal event: {:?} at {}", entry.event, entry.ts);
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "status",
                "records": {
                    "total": total,
                    "pending": pending,
                    "optimized": optimized,
                },
                "state": serde_json::to_value(&state)?,
                "last_event": serde_json::to_value(&last_event)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ──────────────────── list / remove / clear-pending / reset ────────────────────

fn run_list(cli: &Cli, args: &ListArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let store = open_store(&config)?;
    let optimized = store.count_optimized()?;
    let records = store.optimized_page(args.page - 1, PAGE_SIZE)?;
    let pages = optimized.div_ceil(u64::from(PAGE_SIZE));
    let base_dir = config.paths.base_dir.as_deref().map(resolve_absolute_path);
    let locate = |record: &FileRecord| decode_record_path(&record.path, base_dir.as_deref());

    match output_mode(cli) {
        OutputMode::Human => {
            if records.is_empty() {
                println!("No optimized records on page {} of {pages}.", args.page);
                return Ok(());
            }
            println!(
                "  {:>8}  {:>10}  {:>10}  {:>7}  {:<6}  Path",
                "Id", "Original", "Current", "Saved", "Backup"
            );
            println!("  {}", "-".repeat(60));
            for record in &records {
                println!(
                    "  {:>8}  {:>10}  {:>10}  {:>6.1}%  {:<6}  {}",
                    record.id,
                    format_bytes(record.original_size),
                    format_bytes(record.current_size),
                    savings_pct(record),
                    if record.has_backup { "yes" } else { "no" },
                    locate(record).display()
                );
            }
            println!("\nPage {} of {pages} ({optimized} optimized).", args.page);
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "list",
                "page": args.page,
                "pages": pages,
                "total": optimized,
                "records": serde_json::to_value(&records)?,
                "locations": records
                    .iter()
                    .map(|record| locate(record).to_string_lossy().into_owned())
                    .collect::<Vec<_>>(),
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_remove(cli: &Cli, args: &RemoveArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let mut store = open_store(&config)?;
    if !store.remove(args.id)? {
        return Err(CliError::User(format!("no record with id {}", args.id)));
    }

    let mut entry = LogEntry::new(EventType::RecordRemoved, Severity::Info);
    entry.details = Some(format!("id={}", args.id));
    open_journal(&config).write_entry(&entry);

    emit_done(cli, "remove", json!({ "id": args.id }), &format!("Removed record {}.", args.id))
}

fn run_clear_pending(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let mut store = open_store(&config)?;
    let outcome = store.clear_pending()?;

    let mut entry = LogEntry::new(EventType::PendingCleared, Severity::Info);
    entry.details = Some(format!("deleted={} reset={}", outcome.deleted, outcome.reset));
    open_journal(&config).write_entry(&entry);

    emit_done(
        cli,
        "clear-pending",
        serde_json::to_value(outcome)?,
        &format!(
            "Removed {} queued record(s), un-queued {} previously optimized record(s).",
            outcome.deleted, outcome.reset
        ),
    )
}

fn run_reset(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    CheckpointStore::new(config.paths.state_file.clone()).clear()?;
    open_journal(&config).write_entry(&LogEntry::new(EventType::StateReset, Severity::Info));

    emit_done(
        cli,
        "reset",
        json!({ "state_file": config.paths.state_file.to_string_lossy() }),
        "Scan progress cleared; the next scan starts a new cycle.",
    )
}

fn emit_done(cli: &Cli, command: &str, details: Value, message: &str) -> Result<(), CliError> {
    match output_mode(cli) {
        OutputMode::Human => println!("{message}"),
        OutputMode::Json => {
            let payload = json!({
                "command": command,
                "ok": true,
                "details": details,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = load_config(cli)?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Internal(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let value = serde_json::to_value(&config)?;
                    let payload = json!({
                        "command": "config show",
                        "config": value,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("Configuration is INVALID: {e}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ──────────────────── helpers ────────────────────

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    Ok(Config::load(cli.config.as_deref())?)
}

fn open_store(config: &Config) -> Result<SqliteRecordStore, CliError> {
    Ok(SqliteRecordStore::open(&config.paths.sqlite_db)?)
}

fn open_journal(config: &Config) -> ScanJournal {
    ScanJournal::open(JournalConfig::new(config.paths.journal.clone()))
}

#[allow(clippy::cast_precision_loss)]
fn savings_pct(record: &FileRecord) -> f64 {
    if record.original_size == 0 || record.current_size >= record.original_size {
        return 0.0;
    }
    (record.original_size - record.current_size) as f64 * 100.0 / record.original_size as f64
}

#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;

    if bytes >= GIB {
        format!("{:.1} GB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("AUXINV_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_before_and_after_subcommand() {
        let before = Cli::try_parse_from([
            "auxinv",
            "--config",
            "/tmp/auxinv.toml",
            "--json",
            "--no-color",
            "-v",
            "status",
        ]);
        assert!(before.is_ok());

        let after = Cli::try_parse_from(["auxinv", "status", "--json", "--no-color", "-v"]);
        assert!(after.is_ok());
    }

    #[test]
    fn parses_all_subcommands() {
        let cases = [
            vec!["auxinv", "scan"],
            vec!["auxinv", "scan", "/srv/a", "/srv/b", "--force", "--fresh"],
            vec!["auxinv", "scan", "--time-limit", "30"],
            vec!["auxinv", "scan", "--background"],
            vec!["auxinv", "status"],
            vec!["auxinv", "list", "--page", "3"],
            vec!["auxinv", "remove", "42"],
            vec!["auxinv", "clear-pending"],
            vec!["auxinv", "reset"],
            vec!["auxinv", "config", "path"],
            vec!["auxinv", "config", "show"],
            vec!["auxinv", "config", "validate"],
        ];

        for case in cases {
            let parsed = Cli::try_parse_from(case.clone());
            assert!(parsed.is_ok(), "failed to parse case: {case:?}");
        }
    }

    #[test]
    fn rejects_conflicting_or_invalid_arguments() {
        assert!(
            Cli::try_parse_from(["auxinv", "scan", "--background", "--time-limit", "5"]).is_err()
        );
        assert!(Cli::try_parse_from(["auxinv", "list", "--page", "0"]).is_err());
        assert!(Cli::try_parse_from(["auxinv", "remove"]).is_err());
        assert!(Cli::try_parse_from(["auxinv", "status", "-v", "-q"]).is_err());
    }

    #[test]
    fn completions_support_bash_zsh_and_fish() {
        for shell in ["bash", "zsh", "fish"] {
            let parsed = Cli::try_parse_from(["auxinv", "completions", shell]);
            assert!(parsed.is_ok(), "failed shell parse for {shell}");
        }
    }

    #[test]
    fn output_mode_resolution_honors_precedence() {
        assert_eq!(
            resolve_output_mode(true, Some("human"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("json"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("human"), false),
            OutputMode::Human
        );
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("auto"), true), OutputMode::Human);
    }

    #[test]
    fn exit_codes_follow_contract() {
        assert_eq!(CliError::User(String::new()).exit_code(), 1);
        assert_eq!(CliError::Runtime(String::new()).exit_code(), 2);
        assert_eq!(CliError::Partial(String::new()).exit_code(), 4);
    }

    #[test]
    fn config_errors_map_to_user_errors() {
        let err: CliError = AuxError::InvalidConfig {
            details: "bad".to_string(),
        }
        .into();
        assert_eq!(err.exit_code(), 1);
        let err: CliError = AuxError::Sql {
            context: "rusqlite",
            details: "locked".to_string(),
        }
        .into();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn savings_handles_growth_and_zero() {
        let mut record = FileRecord {
            id: 1,
            path: "a.jpg".to_string(),
            original_size: 1000,
            current_size: 750,
            pending: false,
            has_backup: true,
            updated_at: None,
        };
        assert!((savings_pct(&record) - 25.0).abs() < f64::EPSILON);
        record.current_size = 1200;
        assert!(savings_pct(&record).abs() < f64::EPSILON);
    }
}
