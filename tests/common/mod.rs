#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

pub const JPEG_HEAD: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0];
pub const PNG_HEAD: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
pub const GIF_HEAD: &[u8] = b"GIF89a";

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

impl CmdResult {
    /// Parse the last stdout line as JSON.
    pub fn json(&self) -> serde_json::Value {
        let line = self.stdout.lines().last().unwrap_or_default();
        serde_json::from_str(line).unwrap_or_else(|err| {
            panic!(
                "stdout is not JSON ({err}); log: {}",
                self.log_path.display()
            )
        })
    }
}

/// Write a file that starts with `head` and is padded to `size` bytes.
pub fn write_file(path: &Path, head: &[u8], size: usize) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create fixture dir");
    }
    let mut bytes = head.to_vec();
    bytes.resize(size, 0);
    fs::write(path, bytes).expect("write fixture file");
}

/// Config file with every data path inside `dir`.
pub fn write_config(dir: &Path, roots: &[&Path], extra: &str) -> PathBuf {
    let data = dir.join("data");
    let roots: Vec<String> = roots
        .iter()
        .map(|root| format!("{:?}", root.display().to_string()))
        .collect();
    let body = format!(
        "[scanner]\nroot_paths = [{}]\n\n[paths]\nsqlite_db = {:?}\nstate_file = {:?}\njournal = {:?}\n\n{extra}\n",
        roots.join(", "),
        data.join("inventory.sqlite3").display().to_string(),
        data.join("scan-state.json").display().to_string(),
        data.join("scan-journal.jsonl").display().to_string(),
    );
    let path = dir.join("auxinv.toml");
    fs::write(&path, body).expect("write config");
    path
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_auxinv") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "auxinv.exe" } else { "auxinv" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve auxinv binary path for integration test"),
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("auxinv-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env_remove("AUXINV_OUTPUT_FORMAT")
        .env_remove("RUST_LOG")
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute auxinv command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}
