//! Shared helpers for integration tests: run the `massive-passive` binary
//! and keep one log file per case under the target tmp dir.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

pub struct CliResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

pub fn binary() -> &'static str {
    env!("CARGO_BIN_EXE_massive-passive")
}

pub fn log_dir() -> PathBuf {
    let dir = Path::new(env!("CARGO_TARGET_TMPDIR")).join("cli-cases");
    fs::create_dir_all(&dir).expect("create log dir");
    dir
}

pub fn run_cli_case(case: &str, args: &[&str]) -> CliResult {
    let output = Command::new(binary())
        .args(args)
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1")
        .stdin(Stdio::null())
        .output()
        .expect("run massive-passive");
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    let log_path = log_dir().join(format!("{case}.log"));
    let log = format!(
        "args: {args:?}\nstatus: {}\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}\n",
        output.status
    );
    fs::write(&log_path, log).expect("write case log");

    CliResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// A throwaway configuration: check directory, jsonl sink and pid file all
/// live inside one temporary directory.
pub struct Fixture {
    pub root: tempfile::TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        fs::create_dir(root.path().join("checks.d")).expect("check dir");
        let fixture = Self { root };
        let config = format!(
            r#"[paths]
check_dir = "{}"
pid_file = "{}"

[scheduler]
initial_random_wait_range_secs = 0
shutdown_grace_secs = 2

[sink]
kind = "jsonl"
path = "{}"
"#,
            fixture.check_dir().display(),
            fixture.pid_file().display(),
            fixture.results_file().display(),
        );
        fs::write(fixture.config_file(), config).expect("write config");
        fixture
    }

    pub fn check_dir(&self) -> PathBuf {
        self.root.path().join("checks.d")
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.path().join("massive-passive.toml")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.root.path().join("massive-passive.pid")
    }

    pub fn results_file(&self) -> PathBuf {
        self.root.path().join("results.jsonl")
    }

    pub fn write_checks(&self, name: &str, body: &str) {
        fs::write(self.check_dir().join(name), body).expect("write checks");
    }

    /// Delivered results, one JSON object per line.
    pub fn results(&self) -> Vec<serde_json::Value> {
        fs::read_to_string(self.results_file())
            .unwrap_or_default()
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect()
    }
}

/// Three valid checks and one entry without a command.
pub const WEB_CHECKS: &str = r#"
host = "web01"

[[check]]
service = "disk"
command = "echo disk ok"
interval = 60

[[check]]
service = "load"
command = "echo load high; exit 1"
interval = 60

[[check]]
service = "broken"
interval = 60
"#;

pub const CRIT_CHECK: &str = r#"
[[check]]
host = "web01"
service = "crit"
command = "echo db unreachable; exit 2"
interval = 60
"#;
