//! Check executor: runs one check as an isolated subprocess and turns every
//! possible outcome into a [`CheckResult`]. Nothing escapes as an error.

pub mod cancel;
pub mod process;

use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::Instant;

use chrono::Utc;

use crate::checks::CheckDefinition;
use crate::results::{CheckResult, CheckState};

pub use cancel::{CancelSource, CancelToken};
use process::ProcessOutcome;

/// Output reported when a plugin printed nothing at all.
pub const NO_OUTPUT: &str = "(No output returned from plugin)";

/// A finished run. Cancelled runs carry an UNKNOWN result that callers
/// normally discard instead of reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    /// Result to report.
    pub result: CheckResult,
    /// The run was cancelled; the result must not be reported.
    pub cancelled: bool,
}

/// Runs check command lines through a shell.
#[derive(Debug, Clone)]
pub struct Executor {
    shell: PathBuf,
}

impl Default for Executor {
    fn default() -> Self {
        Self {
            shell: PathBuf::from("/bin/sh"),
        }
    }
}

impl Executor {
    /// Executor running commands through `shell -c`.
    #[must_use]
    pub fn with_shell(shell: impl AsRef<Path>) -> Self {
        Self {
            shell: shell.as_ref().to_path_buf(),
        }
    }

    /// Execute `definition` once, honouring its timeout and `cancel`.
    pub fn run(&self, definition: &CheckDefinition, cancel: &CancelToken) -> Execution {
        let executed_at = Utc::now();
        let started = Instant::now();
        let mut command = Command::new(&self.shell);
        command.arg("-c").arg(&definition.command);

        let outcome = process::run_with_timeout(command, None, definition.timeout, cancel);
        let mut cancelled = false;
        let (state, output) = match outcome {
            ProcessOutcome::Exited {
                status,
                stdout,
                stderr,
            } => interpret_exit(status, &stdout, &stderr),
            ProcessOutcome::TimedOut { stdout } => {
                let mut output = format!(
                    "check timed out after {:.1}s",
                    definition.timeout.as_secs_f64()
                );
                if let Some(line) = stdout.lines().map(str::trim).find(|line| !line.is_empty()) {
                    output.push_str(" (last output: ");
                    output.push_str(line);
                    output.push(')');
                }
                (CheckState::Unknown, output)
            }
            ProcessOutcome::Cancelled => {
                cancelled = true;
                (CheckState::Unknown, "check cancelled during shutdown".to_string())
            }
            ProcessOutcome::Failed(err) => (
                CheckState::Unknown,
                format!("failed to execute `{}`: {err}", definition.command),
            ),
        };

        let result = CheckResult::new(
            definition.id.clone(),
            state,
            output,
            executed_at,
            started.elapsed(),
        );
        tracing::debug!(
            check = %definition.id,
            state = %result.state,
            duration_ms = result.duration_ms,
            cancelled,
            "check finished"
        );
        Execution { result, cancelled }
    }
}

fn interpret_exit(status: ExitStatus, stdout: &str, stderr: &str) -> (CheckState, String) {
    match status.code() {
        Some(code) => (CheckState::from_exit_code(code), pick_output(stdout, stderr)),
        None => (CheckState::Unknown, describe_signal(status)),
    }
}

fn pick_output(stdout: &str, stderr: &str) -> String {
    let stdout = stdout.trim();
    if !stdout.is_empty() {
        return stdout.to_string();
    }
    let stderr = stderr.trim();
    if stderr.is_empty() {
        NO_OUTPUT.to_string()
    } else {
        stderr.to_string()
    }
}

#[cfg(unix)]
fn describe_signal(status: ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map_or_else(
        || format!("check ended abnormally: {status}"),
        |signal| format!("check killed by signal {signal}"),
    )
}

#[cfg(not(unix))]
fn describe_signal(status: ExitStatus) -> String {
    format!("check ended abnormally: {status}")
}

#[cfg(all(test, unix))]
mod tests {
    use super::{Executor, NO_OUTPUT};
    use crate::checks::{CheckDefinition, CheckId};
    use crate::executor::CancelSource;
    use crate::results::CheckState;
    use std::time::Duration;

    fn check(command: &str, timeout: Duration) -> CheckDefinition {
        CheckDefinition {
            id: CheckId::service("localhost", "test"),
            command: command.to_string(),
            interval: Duration::from_secs(60),
            timeout,
        }
    }

    fn run(command: &str) -> super::Execution {
        let source = CancelSource::new();
        Executor::default().run(&check(command, Duration::from_secs(5)), &source.token())
    }

    #[test]
    fn exit_codes_map_to_states() {
        for (code, state) in [
            (0, CheckState::Ok),
            (1, CheckState::Warning),
            (2, CheckState::Critical),
            (3, CheckState::Unknown),
            (42, CheckState::Unknown),
        ] {
            let execution = run(&format!("echo 'status {code}'; exit {code}"));
            assert_eq!(execution.result.state, state, "exit {code}");
            assert_eq!(execution.result.output, format!("status {code}"));
            assert!(!execution.cancelled);
        }
    }

    #[test]
    fn falls_back_to_stderr_then_placeholder() {
        assert_eq!(run("echo oops >&2; exit 2").result.output, "oops");
        assert_eq!(run("exit 0").result.output, NO_OUTPUT);
    }

    #[test]
    fn output_survives_a_backgrounded_grandchild() {
        let execution = run("echo 'OK - fine'; sleep 5 &");
        assert_eq!(execution.result.state, CheckState::Ok);
        assert_eq!(execution.result.output, "OK - fine");
        assert!(execution.result.duration_ms < 1_000, "{}ms", execution.result.duration_ms);
    }

    #[test]
    fn unknown_command_is_unknown_not_a_panic() {
        let execution = run("/nonexistent/check_foo -w 1");
        assert_eq!(execution.result.state, CheckState::Unknown);
        assert!(execution.result.output.contains("check_foo"));
    }

    #[test]
    fn signal_death_is_unknown() {
        let execution = run("kill -TERM $$");
        assert_eq!(execution.result.state, CheckState::Unknown);
        assert!(execution.result.output.contains("signal 15"));
    }

    #[test]
    fn missing_shell_is_reported_as_unknown() {
        let source = CancelSource::new();
        let execution = Executor::with_shell("/nonexistent/sh")
            .run(&check("true", Duration::from_secs(1)), &source.token());
        assert_eq!(execution.result.state, CheckState::Unknown);
        assert!(execution.result.output.starts_with("failed to execute `true`"));
    }

    #[test]
    fn timeout_yields_unknown() {
        let source = CancelSource::new();
        let execution = Executor::default().run(
            &check("echo starting; sleep 10", Duration::from_millis(200)),
            &source.token(),
        );
        assert_eq!(execution.result.state, CheckState::Unknown);
        assert!(execution.result.output.starts_with("check timed out after 0.2s"));
        assert!(execution.result.output.contains("starting"));
        assert!(execution.result.duration_ms < 3_000);
    }

    #[test]
    fn cancelled_runs_are_flagged() {
        let source = CancelSource::new();
        source.cancel();
        let execution = Executor::default().run(
            &check("sleep 10", Duration::from_secs(30)),
            &source.token(),
        );
        assert!(execution.cancelled);
        assert_eq!(execution.result.state, CheckState::Unknown);
    }
}
