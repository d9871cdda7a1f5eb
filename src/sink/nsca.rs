//! `send_nsca`-style sink: pipes tab-separated result lines into a program.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use super::{Sink, SinkError, escape_output};
use crate::executor::CancelSource;
use crate::executor::process::{ProcessOutcome, run_with_timeout};
use crate::results::CheckResult;

const SINK_NAME: &str = "nsca";

/// Feeds every batch to one invocation of the configured program.
///
/// Service results are written as `host<TAB>service<TAB>code<TAB>output`,
/// host results as `host<TAB>code<TAB>output`, one per line.
#[derive(Debug)]
pub struct NscaSink {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    // Kept alive for the sink's lifetime; submissions are bounded by `timeout` only.
    never: CancelSource,
}

impl NscaSink {
    /// Sink piping results into `program args...`, killed after `timeout`.
    #[must_use]
    pub fn new(program: impl AsRef<Path>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args,
            timeout,
            never: CancelSource::new(),
        }
    }
}

/// Render one result as a tab-separated line.
#[must_use]
pub fn format_line(result: &CheckResult) -> String {
    let output = escape_output(&result.output);
    match &result.id.service {
        Some(service) => format!(
            "{}\t{service}\t{}\t{output}\n",
            result.id.host,
            result.state.code()
        ),
        None => format!("{}\t{}\t{output}\n", result.id.host, result.state.code()),
    }
}

impl Sink for NscaSink {
    fn name(&self) -> &str {
        SINK_NAME
    }

    fn submit(&mut self, results: &[CheckResult]) -> Result<(), SinkError> {
        if results.is_empty() {
            return Ok(());
        }
        let payload: String = results.iter().map(format_line).collect();
        let mut command = Command::new(&self.program);
        command.args(&self.args);

        match run_with_timeout(command, Some(payload.into_bytes()), self.timeout, &self.never.token()) {
            ProcessOutcome::Exited { status, .. } if status.success() => Ok(()),
            ProcessOutcome::Exited { status, stdout, stderr } => {
                let reason = if stderr.trim().is_empty() { stdout } else { stderr };
                Err(SinkError::transient(
                    SINK_NAME,
                    format!("{} exited with {status}: {}", self.program.display(), reason.trim()),
                ))
            }
            ProcessOutcome::TimedOut { .. } => Err(SinkError::transient(
                SINK_NAME,
                format!("{} timed out after {}s", self.program.display(), self.timeout.as_secs()),
            )),
            ProcessOutcome::Cancelled => Err(SinkError::transient(SINK_NAME, "submission cancelled")),
            ProcessOutcome::Failed(err)
                if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) =>
            {
                Err(SinkError::permanent(
                    SINK_NAME,
                    format!("cannot execute {}: {err}", self.program.display()),
                ))
            }
            ProcessOutcome::Failed(err) => Err(SinkError::transient(
                SINK_NAME,
                format!("cannot execute {}: {err}", self.program.display()),
            )),
        }
    }
}
