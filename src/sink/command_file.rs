//! Nagios/Icinga external command pipe sink.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use super::{Sink, SinkError, escape_output};
use crate::results::CheckResult;

const SINK_NAME: &str = "command_file";

/// Appends `PROCESS_SERVICE_CHECK_RESULT` / `PROCESS_HOST_CHECK_RESULT`
/// external commands to the backend's command pipe.
///
/// The pipe is reopened for every batch so a restarted backend is picked up
/// without restarting the daemon.
#[derive(Debug, Clone)]
pub struct CommandFileSink {
    path: PathBuf,
}

impl CommandFileSink {
    /// Sink writing to the command pipe at `path`.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

/// Render one result as an external command line.
#[must_use]
pub fn format_command(result: &CheckResult) -> String {
    let timestamp = result.executed_at.timestamp();
    let output = escape_output(&result.output);
    match &result.id.service {
        Some(service) => format!(
            "[{timestamp}] PROCESS_SERVICE_CHECK_RESULT;{};{service};{};{output}\n",
            result.id.host,
            result.state.code()
        ),
        None => format!(
            "[{timestamp}] PROCESS_HOST_CHECK_RESULT;{};{};{output}\n",
            result.id.host,
            result.state.code()
        ),
    }
}

impl Sink for CommandFileSink {
    fn name(&self) -> &str {
        SINK_NAME
    }

    fn submit(&mut self, results: &[CheckResult]) -> Result<(), SinkError> {
        if results.is_empty() {
            return Ok(());
        }
        let mut payload = String::new();
        for result in results {
            payload.push_str(&format_command(result));
        }
        // Never create the file: a missing pipe means the backend is down.
        let mut pipe = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|err| {
                SinkError::from_io(SINK_NAME, &format!("open {}", self.path.display()), &err)
            })?;
        pipe.write_all(payload.as_bytes())
            .and_then(|()| pipe.flush())
            .map_err(|err| {
                SinkError::from_io(SINK_NAME, &format!("write {}", self.path.display()), &err)
            })
    }
}
