//! Subprocess runner with a hard timeout and explicit cancellation.
//!
//! The child gets its own process group so a timeout or cancellation can kill
//! the whole tree a shell command may have started. The group is also killed
//! once the command itself exits: background children left behind would
//! otherwise hold the output pipes open. Output pipes are drained on helper
//! threads, capped at [`MAX_OUTPUT_BYTES`] each.

use std::io::{self, Read, Write as _};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, bounded, select};

use super::cancel::CancelToken;

/// Bytes of stdout/stderr kept per run; the rest is drained and discarded.
pub const MAX_OUTPUT_BYTES: u64 = 8 * 1024;

/// How long to wait for pipe readers and reaping after the child ended.
const READER_GRACE: Duration = Duration::from_secs(1);

/// How a subprocess run ended.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// The process exited (normally or by signal) before the timeout.
    Exited {
        status: ExitStatus,
        stdout: String,
        stderr: String,
    },
    /// The timeout expired and the process group was killed.
    TimedOut { stdout: String },
    /// The token was cancelled and the process group was killed.
    Cancelled,
    /// The process could not be spawned or waited for.
    Failed(io::Error),
}

enum Ending {
    Exited(io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Run `command` to completion, feeding `stdin` if given.
///
/// Blocks the calling thread for at most `timeout` plus a short reaping grace.
pub fn run_with_timeout(
    mut command: Command,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
    cancel: &CancelToken,
) -> ProcessOutcome {
    command
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    isolate(&mut command);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => return ProcessOutcome::Failed(err),
    };
    let pid = child.id();

    if let (Some(bytes), Some(mut pipe)) = (stdin, child.stdin.take()) {
        thread::spawn(move || {
            // A child that exits without reading stdin yields EPIPE here.
            let _ = pipe.write_all(&bytes);
        });
    }
    let stdout = child.stdout.take().map(spawn_reader);
    let stderr = child.stderr.take().map(spawn_reader);

    let (status_tx, status_rx) = bounded(1);
    thread::spawn(move || {
        let _ = status_tx.send(child.wait());
    });

    let ending = select! {
        recv(status_rx) -> status => Ending::Exited(
            status.unwrap_or_else(|_| Err(io::Error::other("wait thread vanished"))),
        ),
        recv(cancel.channel()) -> _ => Ending::Cancelled,
        default(timeout) => Ending::TimedOut,
    };

    match ending {
        Ending::Exited(Ok(status)) => {
            kill_group(pid);
            ProcessOutcome::Exited {
                status,
                stdout: collect(stdout),
                stderr: collect(stderr),
            }
        }
        Ending::Exited(Err(err)) => {
            kill_group(pid);
            ProcessOutcome::Failed(err)
        }
        Ending::TimedOut => {
            kill_group(pid);
            let _ = status_rx.recv_timeout(READER_GRACE);
            ProcessOutcome::TimedOut {
                stdout: collect(stdout),
            }
        }
        Ending::Cancelled => {
            kill_group(pid);
            let _ = status_rx.recv_timeout(READER_GRACE);
            ProcessOutcome::Cancelled
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> Receiver<String> {
    let (tx, rx) = bounded(1);
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.by_ref().take(MAX_OUTPUT_BYTES).read_to_end(&mut buf);
        let _ = io::copy(&mut pipe, &mut io::sink());
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    rx
}

fn collect(reader: Option<Receiver<String>>) -> String {
    // A grandchild that left the process group may keep the pipe open; give up after the grace.
    reader
        .and_then(|rx| rx.recv_timeout(READER_GRACE).ok())
        .unwrap_or_default()
}

#[cfg(unix)]
fn isolate(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn isolate(_command: &mut Command) {}

#[cfg(unix)]
fn kill_group(pid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(err) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        tracing::debug!(pid, error = %err, "process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_group(pid: u32) {
    tracing::warn!(pid, "cannot kill process group on this platform");
}
