//! Scheduler actor.
//!
//! One thread owns the [`ScheduleQueue`]. It wakes at the next fire time or
//! when a message arrives (completion, reload, status, shutdown), dispatches
//! due runs through a [`Launcher`] and never blocks on a check itself.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};

use super::queue::{Dispatch, ReloadSummary, ScheduleQueue};
use crate::checks::{CheckId, CheckSet};
use crate::core::clock::later;
use crate::core::config::SchedulerConfig;
use crate::core::errors::{MpError, Result};

/// How long to wait for killed runs to report back after [`Launcher::abort`].
const ABORT_WAIT: Duration = Duration::from_secs(3);

/// Starts runs handed out by the scheduler.
///
/// `launch` must not block. The run reports back by dropping (or
/// [`Completion::finish`]ing) the completion it was given; a completion that
/// is dropped without running counts as an immediate completion.
pub trait Launcher: Send + 'static {
    /// Start the run described by `dispatch`.
    fn launch(&mut self, dispatch: Dispatch, completion: Completion);

    /// Kill every run still in flight. Called once, at the end of the grace period.
    fn abort(&mut self);
}

/// Notifies the scheduler that a run ended, on drop.
#[derive(Debug)]
pub struct Completion {
    id: CheckId,
    tx: Option<Sender<SchedulerMsg>>,
}

impl Completion {
    /// Check whose run this completion reports.
    #[must_use]
    pub const fn id(&self) -> &CheckId {
        &self.id
    }

    /// Report the run as finished now.
    pub fn finish(self) {
        drop(self);
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(SchedulerMsg::Completed {
                id: self.id.clone(),
                finished_at: Instant::now(),
            });
        }
    }
}

/// Scheduler tuning taken from `[scheduler]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Upper bound of the random delay before a check's first run.
    pub jitter: Duration,
}

impl SchedulerSettings {
    /// Settings from the `[scheduler]` section.
    #[must_use]
    pub const fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            jitter: config.jitter_range(),
        }
    }
}

/// Snapshot of the scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStatus {
    /// Checks in the schedule.
    pub scheduled: usize,
    /// Runs in flight.
    pub running: usize,
    /// Earliest pending fire time.
    pub next_deadline: Option<Instant>,
}

/// What happened to the runs during shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Scheduled runs that never started.
    pub cancelled_pending: usize,
    /// Runs in flight when shutdown began.
    pub in_flight: usize,
    /// In-flight runs that ended within the grace period.
    pub finished_in_grace: usize,
    /// Runs still in flight after the grace period, killed.
    pub aborted: usize,
    /// Runs that did not even report back after being killed.
    pub abandoned: usize,
}

#[derive(Debug)]
enum SchedulerMsg {
    Completed {
        id: CheckId,
        finished_at: Instant,
    },
    Reload {
        checks: Arc<CheckSet>,
        reply: Sender<ReloadSummary>,
    },
    Status {
        reply: Sender<SchedulerStatus>,
    },
    Shutdown {
        grace: Duration,
        reply: Sender<ShutdownReport>,
    },
}

/// Owner handle of the scheduler thread.
pub struct SchedulerHandle {
    tx: Sender<SchedulerMsg>,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Schedule `checks` (first runs jittered) and start dispatching them.
    pub fn spawn<L: Launcher>(
        checks: Arc<CheckSet>,
        settings: SchedulerSettings,
        launcher: L,
    ) -> Result<Self> {
        let (tx, rx) = unbounded();
        let loop_tx = tx.clone();
        tracing::info!(
            checks = checks.len(),
            jitter_secs = settings.jitter.as_secs(),
            "starting scheduler"
        );
        let thread = thread::Builder::new()
            .name("scheduler".to_string())
            .spawn(move || {
                let mut actor = Actor {
                    queue: ScheduleQueue::new(),
                    launcher,
                    settings,
                    tx: loop_tx,
                };
                actor
                    .queue
                    .schedule_initial(&checks, settings.jitter, Instant::now(), &mut rand::rng());
                actor.run(&rx);
            })
            .map_err(|err| MpError::Runtime {
                details: format!("failed to spawn scheduler thread: {err}"),
            })?;
        Ok(Self {
            tx,
            thread: Some(thread),
        })
    }

    /// Swap in a new check set; see [`ScheduleQueue::reload`].
    pub fn reload(&self, checks: Arc<CheckSet>) -> Result<ReloadSummary> {
        let (reply, answer) = crossbeam_channel::bounded(1);
        self.send(SchedulerMsg::Reload { checks, reply })?;
        answer.recv().map_err(|_| closed())
    }

    /// Current queue size, running count and next fire time.
    pub fn status(&self) -> Result<SchedulerStatus> {
        let (reply, answer) = crossbeam_channel::bounded(1);
        self.send(SchedulerMsg::Status { reply })?;
        answer.recv().map_err(|_| closed())
    }

    /// Stop scheduling, give in-flight runs `grace` to finish, kill the rest.
    pub fn shutdown(mut self, grace: Duration) -> Result<ShutdownReport> {
        let (reply, answer) = crossbeam_channel::bounded(1);
        self.send(SchedulerMsg::Shutdown { grace, reply })?;
        let report = answer.recv().map_err(|_| closed())?;
        if let Some(thread) = self.thread.take() {
            thread.join().map_err(|_| MpError::Runtime {
                details: "scheduler thread panicked".to_string(),
            })?;
        }
        Ok(report)
    }

    fn send(&self, msg: SchedulerMsg) -> Result<()> {
        self.tx.send(msg).map_err(|_| closed())
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let (reply, _answer) = crossbeam_channel::bounded(1);
            if self
                .tx
                .send(SchedulerMsg::Shutdown {
                    grace: Duration::ZERO,
                    reply,
                })
                .is_ok()
            {
                let _ = thread.join();
            }
        }
    }
}

const fn closed() -> MpError {
    MpError::ChannelClosed {
        component: "scheduler",
    }
}

struct Actor<L> {
    queue: ScheduleQueue,
    launcher: L,
    settings: SchedulerSettings,
    tx: Sender<SchedulerMsg>,
}

impl<L: Launcher> Actor<L> {
    fn run(&mut self, rx: &Receiver<SchedulerMsg>) {
        loop {
            self.dispatch_due(Instant::now());
            let msg = match self.queue.next_deadline() {
                Some(deadline) => rx.recv_deadline(deadline),
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match msg {
                Ok(SchedulerMsg::Completed { id, finished_at }) => {
                    self.queue.complete(&id, finished_at);
                }
                Ok(SchedulerMsg::Reload { checks, reply }) => {
                    let summary = self.queue.reload(
                        &checks,
                        self.settings.jitter,
                        Instant::now(),
                        &mut rand::rng(),
                    );
                    tracing::info!(
                        added = summary.added,
                        removed = summary.removed,
                        changed = summary.changed,
                        unchanged = summary.unchanged,
                        "schedule reloaded"
                    );
                    let _ = reply.send(summary);
                }
                Ok(SchedulerMsg::Status { reply }) => {
                    let _ = reply.send(self.status());
                }
                Ok(SchedulerMsg::Shutdown { grace, reply }) => {
                    let _ = reply.send(self.shutdown(rx, grace));
                    return;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    fn dispatch_due(&mut self, now: Instant) {
        for dispatch in self.queue.tick(now) {
            let id = dispatch.definition.id.clone();
            tracing::debug!(
                check = %id,
                late_ms = u64::try_from(now.saturating_duration_since(dispatch.scheduled_for).as_millis())
                    .unwrap_or(u64::MAX),
                "dispatching check"
            );
            let completion = Completion {
                id,
                tx: Some(self.tx.clone()),
            };
            self.launcher.launch(dispatch, completion);
        }
    }

    fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            scheduled: self.queue.len(),
            running: self.queue.running(),
            next_deadline: self.queue.next_deadline(),
        }
    }

    fn shutdown(&mut self, rx: &Receiver<SchedulerMsg>, grace: Duration) -> ShutdownReport {
        let mut report = ShutdownReport {
            cancelled_pending: self.queue.cancel_pending(),
            in_flight: self.queue.running(),
            ..ShutdownReport::default()
        };
        tracing::info!(
            cancelled = report.cancelled_pending,
            in_flight = report.in_flight,
            grace_secs = grace.as_secs_f64(),
            "scheduler shutting down"
        );
        report.finished_in_grace = self.wait_for_runs(rx, later(Instant::now(), grace));

        report.aborted = self.queue.running();
        if report.aborted > 0 {
            tracing::warn!(runs = report.aborted, "grace period expired, killing checks");
            self.launcher.abort();
            self.wait_for_runs(rx, later(Instant::now(), ABORT_WAIT));
        }
        report.abandoned = self.queue.running();
        if report.abandoned > 0 {
            tracing::error!(runs = report.abandoned, "checks did not exit after kill");
        }
        report
    }

    /// Process completions until nothing runs or `deadline` passes.
    fn wait_for_runs(&mut self, rx: &Receiver<SchedulerMsg>, deadline: Instant) -> usize {
        let mut finished = 0;
        while self.queue.running() > 0 {
            match rx.recv_deadline(deadline) {
                Ok(SchedulerMsg::Completed { id, finished_at }) => {
                    if self.queue.complete(&id, finished_at) {
                        finished += 1;
                    }
                }
                Ok(SchedulerMsg::Status { reply }) => {
                    let _ = reply.send(self.status());
                }
                // Reload requests during shutdown are refused by dropping the reply.
                Ok(SchedulerMsg::Reload { .. } | SchedulerMsg::Shutdown { .. }) => {}
                Err(_) => break,
            }
        }
        finished
    }
}
