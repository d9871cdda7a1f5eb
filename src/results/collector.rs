//! Collector actor: the single owner of the open batch and delivery queue.
//!
//! Check threads only send messages; batching, flushing and sink retries all
//! happen on the collector thread in arrival order.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};

use super::batcher::{CollectorSettings, CollectorStats};
use super::batcher::Batcher;
use crate::core::clock::later;
use crate::core::errors::{MpError, Result};
use crate::results::CheckResult;
use crate::sink::Sink;

/// Drain budget used when every sender vanished without an explicit shutdown.
const ORPHAN_DRAIN: Duration = Duration::from_secs(5);

enum CollectorMsg {
    Result(CheckResult),
    Stats(Sender<CollectorStats>),
    Shutdown {
        deadline: Instant,
        reply: Sender<CollectorStats>,
    },
}

/// Cloneable entry point for check threads.
#[derive(Clone)]
pub struct ResultSubmitter {
    tx: Sender<CollectorMsg>,
}

impl ResultSubmitter {
    /// Hand a result to the collector.
    pub fn submit(&self, result: CheckResult) -> Result<()> {
        self.tx
            .send(CollectorMsg::Result(result))
            .map_err(|_| MpError::ChannelClosed {
                component: "collector",
            })
    }
}

/// Owner handle of the collector thread.
pub struct CollectorHandle {
    tx: Sender<CollectorMsg>,
    thread: Option<JoinHandle<()>>,
}

impl CollectorHandle {
    /// Start the collector thread delivering into `sink`.
    pub fn spawn(settings: CollectorSettings, sink: Box<dyn Sink>) -> Result<Self> {
        let (tx, rx) = unbounded();
        tracing::info!(
            sink = sink.name(),
            batch_mode = settings.batch_mode,
            batch_wait_secs = settings.batch_wait.as_secs(),
            "starting result collector"
        );
        let thread = thread::Builder::new()
            .name("collector".to_string())
            .spawn(move || run_loop(&rx, Batcher::new(settings), sink))
            .map_err(|err| MpError::Runtime {
                details: format!("failed to spawn collector thread: {err}"),
            })?;
        Ok(Self {
            tx,
            thread: Some(thread),
        })
    }

    /// Cloneable sender for check threads.
    #[must_use]
    pub fn submitter(&self) -> ResultSubmitter {
        ResultSubmitter {
            tx: self.tx.clone(),
        }
    }

    /// Hand a result to the collector.
    pub fn submit(&self, result: CheckResult) -> Result<()> {
        self.submitter().submit(result)
    }

    /// Delivery counters so far.
    pub fn stats(&self) -> Result<CollectorStats> {
        let (reply, answer) = crossbeam_channel::bounded(1);
        self.tx
            .send(CollectorMsg::Stats(reply))
            .map_err(|_| closed())?;
        answer.recv().map_err(|_| closed())
    }

    /// Flush everything pending and deliver until `timeout` elapses, then stop.
    pub fn shutdown(mut self, timeout: Duration) -> Result<CollectorStats> {
        let (reply, answer) = crossbeam_channel::bounded(1);
        self.tx
            .send(CollectorMsg::Shutdown {
                deadline: later(Instant::now(), timeout),
                reply,
            })
            .map_err(|_| closed())?;
        let stats = answer.recv().map_err(|_| closed())?;
        if let Some(thread) = self.thread.take() {
            thread.join().map_err(|_| MpError::Runtime {
                details: "collector thread panicked".to_string(),
            })?;
        }
        Ok(stats)
    }
}

const fn closed() -> MpError {
    MpError::ChannelClosed {
        component: "collector",
    }
}

fn run_loop(rx: &Receiver<CollectorMsg>, mut batcher: Batcher, mut sink: Box<dyn Sink>) {
    loop {
        batcher.poll(Instant::now(), sink.as_mut());
        let msg = match batcher.next_deadline() {
            Some(deadline) => rx.recv_deadline(deadline),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match msg {
            Ok(CollectorMsg::Result(result)) => batcher.push(result, Instant::now()),
            Ok(CollectorMsg::Stats(reply)) => {
                let _ = reply.send(batcher.stats());
            }
            Ok(CollectorMsg::Shutdown { deadline, reply }) => {
                let stats = finish(&mut batcher, deadline, sink.as_mut());
                let _ = reply.send(stats);
                return;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                finish(&mut batcher, later(Instant::now(), ORPHAN_DRAIN), sink.as_mut());
                return;
            }
        }
    }
}

fn finish(batcher: &mut Batcher, deadline: Instant, sink: &mut dyn Sink) -> CollectorStats {
    batcher.drain(deadline, sink);
    let stats = batcher.stats();
    tracing::info!(
        submitted = stats.submitted,
        delivered = stats.delivered,
        batches = stats.batches_delivered,
        retries = stats.retries,
        dropped = stats.dropped(),
        "result collector stopped"
    );
    stats
}
