//! Batching and delivery state machine behind the collector actor.
//!
//! Time is passed in explicitly; the actor supplies `Instant::now()` and the
//! tests supply a synthetic clock.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::core::clock::later;
use crate::core::config::{BatchConfig, DeliveryConfig};
use crate::results::CheckResult;
use crate::sink::{Sink, SinkError};

/// Collector behaviour derived from `[batch]` and `[delivery]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorSettings {
    /// Buffer results into batches instead of sending each at once.
    pub batch_mode: bool,
    /// Longest time the open batch stays open.
    pub batch_wait: Duration,
    /// Results that close the open batch early.
    pub batch_max_size: usize,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Cap of the doubling retry delay.
    pub max_backoff: Duration,
    /// Attempts per batch before it is dropped; zero retries forever.
    pub max_attempts: u32,
    /// Queued results beyond which the oldest batches are dropped.
    pub max_buffered_results: usize,
}

impl CollectorSettings {
    /// Settings from the `[batch]` and `[delivery]` sections.
    #[must_use]
    pub fn from_config(batch: &BatchConfig, delivery: &DeliveryConfig) -> Self {
        Self {
            batch_mode: batch.enabled,
            batch_wait: Duration::from_secs(batch.wait_time_secs),
            batch_max_size: batch.max_size,
            initial_backoff: Duration::from_millis(delivery.initial_backoff_ms),
            max_backoff: Duration::from_millis(delivery.max_backoff_ms),
            max_attempts: delivery.max_attempts,
            max_buffered_results: delivery.max_buffered_results,
        }
    }

    /// Delay before retry number `attempt` (0-indexed): `initial * 2^attempt`, capped.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(multiplier)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self::from_config(&BatchConfig::default(), &DeliveryConfig::default())
    }
}

/// Delivery counters, logged at shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectorStats {
    /// Results received.
    pub submitted: u64,
    /// Results accepted by the sink.
    pub delivered: u64,
    /// Batches accepted by the sink.
    pub batches_delivered: u64,
    /// Transient failures that were retried.
    pub retries: u64,
    /// Results dropped after a permanent sink error.
    pub dropped_permanent: u64,
    /// Results dropped after running out of attempts.
    pub dropped_exhausted: u64,
    /// Results dropped to make room in a full queue.
    pub dropped_overflow: u64,
    /// Results still pending when shutdown gave up.
    pub lost_at_shutdown: u64,
}

impl CollectorStats {
    /// Every result that will never be delivered.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped_permanent + self.dropped_exhausted + self.dropped_overflow + self.lost_at_shutdown
    }
}

#[derive(Debug)]
struct Batch {
    results: Vec<CheckResult>,
    attempts: u32,
}

/// Open batch plus FIFO queue of flushed batches awaiting delivery.
#[derive(Debug)]
pub struct Batcher {
    settings: CollectorSettings,
    open: Vec<CheckResult>,
    flush_at: Option<Instant>,
    queue: VecDeque<Batch>,
    retry_at: Option<Instant>,
    stats: CollectorStats,
}

impl Batcher {
    /// Empty batcher.
    #[must_use]
    pub fn new(settings: CollectorSettings) -> Self {
        Self {
            settings,
            open: Vec::new(),
            flush_at: None,
            queue: VecDeque::new(),
            retry_at: None,
            stats: CollectorStats::default(),
        }
    }

    /// Accept one result in completion order.
    pub fn push(&mut self, result: CheckResult, now: Instant) {
        self.stats.submitted += 1;
        if !self.settings.batch_mode {
            self.enqueue(vec![result]);
            return;
        }
        self.open.push(result);
        // Armed by the first result after a flush, never pushed back by later ones.
        if self.flush_at.is_none() {
            self.flush_at = Some(later(now, self.settings.batch_wait));
        }
        if self.open.len() >= self.settings.batch_max_size {
            self.flush();
        }
    }

    /// Move the open batch to the delivery queue.
    pub fn flush(&mut self) {
        self.flush_at = None;
        if self.open.is_empty() {
            return;
        }
        let results = std::mem::take(&mut self.open);
        self.enqueue(results);
    }

    /// Flush a due batch and deliver whatever the backoff allows.
    pub fn poll(&mut self, now: Instant, sink: &mut dyn Sink) {
        if self.flush_at.is_some_and(|at| at <= now) {
            self.flush();
        }
        self.deliver(now, sink);
    }

    /// When the actor must wake up next.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        let retry = if self.queue.is_empty() { None } else { self.retry_at };
        match (self.flush_at, retry) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Results waiting in the open batch and the delivery queue.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.open.len() + self.queued_results()
    }

    /// Counters so far.
    #[must_use]
    pub const fn stats(&self) -> CollectorStats {
        self.stats
    }

    /// Final delivery pass: flush, then keep delivering (sleeping through
    /// backoff) until the queue is empty or `deadline` passes. Whatever is
    /// left is counted as lost.
    pub fn drain(&mut self, deadline: Instant, sink: &mut dyn Sink) {
        self.flush();
        self.retry_at = None;
        while !self.queue.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            self.deliver(now, sink);
            if let Some(retry_at) = self.retry_at {
                if retry_at >= deadline {
                    break;
                }
                std::thread::sleep(retry_at.saturating_duration_since(Instant::now()));
            }
        }
        let lost = self.queued_results();
        if lost > 0 {
            tracing::error!(results = lost, sink = sink.name(), "undelivered results lost at shutdown");
            self.stats.lost_at_shutdown += lost as u64;
            self.queue.clear();
        }
    }

    fn enqueue(&mut self, results: Vec<CheckResult>) {
        self.queue.push_back(Batch {
            results,
            attempts: 0,
        });
        // Oldest-drop: whole batches, never split.
        while self.queued_results() > self.settings.max_buffered_results && self.queue.len() > 1 {
            if let Some(dropped) = self.queue.pop_front() {
                self.retry_at = None;
                self.stats.dropped_overflow += dropped.results.len() as u64;
                tracing::warn!(
                    results = dropped.results.len(),
                    attempts = dropped.attempts,
                    limit = self.settings.max_buffered_results,
                    "delivery buffer full, dropping oldest batch"
                );
            }
        }
    }

    fn deliver(&mut self, now: Instant, sink: &mut dyn Sink) {
        while let Some(batch) = self.queue.front_mut() {
            if self.retry_at.is_some_and(|at| at > now) {
                return;
            }
            let size = batch.results.len() as u64;
            match sink.submit(&batch.results) {
                Ok(()) => {
                    tracing::debug!(results = size, sink = sink.name(), "batch delivered");
                    self.stats.delivered += size;
                    self.stats.batches_delivered += 1;
                    self.retry_at = None;
                    self.queue.pop_front();
                }
                Err(SinkError::Permanent { details, .. }) => {
                    tracing::error!(results = size, sink = sink.name(), %details, "permanent delivery failure, dropping batch");
                    self.stats.dropped_permanent += size;
                    self.retry_at = None;
                    self.queue.pop_front();
                }
                Err(SinkError::Transient { details, .. }) => {
                    batch.attempts += 1;
                    let attempts = batch.attempts;
                    if self.settings.max_attempts > 0 && attempts >= self.settings.max_attempts {
                        tracing::error!(results = size, attempts, sink = sink.name(), %details, "delivery attempts exhausted, dropping batch");
                        self.stats.dropped_exhausted += size;
                        self.retry_at = None;
                        self.queue.pop_front();
                        continue;
                    }
                    let delay = self.settings.backoff(attempts - 1);
                    tracing::warn!(
                        results = size,
                        attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        sink = sink.name(),
                        %details,
                        "transient delivery failure, retrying"
                    );
                    self.stats.retries += 1;
                    self.retry_at = Some(later(now, delay));
                    return;
                }
            }
        }
    }

    fn queued_results(&self) -> usize {
        self.queue.iter().map(|batch| batch.results.len()).sum()
    }
}
