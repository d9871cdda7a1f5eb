//! Time-ordered schedule of check runs.
//!
//! Pure data structure: every operation takes `now` explicitly so the timing
//! rules can be tested without sleeping. The scheduler actor is its only
//! owner.
//!
//! Rules:
//! - initial runs are spread uniformly over `[now, now + jitter]`;
//! - a dispatched run is rescheduled at `fire + interval`, or at
//!   `now + interval` when that is already past (missed runs are skipped,
//!   never replayed);
//! - a run still in flight when its next fire arrives is parked and
//!   rescheduled at `completion + interval`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::checks::{CheckDefinition, CheckId, CheckSet};
use crate::core::clock::later;

/// Execution state of one scheduled check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Waiting for its next fire time.
    Idle,
    /// Dispatched and not yet reported back.
    Running,
}

/// A check whose run is due now.
#[derive(Debug, Clone)]
pub struct Dispatch {
    /// Definition as scheduled at dispatch time.
    pub definition: Arc<CheckDefinition>,
    /// Instant the run was scheduled for (may be earlier than dispatch).
    pub scheduled_for: Instant,
}

/// What a reload did to the schedule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    /// Checks that were not scheduled before.
    pub added: usize,
    /// Checks no longer present; a running one finishes first.
    pub removed: usize,
    /// Checks whose definition differs; they get a fresh first run.
    pub changed: usize,
    /// Identical checks; their next fire time is kept.
    pub unchanged: usize,
}

#[derive(Debug)]
struct ScheduledRun {
    definition: Arc<CheckDefinition>,
    state: RunState,
    /// Timeline key while waiting; `None` while parked behind a running execution.
    slot: Option<(Instant, u64)>,
    /// Removed by a reload while running; dropped once the run completes.
    retired: bool,
}

/// The schedule: one [`ScheduledRun`] per check, ordered by next fire time.
#[derive(Debug, Default)]
pub struct ScheduleQueue {
    runs: HashMap<CheckId, ScheduledRun>,
    timeline: BTreeMap<(Instant, u64), CheckId>,
    next_seq: u64,
}

/// Uniform random offset in `[0, range]` with millisecond resolution.
pub fn jitter_offset<R: Rng + ?Sized>(range: Duration, rng: &mut R) -> Duration {
    let max_ms = u64::try_from(range.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rng.random_range(0..=max_ms))
}

impl ScheduleQueue {
    /// Empty schedule.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule every definition for its first run within `[now, now + jitter]`.
    pub fn schedule_initial<R: Rng + ?Sized>(
        &mut self,
        definitions: &CheckSet,
        jitter: Duration,
        now: Instant,
        rng: &mut R,
    ) {
        for definition in definitions.iter() {
            self.insert_new(Arc::clone(definition), later(now, jitter_offset(jitter, rng)));
        }
    }

    /// Take every run due at `now`.
    ///
    /// Idle runs are returned for dispatch, marked running and rescheduled
    /// (skip-missed). Runs still in flight are parked instead.
    pub fn tick(&mut self, now: Instant) -> Vec<Dispatch> {
        let mut due = Vec::new();
        while let Some(entry) = self.timeline.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let ((fire, _), id) = entry.remove_entry();
            let Some(run) = self.runs.get_mut(&id) else {
                continue;
            };
            run.slot = None;
            if run.state == RunState::Running {
                tracing::debug!(check = %id, "previous run still in flight, deferring");
                continue;
            }
            run.state = RunState::Running;
            let interval = run.definition.interval;
            let mut next = later(fire, interval);
            if next <= now {
                tracing::debug!(
                    check = %id,
                    late_ms = u64::try_from(now.duration_since(fire).as_millis()).unwrap_or(u64::MAX),
                    "skipping missed runs"
                );
                next = later(now, interval);
            }
            due.push(Dispatch {
                definition: Arc::clone(&run.definition),
                scheduled_for: fire,
            });
            self.place(&id, next);
        }
        due
    }

    /// Record that the run of `id` finished at `now`.
    ///
    /// Returns `false` for ids the queue does not know or that were not running.
    pub fn complete(&mut self, id: &CheckId, now: Instant) -> bool {
        let Some(run) = self.runs.get_mut(id) else {
            return false;
        };
        if run.state != RunState::Running {
            return false;
        }
        run.state = RunState::Idle;
        if run.retired {
            self.runs.remove(id);
        } else if run.slot.is_none() {
            let next = later(now, run.definition.interval);
            self.place(id, next);
        }
        true
    }

    /// Replace the scheduled set with `next`.
    ///
    /// New and changed checks get a fresh jittered first run, removed checks
    /// lose their pending run, unchanged checks keep theirs. Running checks
    /// are never restarted: their in-flight run finishes first.
    pub fn reload<R: Rng + ?Sized>(
        &mut self,
        next: &CheckSet,
        jitter: Duration,
        now: Instant,
        rng: &mut R,
    ) -> ReloadSummary {
        let mut summary = ReloadSummary::default();

        let stale: Vec<CheckId> = self
            .runs
            .iter()
            .filter(|(id, run)| !run.retired && !next.contains(id))
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            self.retire(&id);
            summary.removed += 1;
        }

        for definition in next.iter() {
            let first = later(now, jitter_offset(jitter, rng));
            let Some(run) = self.runs.get_mut(&definition.id) else {
                self.insert_new(Arc::clone(definition), first);
                summary.added += 1;
                continue;
            };
            if run.retired {
                // Re-added while its old run is still in flight.
                run.retired = false;
                run.definition = Arc::clone(definition);
                summary.added += 1;
                continue;
            }
            if run.definition.as_ref() == definition.as_ref() {
                summary.unchanged += 1;
                continue;
            }
            run.definition = Arc::clone(definition);
            summary.changed += 1;
            if let Some(slot) = run.slot.take() {
                self.timeline.remove(&slot);
                let id = definition.id.clone();
                self.place(&id, first);
            }
        }
        summary
    }

    /// Drop every pending run; running ones are only forgotten on completion.
    /// Returns how many pending runs were cancelled.
    pub fn cancel_pending(&mut self) -> usize {
        let cancelled = self.timeline.len();
        self.timeline.clear();
        self.runs.retain(|_, run| {
            run.slot = None;
            run.state == RunState::Running
        });
        for run in self.runs.values_mut() {
            run.retired = true;
        }
        cancelled
    }

    /// Earliest pending fire time.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timeline.keys().next().map(|(fire, _)| *fire)
    }

    /// Next fire time of one check, `None` while parked or unknown.
    #[must_use]
    pub fn next_fire(&self, id: &CheckId) -> Option<Instant> {
        self.runs.get(id).and_then(|run| run.slot).map(|(fire, _)| fire)
    }

    /// Run state of one check, `None` when unknown.
    #[must_use]
    pub fn state(&self, id: &CheckId) -> Option<RunState> {
        self.runs.get(id).map(|run| run.state)
    }

    /// Number of runs in flight, retired ones included.
    #[must_use]
    pub fn running(&self) -> usize {
        self.runs
            .values()
            .filter(|run| run.state == RunState::Running)
            .count()
    }

    /// Number of scheduled (non-retired) checks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.values().filter(|run| !run.retired).count()
    }

    /// No checks are scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert_new(&mut self, definition: Arc<CheckDefinition>, first: Instant) {
        let id = definition.id.clone();
        self.runs.insert(
            id.clone(),
            ScheduledRun {
                definition,
                state: RunState::Idle,
                slot: None,
                retired: false,
            },
        );
        self.place(&id, first);
    }

    fn place(&mut self, id: &CheckId, fire: Instant) {
        let key = (fire, self.next_seq);
        self.next_seq += 1;
        if let Some(run) = self.runs.get_mut(id) {
            if let Some(old) = run.slot.replace(key) {
                self.timeline.remove(&old);
            }
            self.timeline.insert(key, id.clone());
        }
    }

    fn retire(&mut self, id: &CheckId) {
        let Some(run) = self.runs.get_mut(id) else {
            return;
        };
        if let Some(slot) = run.slot.take() {
            self.timeline.remove(&slot);
        }
        if run.state == RunState::Running {
            run.retired = true;
        } else {
            self.runs.remove(id);
        }
    }
}
