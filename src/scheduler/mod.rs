//! Check scheduling: the time-ordered queue and the actor thread driving it.

pub mod engine;
pub mod queue;

pub use engine::{
    Completion, Launcher, SchedulerHandle, SchedulerSettings, SchedulerStatus, ShutdownReport,
};
pub use queue::{Dispatch, ReloadSummary, RunState, ScheduleQueue};
