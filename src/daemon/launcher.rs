//! Runs dispatched checks on their own threads and forwards the results.

use std::sync::Arc;
use std::thread;

use chrono::Utc;

use crate::executor::{CancelSource, Executor};
use crate::results::{CheckResult, CheckState, ResultSubmitter};
use crate::scheduler::{Completion, Dispatch, Launcher};

/// [`Launcher`] that gives every run a named thread (`check:<id>`).
pub struct ThreadLauncher {
    executor: Arc<Executor>,
    results: ResultSubmitter,
    cancel: CancelSource,
}

impl ThreadLauncher {
    /// Launcher running checks with `executor` and submitting to `results`.
    #[must_use]
    pub fn new(executor: Executor, results: ResultSubmitter) -> Self {
        Self {
            executor: Arc::new(executor),
            results,
            cancel: CancelSource::new(),
        }
    }
}

impl Launcher for ThreadLauncher {
    fn launch(&mut self, dispatch: Dispatch, completion: Completion) {
        let definition = dispatch.definition;
        let id = definition.id.clone();
        let executor = Arc::clone(&self.executor);
        let results = self.results.clone();
        let cancel = self.cancel.token();

        let spawned = thread::Builder::new()
            .name(format!("check:{id}"))
            .spawn(move || {
                let execution = executor.run(&definition, &cancel);
                if execution.cancelled {
                    tracing::info!(check = %definition.id, "check killed at shutdown, result discarded");
                } else if let Err(err) = results.submit(execution.result) {
                    tracing::error!(check = %definition.id, error = %err, "result lost");
                }
                completion.finish();
            });

        // On spawn failure the closure, and with it the completion, is dropped,
        // so the scheduler still sees the run end.
        if let Err(err) = spawned {
            tracing::error!(check = %id, error = %err, "failed to start check thread");
            let result = CheckResult::new(
                id,
                CheckState::Unknown,
                format!("failed to start check: {err}"),
                Utc::now(),
                std::time::Duration::ZERO,
            );
            if let Err(err) = self.results.submit(result) {
                tracing::error!(error = %err, "result lost");
            }
        }
    }

    fn abort(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::ThreadLauncher;
    use crate::checks::definition::fixtures::definition;
    use crate::checks::{CheckDefinition, CheckId, CheckSet};
    use crate::executor::Executor;
    use crate::results::batcher::test_sinks::ScriptedSink;
    use crate::results::{CheckState, CollectorHandle, CollectorSettings};
    use crate::scheduler::{SchedulerHandle, SchedulerSettings};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn wait_for(sink: &ScriptedSink, results: usize) {
        let start = Instant::now();
        while sink.batches().iter().map(Vec::len).sum::<usize>() < results {
            assert!(start.elapsed() < Duration::from_secs(5), "results never arrived");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn results_flow_from_scheduler_to_sink() {
        let sink = ScriptedSink::default();
        let collector =
            CollectorHandle::spawn(CollectorSettings::default(), Box::new(sink.clone())).expect("collector");
        let launcher = ThreadLauncher::new(Executor::default(), collector.submitter());
        let checks = Arc::new(CheckSet::new([definition("disk", 60), definition("load", 60)]));
        let scheduler = SchedulerHandle::spawn(
            checks,
            SchedulerSettings {
                jitter: Duration::ZERO,
            },
            launcher,
        )
        .expect("scheduler");

        wait_for(&sink, 2);
        let report = scheduler.shutdown(Duration::from_secs(1)).expect("shutdown");
        assert_eq!(report.aborted, 0);
        collector.shutdown(Duration::from_secs(1)).expect("collector shutdown");

        let mut outputs: Vec<String> = sink
            .batches()
            .into_iter()
            .flatten()
            .map(|result| result.output)
            .collect();
        outputs.sort();
        assert_eq!(outputs, ["disk", "load"]);
    }

    #[test]
    fn killed_runs_are_not_reported() {
        let sink = ScriptedSink::default();
        let collector =
            CollectorHandle::spawn(CollectorSettings::default(), Box::new(sink.clone())).expect("collector");
        let launcher = ThreadLauncher::new(Executor::default(), collector.submitter());
        let hang = CheckDefinition {
            id: CheckId::service("web01", "hang"),
            command: "sleep 30".to_string(),
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(60),
        };
        let checks = Arc::new(CheckSet::new([hang, definition("quick", 60)]));
        let scheduler = SchedulerHandle::spawn(
            checks,
            SchedulerSettings {
                jitter: Duration::ZERO,
            },
            launcher,
        )
        .expect("scheduler");
        wait_for(&sink, 1);

        let report = scheduler
            .shutdown(Duration::from_millis(100))
            .expect("shutdown");
        assert_eq!(report.aborted, 1);
        assert_eq!(report.abandoned, 0);

        let stats = collector.shutdown(Duration::from_secs(1)).expect("collector shutdown");
        assert_eq!(stats.submitted, 1);
        let delivered: Vec<_> = sink.batches().into_iter().flatten().collect();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].state, CheckState::Ok);
        assert_eq!(delivered[0].id, CheckId::service("web01", "quick"));
    }
}
