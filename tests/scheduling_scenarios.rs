//! End-to-end scenarios through the library API: store to scheduler,
//! executor timeouts and delivery retries.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use massive_passive::checks::{CheckDefaults, CheckDefinition, CheckId, CheckStore};
use massive_passive::executor::{CancelSource, Executor};
use massive_passive::results::{CheckResult, CheckState, CollectorHandle, CollectorSettings};
use massive_passive::scheduler::{Completion, Dispatch, Launcher, SchedulerHandle, SchedulerSettings};
use massive_passive::sink::{Sink, SinkError};
use parking_lot::Mutex;

use common::{CRIT_CHECK, Fixture, WEB_CHECKS};

#[derive(Clone, Default)]
struct RecordingLauncher {
    launched: Arc<Mutex<Vec<CheckId>>>,
}

impl Launcher for RecordingLauncher {
    fn launch(&mut self, dispatch: Dispatch, completion: Completion) {
        self.launched.lock().push(dispatch.definition.id.clone());
        completion.finish();
    }

    fn abort(&mut self) {}
}

/// Fails with a transient error a fixed number of times, then accepts.
#[derive(Clone)]
struct FlakySink {
    failures_left: Arc<Mutex<u32>>,
    delivered: Arc<Mutex<Vec<CheckResult>>>,
}

impl Sink for FlakySink {
    fn name(&self) -> &str {
        "flaky"
    }

    fn submit(&mut self, results: &[CheckResult]) -> Result<(), SinkError> {
        let mut failures_left = self.failures_left.lock();
        if *failures_left > 0 {
            *failures_left -= 1;
            return Err(SinkError::transient("flaky", "backend restarting"));
        }
        self.delivered.lock().extend_from_slice(results);
        Ok(())
    }
}

fn wait_until(limit: Duration, mut done: impl FnMut() -> bool) {
    let start = Instant::now();
    while !done() {
        assert!(start.elapsed() < limit, "condition not met within {limit:?}");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn malformed_definition_is_skipped_and_only_valid_checks_run() {
    let fixture = Fixture::new();
    fixture.write_checks("web.toml", WEB_CHECKS);
    fixture.write_checks("db.toml", CRIT_CHECK);
    fixture.write_checks(".hidden.toml", "this is not toml");
    fixture.write_checks("notes.txt", "ignored");

    let load = CheckStore::new(fixture.check_dir(), CheckDefaults::default())
        .load()
        .expect("load");
    assert_eq!(load.checks.len(), 3);
    assert_eq!(load.errors.len(), 1);
    assert_eq!(load.errors[0].entry, Some(2));

    let launcher = RecordingLauncher::default();
    let scheduler = SchedulerHandle::spawn(
        Arc::new(load.checks),
        SchedulerSettings {
            jitter: Duration::ZERO,
        },
        launcher.clone(),
    )
    .expect("spawn");
    wait_until(Duration::from_secs(3), || launcher.launched.lock().len() == 3);
    scheduler.shutdown(Duration::from_secs(1)).expect("shutdown");

    let launched: BTreeSet<String> = launcher
        .launched
        .lock()
        .iter()
        .map(ToString::to_string)
        .collect();
    let expected: BTreeSet<String> = ["web01/crit", "web01/disk", "web01/load"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(launched, expected);
}

#[cfg(unix)]
#[test]
fn timed_out_check_is_unknown_within_bound() {
    let timeout = Duration::from_secs(1);
    let definition = CheckDefinition {
        id: CheckId::service("web01", "hang"),
        command: "sleep 10".to_string(),
        interval: Duration::from_secs(60),
        timeout,
    };
    let cancel = CancelSource::new();
    let started = Instant::now();
    let execution = Executor::default().run(&definition, &cancel.token());
    let elapsed = started.elapsed();

    assert_eq!(execution.result.state, CheckState::Unknown);
    assert!(execution.result.output.contains("timed out"));
    assert!(elapsed >= timeout);
    assert!(elapsed < timeout + Duration::from_millis(1_500), "took {elapsed:?}");
}

#[test]
fn transient_failures_are_retried_until_delivered() {
    let sink = FlakySink {
        failures_left: Arc::new(Mutex::new(2)),
        delivered: Arc::default(),
    };
    let collector = CollectorHandle::spawn(
        CollectorSettings {
            batch_mode: true,
            batch_wait: Duration::from_millis(100),
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(200),
            ..CollectorSettings::default()
        },
        Box::new(sink.clone()),
    )
    .expect("spawn");
    for service in ["a", "b", "c"] {
        collector
            .submit(CheckResult::new(
                CheckId::service("web01", service),
                CheckState::Ok,
                "fine",
                Utc::now(),
                Duration::ZERO,
            ))
            .expect("submit");
    }

    wait_until(Duration::from_secs(3), || sink.delivered.lock().len() == 3);
    let stats = collector.shutdown(Duration::from_secs(1)).expect("shutdown");
    assert_eq!(stats.submitted, 3);
    assert_eq!(stats.delivered, 3);
    assert_eq!(stats.retries, 2);
    assert_eq!(stats.dropped(), 0);
    let order: Vec<_> = sink
        .delivered
        .lock()
        .iter()
        .map(|result| result.id.service.clone().unwrap_or_default())
        .collect();
    assert_eq!(order, ["a", "b", "c"]);
}
