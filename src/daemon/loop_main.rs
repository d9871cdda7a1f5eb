//! Daemon lifecycle: start every component, serve control requests, shut
//! down in order (scheduler first, then the result collector).

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use serde::Serialize;

use super::Control;
use super::launcher::ThreadLauncher;
use super::pidfile::PidFile;
use crate::checks::{CheckDefaults, CheckSet, CheckStore};
use crate::core::config::Config;
use crate::core::errors::{MpError, Result};
use crate::executor::Executor;
use crate::results::{CollectorHandle, CollectorSettings, CollectorStats};
use crate::scheduler::{
    ReloadSummary, SchedulerHandle, SchedulerSettings, SchedulerStatus, ShutdownReport,
};
use crate::sink;

/// Final accounting returned when the daemon stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DaemonReport {
    /// Scheduled runs that never started.
    pub cancelled_pending: usize,
    /// In-flight runs that ended within the grace period.
    pub finished_in_grace: usize,
    /// Runs killed after the grace period.
    pub aborted: usize,
    /// Final delivery counters.
    pub delivery: CollectorStats,
}

impl DaemonReport {
    fn new(scheduler: ShutdownReport, delivery: CollectorStats) -> Self {
        Self {
            cancelled_pending: scheduler.cancelled_pending,
            finished_in_grace: scheduler.finished_in_grace,
            aborted: scheduler.aborted,
            delivery,
        }
    }
}

/// A running daemon.
pub struct Daemon {
    config: Config,
    store: CheckStore,
    checks: Arc<CheckSet>,
    scheduler: SchedulerHandle,
    collector: CollectorHandle,
    _pid_file: PidFile,
}

impl Daemon {
    /// Validate `config`, load checks and start scheduling.
    ///
    /// Fails when no check could be loaded, the sink cannot be built or the
    /// pid file belongs to another live process.
    pub fn start(config: Config) -> Result<Self> {
        config.validate()?;
        let pid_file = PidFile::create(&config.paths.pid_file)?;

        let store = CheckStore::new(
            &config.paths.check_dir,
            CheckDefaults {
                timeout: config.scheduler.check_timeout(),
            },
        );
        let load = store.load()?;
        if load.checks.is_empty() {
            return Err(MpError::NoChecksLoaded {
                dir: store.dir().to_path_buf(),
            });
        }

        let sink = sink::from_config(&config.sink)?;
        let collector = CollectorHandle::spawn(
            CollectorSettings::from_config(&config.batch, &config.delivery),
            sink,
        )?;
        let checks = Arc::new(load.checks);
        let launcher = ThreadLauncher::new(Executor::default(), collector.submitter());
        let scheduler = SchedulerHandle::spawn(
            Arc::clone(&checks),
            SchedulerSettings::from_config(&config.scheduler),
            launcher,
        )?;

        tracing::info!(
            checks = checks.len(),
            skipped = load.errors.len(),
            pid_file = %pid_file.path().display(),
            "daemon started"
        );
        Ok(Self {
            config,
            store,
            checks,
            scheduler,
            collector,
            _pid_file: pid_file,
        })
    }

    /// Definitions currently scheduled.
    #[must_use]
    pub fn checks(&self) -> &Arc<CheckSet> {
        &self.checks
    }

    /// Scheduler snapshot.
    pub fn status(&self) -> Result<SchedulerStatus> {
        self.scheduler.status()
    }

    /// Delivery counters so far.
    pub fn delivery_stats(&self) -> Result<CollectorStats> {
        self.collector.stats()
    }

    /// Replace the scheduled definitions with `next`.
    pub fn reload(&mut self, next: CheckSet) -> Result<ReloadSummary> {
        let diff = self.checks.diff(&next);
        if diff.is_noop() {
            tracing::info!(checks = next.len(), "reload found no changes");
            return Ok(ReloadSummary {
                unchanged: next.len(),
                ..ReloadSummary::default()
            });
        }
        let next = Arc::new(next);
        let summary = self.scheduler.reload(Arc::clone(&next))?;
        self.checks = next;
        Ok(summary)
    }

    /// Re-read the check directory and apply it.
    ///
    /// A scan that yields no checks at all is refused and the current set
    /// stays scheduled.
    pub fn reload_from_store(&mut self) -> Result<ReloadSummary> {
        let load = self.store.load()?;
        if load.checks.is_empty() {
            return Err(MpError::NoChecksLoaded {
                dir: self.store.dir().to_path_buf(),
            });
        }
        self.reload(load.checks)
    }

    /// Handle control requests until a shutdown arrives (or every sender is gone).
    pub fn serve(mut self, control: &Receiver<Control>) -> Result<DaemonReport> {
        loop {
            match control.recv() {
                Ok(Control::Reload) => {
                    if let Err(err) = self.reload_from_store() {
                        tracing::error!(
                            error = %err,
                            code = err.code(),
                            "reload failed, keeping current checks"
                        );
                    }
                }
                Ok(Control::Shutdown) => break,
                Err(_) => {
                    tracing::warn!("control channel closed, shutting down");
                    break;
                }
            }
        }
        let grace = self.config.scheduler.shutdown_grace();
        self.shutdown(grace)
    }

    /// Stop the scheduler, give running checks `grace`, then drain results
    /// for at most the same period.
    pub fn shutdown(self, grace: Duration) -> Result<DaemonReport> {
        let scheduler = self.scheduler.shutdown(grace)?;
        let delivery = self.collector.shutdown(grace)?;
        let report = DaemonReport::new(scheduler, delivery);
        if delivery.lost_at_shutdown > 0 {
            tracing::warn!(results = delivery.lost_at_shutdown, "undelivered results discarded");
        }
        tracing::info!(
            cancelled = report.cancelled_pending,
            aborted = report.aborted,
            delivered = delivery.delivered,
            "daemon stopped"
        );
        Ok(report)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::Daemon;
    use crate::core::config::{Config, SinkConfig};
    use crate::core::errors::MpError;
    use crate::daemon::Control;
    use crate::results::{CheckResult, CheckState};
    use std::path::Path;
    use std::time::{Duration, Instant};

    fn config(root: &Path) -> Config {
        let mut config = Config::default();
        config.paths.check_dir = root.join("checks.d");
        config.paths.pid_file = root.join("mp.pid");
        config.scheduler.initial_random_wait_range_secs = 0;
        config.scheduler.shutdown_grace_secs = 1;
        config.sink = SinkConfig::Jsonl {
            path: root.join("results.jsonl"),
        };
        std::fs::create_dir(&config.paths.check_dir).expect("check dir");
        config
    }

    fn write_checks(config: &Config, name: &str, body: &str) {
        std::fs::write(config.paths.check_dir.join(name), body).expect("write checks");
    }

    fn delivered(root: &Path) -> Vec<CheckResult> {
        std::fs::read_to_string(root.join("results.jsonl"))
            .unwrap_or_default()
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect()
    }

    fn wait_for(root: &Path, mut done: impl FnMut(&[CheckResult]) -> bool) -> Vec<CheckResult> {
        let start = Instant::now();
        loop {
            let results = delivered(root);
            if done(&results) {
                return results;
            }
            assert!(start.elapsed() < Duration::from_secs(5), "got {results:?}");
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    const TWO_CHECKS: &str = r#"
host = "web01"

[[check]]
service = "ok"
command = "echo fine"
interval = 60

[[check]]
service = "crit"
command = "echo broken; exit 2"
interval = 60
"#;

    #[test]
    fn refuses_to_start_without_checks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config(dir.path());
        let err = Daemon::start(config).err().expect("no checks");
        assert!(matches!(err, MpError::NoChecksLoaded { .. }));
        assert!(!dir.path().join("mp.pid").exists());
    }

    #[test]
    fn runs_checks_and_delivers_results() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config(dir.path());
        write_checks(&config, "web.toml", TWO_CHECKS);

        let daemon = Daemon::start(config).expect("start");
        assert!(dir.path().join("mp.pid").exists());
        let results = wait_for(dir.path(), |results| results.len() == 2);
        let crit = results
            .iter()
            .find(|result| result.id.service.as_deref() == Some("crit"))
            .expect("crit result");
        assert_eq!(crit.state, CheckState::Critical);
        assert_eq!(crit.output, "broken");

        let report = daemon.shutdown(Duration::from_secs(1)).expect("shutdown");
        assert_eq!(report.delivery.delivered, 2);
        assert_eq!(report.cancelled_pending, 2);
        assert!(!dir.path().join("mp.pid").exists());
    }

    #[test]
    fn reload_picks_up_new_checks_and_serve_stops_on_shutdown() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config(dir.path());
        write_checks(&config, "web.toml", TWO_CHECKS);
        let mut daemon = Daemon::start(config.clone()).expect("start");
        wait_for(dir.path(), |results| results.len() == 2);

        write_checks(
            &config,
            "db.toml",
            "[[check]]\nhost = \"db1\"\nservice = \"pg\"\ncommand = \"echo up\"\ninterval = 60\n",
        );
        let summary = daemon.reload_from_store().expect("reload");
        assert_eq!((summary.added, summary.unchanged), (1, 2));
        assert_eq!(daemon.checks().len(), 3);
        wait_for(dir.path(), |results| {
            results.iter().any(|result| result.id.host == "db1")
        });

        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(Control::Reload).expect("send");
        tx.send(Control::Shutdown).expect("send");
        let report = daemon.serve(&rx).expect("serve");
        assert_eq!(report.delivery.delivered, 3);
    }

    #[test]
    fn empty_rescan_keeps_current_checks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config(dir.path());
        write_checks(&config, "web.toml", TWO_CHECKS);
        let mut daemon = Daemon::start(config.clone()).expect("start");

        std::fs::remove_file(config.paths.check_dir.join("web.toml")).expect("remove");
        let err = daemon.reload_from_store().expect_err("empty");
        assert_eq!(err.code(), "MP-2001");
        assert_eq!(daemon.checks().len(), 2);
        daemon.shutdown(Duration::from_secs(1)).expect("shutdown");
    }
}
