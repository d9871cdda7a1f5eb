//! Daemon configuration: TOML file with per-section defaults plus validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{MpError, Result};

/// Default location of the daemon configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/massive-passive/massive-passive.toml";
/// Default check definition directory.
pub const DEFAULT_CHECK_DIR: &str = "/etc/massive-passive/checks.d";
/// Default pid file location.
pub const DEFAULT_PID_FILE: &str = "/tmp/massive-passive.pid";
/// Longest interval, timeout or wait accepted anywhere, in seconds (one year).
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;
/// Default Icinga 2 external command pipe.
pub const DEFAULT_COMMAND_FILE: &str = "/var/run/icinga2/cmd/icinga2.cmd";

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Filesystem locations.
    pub paths: PathsConfig,
    /// Scheduling knobs.
    pub scheduler: SchedulerConfig,
    /// Batch mode settings.
    pub batch: BatchConfig,
    /// Retry and buffering policy.
    pub delivery: DeliveryConfig,
    /// Result destination.
    pub sink: SinkConfig,
}

/// Filesystem locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    /// Directory holding one TOML file per check or check group.
    pub check_dir: PathBuf,
    /// Pid file written while the daemon runs.
    pub pid_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            check_dir: PathBuf::from(DEFAULT_CHECK_DIR),
            pid_file: PathBuf::from(DEFAULT_PID_FILE),
        }
    }
}

/// Scheduling knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Upper bound of the random delay before a check first runs (start and reload).
    /// Zero schedules every check immediately.
    pub initial_random_wait_range_secs: u64,
    /// Timeout applied to checks that do not set their own.
    pub check_timeout_secs: u64,
    /// How long shutdown waits for in-flight checks before killing them.
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_random_wait_range_secs: 10,
            check_timeout_secs: 10,
            shutdown_grace_secs: 10,
        }
    }
}

impl SchedulerConfig {
    /// Initial random wait range as a duration.
    #[must_use]
    pub const fn jitter_range(&self) -> Duration {
        Duration::from_secs(self.initial_random_wait_range_secs)
    }

    /// Default check timeout as a duration.
    #[must_use]
    pub const fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    /// Shutdown grace period as a duration.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Batch mode settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    /// Submit results in batches instead of one at a time.
    pub enabled: bool,
    /// Maximum time a result waits in the open batch.
    pub wait_time_secs: u64,
    /// Flush early once the open batch holds this many results.
    pub max_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            wait_time_secs: 2,
            max_size: 500,
        }
    }
}

/// Retry and buffering policy for result delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeliveryConfig {
    /// Delay before the first retry of a batch.
    pub initial_backoff_ms: u64,
    /// Upper bound of the doubling retry delay.
    pub max_backoff_ms: u64,
    /// Attempts per batch before it is dropped. Zero retries forever.
    pub max_attempts: u32,
    /// Oldest batches are dropped once more results than this are queued.
    pub max_buffered_results: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            max_attempts: 10,
            max_buffered_results: 10_000,
        }
    }
}

/// Where results go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum SinkConfig {
    /// Nagios/Icinga external command pipe.
    CommandFile { path: PathBuf },
    /// `send_nsca`-compatible program fed through stdin.
    Nsca {
        program: PathBuf,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default = "default_nsca_timeout_secs")]
        timeout_secs: u64,
    },
    /// Append-only JSON lines file.
    Jsonl { path: PathBuf },
}

const fn default_nsca_timeout_secs() -> u64 {
    10
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self::CommandFile {
            path: PathBuf::from(DEFAULT_COMMAND_FILE),
        }
    }
}

impl Config {
    /// Load configuration from `path`.
    ///
    /// When `explicit` is false a missing file yields the defaults, so the
    /// daemon runs out of the box; an explicitly requested file must exist.
    pub fn load(path: &Path, explicit: bool) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                if explicit {
                    return Err(MpError::MissingConfig {
                        path: path.to_path_buf(),
                    });
                }
                tracing::warn!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(err) => return Err(MpError::io(path, err)),
        };
        let config = Self::from_toml(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration text without validating it.
    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Reject settings the engine cannot honour.
    pub fn validate(&self) -> Result<()> {
        let invalid = |details: &str| {
            Err(MpError::InvalidConfig {
                details: details.to_string(),
            })
        };
        if self.scheduler.check_timeout_secs == 0 {
            return invalid("scheduler.check_timeout_secs must be at least 1");
        }
        let bounded = [
            ("scheduler.initial_random_wait_range_secs", self.scheduler.initial_random_wait_range_secs),
            ("scheduler.check_timeout_secs", self.scheduler.check_timeout_secs),
            ("scheduler.shutdown_grace_secs", self.scheduler.shutdown_grace_secs),
            ("batch.wait_time_secs", self.batch.wait_time_secs),
            ("delivery.max_backoff_ms", self.delivery.max_backoff_ms / 1_000),
        ];
        if let Some((key, _)) = bounded.iter().find(|(_, secs)| *secs > MAX_DURATION_SECS) {
            return Err(MpError::InvalidConfig {
                details: format!("{key} must not exceed {MAX_DURATION_SECS} seconds"),
            });
        }
        if self.batch.enabled && self.batch.wait_time_secs == 0 {
            return invalid("batch.wait_time_secs must be at least 1 in batch mode");
        }
        if self.batch.max_size == 0 {
            return invalid("batch.max_size must be at least 1");
        }
        if self.delivery.max_buffered_results < self.batch.max_size {
            return invalid("delivery.max_buffered_results must be >= batch.max_size");
        }
        if self.delivery.initial_backoff_ms == 0
            || self.delivery.max_backoff_ms < self.delivery.initial_backoff_ms
        {
            return invalid("delivery backoff must satisfy 0 < initial_backoff_ms <= max_backoff_ms");
        }
        match &self.sink {
            SinkConfig::CommandFile { path } | SinkConfig::Jsonl { path }
                if path.as_os_str().is_empty() =>
            {
                invalid("sink.path must not be empty")
            }
            SinkConfig::Nsca { program, .. } if program.as_os_str().is_empty() => {
                invalid("sink.program must not be empty")
            }
            SinkConfig::Nsca { timeout_secs, .. }
                if *timeout_secs == 0 || *timeout_secs > MAX_DURATION_SECS =>
            {
                invalid("sink.timeout_secs must be between 1 second and one year")
            }
            _ => Ok(()),
        }
    }
}
