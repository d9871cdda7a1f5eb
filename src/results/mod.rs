//! Check results and the collector that batches them for delivery.

pub mod batcher;
pub mod collector;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checks::CheckId;

pub use batcher::{CollectorSettings, CollectorStats};
pub use collector::{CollectorHandle, ResultSubmitter};

/// Monitoring plugin state, following the Nagios exit code convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckState {
    /// Exit code 0.
    Ok,
    /// Exit code 1.
    Warning,
    /// Exit code 2.
    Critical,
    /// Exit code 3 and every failure to produce a verdict.
    Unknown,
}

impl CheckState {
    /// Map a plugin exit code: 0=OK, 1=WARNING, 2=CRITICAL, anything else UNKNOWN.
    #[must_use]
    pub const fn from_exit_code(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::Warning,
            2 => Self::Critical,
            _ => Self::Unknown,
        }
    }

    /// Numeric return code used on the wire.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::Warning => 1,
            Self::Critical => 2,
            Self::Unknown => 3,
        }
    }

    /// Upper-case name as the backend prints it.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one check execution. Immutable once handed to a sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Check that produced the result.
    #[serde(flatten)]
    pub id: CheckId,
    /// Verdict derived from the exit status.
    pub state: CheckState,
    /// Plugin output, first line and performance data included.
    pub output: String,
    /// Wall-clock time the run started.
    pub executed_at: DateTime<Utc>,
    /// Run time in milliseconds.
    pub duration_ms: u64,
}

impl CheckResult {
    /// Result for `id` with `duration` rounded down to milliseconds.
    #[must_use]
    pub fn new(
        id: CheckId,
        state: CheckState,
        output: impl Into<String>,
        executed_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            id,
            state,
            output: output.into(),
            executed_at,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// First output line, the part monitoring UIs show as the status text.
    #[must_use]
    pub fn summary(&self) -> &str {
        self.output.lines().next().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::{CheckResult, CheckState};
    use crate::checks::CheckId;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    #[test]
    fn exit_codes_follow_plugin_convention() {
        assert_eq!(CheckState::from_exit_code(0), CheckState::Ok);
        assert_eq!(CheckState::from_exit_code(1), CheckState::Warning);
        assert_eq!(CheckState::from_exit_code(2), CheckState::Critical);
        assert_eq!(CheckState::from_exit_code(3), CheckState::Unknown);
        assert_eq!(CheckState::from_exit_code(127), CheckState::Unknown);
        assert_eq!(CheckState::from_exit_code(-1), CheckState::Unknown);
        assert_eq!(CheckState::Critical.code(), 2);
    }

    #[test]
    fn serializes_flat_with_uppercase_state() {
        let result = CheckResult::new(
            CheckId::service("web01", "http"),
            CheckState::Warning,
            "HTTP WARNING: slow\nlong output",
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("valid"),
            Duration::from_millis(1500),
        );
        let json = serde_json::to_value(&result).expect("serialize");
        assert_eq!(json["host"], "web01");
        assert_eq!(json["service"], "http");
        assert_eq!(json["state"], "WARNING");
        assert_eq!(json["duration_ms"], 1500);
        assert_eq!(result.summary(), "HTTP WARNING: slow");
    }
}
