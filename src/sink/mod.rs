//! Result sinks: the delivery boundary towards the monitoring backend.
//!
//! A sink receives an ordered batch and either accepts all of it or fails
//! with a [`SinkError`] that tells the collector whether a retry can help.

pub mod command_file;
pub mod jsonl;
pub mod nsca;

use thiserror::Error;

use crate::core::config::SinkConfig;
use crate::core::errors::{MpError, Result};
use crate::results::CheckResult;

pub use command_file::CommandFileSink;
pub use jsonl::JsonlSink;
pub use nsca::NscaSink;

/// Delivery failure, classified by whether retrying can succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// Backend temporarily unreachable; the whole batch is retried.
    #[error("transient failure in {sink}: {details}")]
    Transient { sink: String, details: String },
    /// Retrying cannot help; the batch is logged and dropped.
    #[error("permanent failure in {sink}: {details}")]
    Permanent { sink: String, details: String },
}

impl SinkError {
    /// Failure that may succeed on retry.
    #[must_use]
    pub fn transient(sink: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Transient {
            sink: sink.into(),
            details: details.into(),
        }
    }

    /// Failure no retry can fix.
    #[must_use]
    pub fn permanent(sink: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Permanent {
            sink: sink.into(),
            details: details.into(),
        }
    }

    /// Whether a retry may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Classify an IO failure: permission problems never heal by themselves.
    #[must_use]
    pub fn from_io(sink: &str, context: &str, err: &std::io::Error) -> Self {
        let details = format!("{context}: {err}");
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => Self::permanent(sink, details),
            _ => Self::transient(sink, details),
        }
    }
}

/// Delivers ordered batches of results.
///
/// Implementations must treat a batch atomically from the caller's point of
/// view: `Ok` means every result was accepted.
pub trait Sink: Send {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Deliver `results` in order.
    fn submit(&mut self, results: &[CheckResult]) -> std::result::Result<(), SinkError>;
}

/// Build the sink selected by configuration.
pub fn from_config(config: &SinkConfig) -> Result<Box<dyn Sink>> {
    match config {
        SinkConfig::CommandFile { path } => Ok(Box::new(CommandFileSink::new(path))),
        SinkConfig::Jsonl { path } => Ok(Box::new(JsonlSink::new(path))),
        SinkConfig::Nsca {
            program,
            args,
            timeout_secs,
        } => {
            if !program.is_file() {
                return Err(MpError::InvalidConfig {
                    details: format!("nsca program {} does not exist", program.display()),
                });
            }
            Ok(Box::new(NscaSink::new(
                program,
                args.clone(),
                std::time::Duration::from_secs(*timeout_secs),
            )))
        }
    }
}

/// Make plugin output safe for line-oriented protocols: newlines become a
/// literal `\n`, tabs become spaces and carriage returns are dropped.
#[must_use]
pub fn escape_output(output: &str) -> String {
    let mut escaped = String::with_capacity(output.len());
    for ch in output.chars() {
        match ch {
            '\n' => escaped.push_str("\\n"),
            '\t' => escaped.push(' '),
            '\r' => {}
            other => escaped.push(other),
        }
    }
    escaped
}
