//! MP-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::sink::SinkError;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, MpError>;

/// Top-level error type for massive-passive.
#[derive(Debug, Error)]
pub enum MpError {
    #[error("[MP-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[MP-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[MP-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[MP-2001] no usable check definitions found in {dir}")]
    NoChecksLoaded { dir: PathBuf },

    #[error("[MP-2002] unknown check {id}")]
    UnknownCheck { id: String },

    #[error("[MP-3001] transient delivery failure via {sink}: {details}")]
    SinkTransient { sink: String, details: String },

    #[error("[MP-3002] permanent delivery failure via {sink}: {details}")]
    SinkPermanent { sink: String, details: String },

    #[error("[MP-4001] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[MP-4002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[MP-4003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[MP-4004] pid file {path} is held by running process {pid}")]
    PidFileLocked { path: PathBuf, pid: u32 },

    #[error("[MP-4900] runtime failure: {details}")]
    Runtime { details: String },
}

impl MpError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "MP-1001",
            Self::MissingConfig { .. } => "MP-1002",
            Self::ConfigParse { .. } => "MP-1003",
            Self::NoChecksLoaded { .. } => "MP-2001",
            Self::UnknownCheck { .. } => "MP-2002",
            Self::SinkTransient { .. } => "MP-3001",
            Self::SinkPermanent { .. } => "MP-3002",
            Self::Serialization { .. } => "MP-4001",
            Self::Io { .. } => "MP-4002",
            Self::ChannelClosed { .. } => "MP-4003",
            Self::PidFileLocked { .. } => "MP-4004",
            Self::Runtime { .. } => "MP-4900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::ChannelClosed { .. }
                | Self::SinkTransient { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for MpError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for MpError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<SinkError> for MpError {
    fn from(value: SinkError) -> Self {
        match value {
            SinkError::Transient { sink, details } => Self::SinkTransient { sink, details },
            SinkError::Permanent { sink, details } => Self::SinkPermanent { sink, details },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::MpError;
    use crate::sink::SinkError;

    #[test]
    fn codes_are_stable_and_prefixed() {
        let err = MpError::NoChecksLoaded {
            dir: "/etc/massive-passive/checks.d".into(),
        };
        assert_eq!(err.code(), "MP-2001");
        assert!(err.to_string().starts_with("[MP-2001]"));
    }

    #[test]
    fn sink_errors_keep_their_retry_class() {
        let transient: MpError = SinkError::transient("nsca", "connection refused").into();
        let permanent: MpError = SinkError::permanent("nsca", "no such program").into();
        assert!(transient.is_retryable());
        assert!(!permanent.is_retryable());
        assert_eq!(permanent.code(), "MP-3002");
    }

    #[test]
    fn toml_errors_map_to_config_parse() {
        let err: MpError = toml::from_str::<toml::Table>("= broken")
            .expect_err("invalid toml")
            .into();
        assert_eq!(err.code(), "MP-1003");
    }
}
