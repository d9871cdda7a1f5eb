//! Check definition store: reads the check directory with per-entry failure
//! isolation, so one malformed check never blocks the rest.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use super::definition::{CheckDefinition, CheckId, CheckSet};
use crate::core::config::MAX_DURATION_SECS;
use crate::core::errors::{MpError, Result};

/// Extension of check definition files.
pub const CHECK_FILE_EXTENSION: &str = "toml";

/// A malformed check file or entry. The store skips it and keeps loading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}{}: {details}", .path.display(), entry_suffix(.entry))]
pub struct ConfigError {
    /// File the problem was found in.
    pub path: PathBuf,
    /// Zero-based index of the `[[check]]` entry, `None` for file-level problems.
    pub entry: Option<usize>,
    /// Human-readable reason.
    pub details: String,
}

fn entry_suffix(entry: &Option<usize>) -> String {
    entry.map_or_else(String::new, |index| format!(" [check #{}]", index + 1))
}

impl ConfigError {
    fn file(path: &Path, details: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            entry: None,
            details: details.into(),
        }
    }

    fn entry(path: &Path, index: usize, details: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            entry: Some(index),
            details: details.into(),
        }
    }
}

/// Values applied to entries that leave them unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckDefaults {
    /// Timeout for entries without their own `timeout`.
    pub timeout: Duration,
}

impl Default for CheckDefaults {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

/// Everything a directory scan produced: the usable set plus what was skipped.
#[derive(Debug, Clone, Default)]
pub struct StoreLoad {
    /// Definitions that passed validation.
    pub checks: CheckSet,
    /// Files and entries that were skipped.
    pub errors: Vec<ConfigError>,
    /// Number of check files that were read.
    pub files: usize,
}

impl StoreLoad {
    /// One line per skipped file or entry.
    #[must_use]
    pub fn error_summary(&self) -> String {
        let mut out = String::new();
        for error in &self.errors {
            let _ = writeln!(out, "{error}");
        }
        out
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCheck {
    host: Option<String>,
    service: Option<String>,
    command: String,
    interval: u64,
    timeout: Option<u64>,
}

/// Parse one check file.
///
/// Returns the well-formed definitions together with one [`ConfigError`]
/// per rejected entry. A file that is not valid TOML yields only an error.
#[must_use]
pub fn parse(
    path: &Path,
    bytes: &[u8],
    defaults: CheckDefaults,
) -> (Vec<CheckDefinition>, Vec<ConfigError>) {
    let mut errors = Vec::new();
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => return (Vec::new(), vec![ConfigError::file(path, format!("not UTF-8: {err}"))]),
    };
    let mut table: toml::Table = match toml::from_str(text) {
        Ok(table) => table,
        Err(err) => return (Vec::new(), vec![ConfigError::file(path, err.message().to_string())]),
    };

    let file_host = match table.remove("host") {
        None => None,
        Some(toml::Value::String(host)) => Some(host),
        Some(other) => {
            errors.push(ConfigError::file(
                path,
                format!("top-level host must be a string, found {}", other.type_str()),
            ));
            None
        }
    };
    let entries = match table.remove("check") {
        Some(toml::Value::Array(entries)) => entries,
        Some(other) => {
            errors.push(ConfigError::file(
                path,
                format!("check must be an array of tables, found {}", other.type_str()),
            ));
            Vec::new()
        }
        None => {
            errors.push(ConfigError::file(path, "no [[check]] entries"));
            Vec::new()
        }
    };
    for key in table.keys() {
        errors.push(ConfigError::file(path, format!("unknown top-level key `{key}`")));
    }

    let mut definitions = Vec::with_capacity(entries.len());
    for (index, value) in entries.into_iter().enumerate() {
        let raw: RawCheck = match value.try_into() {
            Ok(raw) => raw,
            Err(err) => {
                errors.push(ConfigError::entry(path, index, err.message().to_string()));
                continue;
            }
        };
        match resolve(raw, file_host.as_deref(), defaults) {
            Ok(definition) => definitions.push(definition),
            Err(details) => errors.push(ConfigError::entry(path, index, details)),
        }
    }
    (definitions, errors)
}

fn resolve(
    raw: RawCheck,
    file_host: Option<&str>,
    defaults: CheckDefaults,
) -> std::result::Result<CheckDefinition, String> {
    let host = raw
        .host
        .or_else(|| file_host.map(str::to_string))
        .ok_or("host is not set for the check or the file")?;
    if host.trim().is_empty() {
        return Err("host must not be empty".to_string());
    }
    if raw.service.as_deref().is_some_and(|service| service.trim().is_empty()) {
        return Err("service must not be empty when present".to_string());
    }
    check_name("host", &host)?;
    if let Some(service) = &raw.service {
        check_name("service", service)?;
    }
    if raw.command.trim().is_empty() {
        return Err("command must not be empty".to_string());
    }
    if raw.interval == 0 || raw.interval > MAX_DURATION_SECS {
        return Err(format!(
            "interval must be between 1 and {MAX_DURATION_SECS} seconds"
        ));
    }
    let timeout = match raw.timeout {
        Some(secs) if secs == 0 || secs > MAX_DURATION_SECS => {
            return Err(format!(
                "timeout must be between 1 and {MAX_DURATION_SECS} seconds"
            ));
        }
        Some(secs) => Duration::from_secs(secs),
        None => defaults.timeout,
    };
    Ok(CheckDefinition {
        id: CheckId {
            host,
            service: raw.service,
        },
        command: raw.command,
        interval: Duration::from_secs(raw.interval),
        timeout,
    })
}

/// Host and service names end up in `;`-separated, line-oriented backend
/// commands, so separators and control characters are refused.
fn check_name(field: &str, name: &str) -> std::result::Result<(), String> {
    match name.chars().find(|c| *c == ';' || c.is_control()) {
        Some(bad) => Err(format!("{field} {name:?} contains forbidden character {bad:?}")),
        None => Ok(()),
    }
}

/// Loads check definitions from one directory.
#[derive(Debug, Clone)]
pub struct CheckStore {
    dir: PathBuf,
    defaults: CheckDefaults,
}

impl CheckStore {
    /// Store reading `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, defaults: CheckDefaults) -> Self {
        Self {
            dir: dir.into(),
            defaults,
        }
    }

    /// Directory this store reads.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Scan the directory.
    ///
    /// Only an unreadable directory is an error; bad files and entries are
    /// reported in [`StoreLoad::errors`]. Duplicate ids keep the definition
    /// from the file that sorts first.
    pub fn load(&self) -> Result<StoreLoad> {
        let mut files = Vec::new();
        let entries = std::fs::read_dir(&self.dir).map_err(|err| MpError::io(&self.dir, err))?;
        for entry in entries {
            let entry = entry.map_err(|err| MpError::io(&self.dir, err))?;
            let path = entry.path();
            if is_check_file(&path) {
                files.push(path);
            }
        }
        files.sort();

        let mut load = StoreLoad {
            files: files.len(),
            ..StoreLoad::default()
        };
        let mut seen = BTreeSet::new();
        let mut definitions = Vec::new();
        for path in files {
            let bytes = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                Err(err) => {
                    load.errors.push(ConfigError::file(&path, err.to_string()));
                    continue;
                }
            };
            let (parsed, errors) = parse(&path, &bytes, self.defaults);
            load.errors.extend(errors);
            for definition in parsed {
                if seen.insert(definition.id.clone()) {
                    definitions.push(definition);
                } else {
                    load.errors.push(ConfigError::file(
                        &path,
                        format!("duplicate check {} ignored", definition.id),
                    ));
                }
            }
        }
        load.checks = CheckSet::new(definitions);

        for error in &load.errors {
            tracing::warn!(error = %error, "skipping malformed check definition");
        }
        tracing::info!(
            dir = %self.dir.display(),
            files = load.files,
            checks = load.checks.len(),
            skipped = load.errors.len(),
            "loaded check definitions"
        );
        Ok(load)
    }
}

fn is_check_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_none_or(|name| name.starts_with('.'));
    !hidden
        && path.is_file()
        && path
            .extension()
            .is_some_and(|ext| ext == CHECK_FILE_EXTENSION)
}
