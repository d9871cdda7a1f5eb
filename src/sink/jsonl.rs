//! Append-only JSON lines sink, one object per result.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write as _};
use std::path::{Path, PathBuf};

use super::{Sink, SinkError};
use crate::results::CheckResult;

const SINK_NAME: &str = "jsonl";

/// Appends results to a JSON lines file.
#[derive(Debug, Clone)]
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    /// Sink appending to `path`, created on first write.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl Sink for JsonlSink {
    fn name(&self) -> &str {
        SINK_NAME
    }

    fn submit(&mut self, results: &[CheckResult]) -> Result<(), SinkError> {
        // Serialize first so a bad record never leaves a partial batch behind.
        let mut payload = Vec::new();
        for result in results {
            serde_json::to_writer(&mut payload, result)
                .map_err(|err| SinkError::permanent(SINK_NAME, format!("serialize: {err}")))?;
            payload.push(b'\n');
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| {
                SinkError::from_io(SINK_NAME, &format!("open {}", self.path.display()), &err)
            })?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(&payload)
            .and_then(|()| writer.flush())
            .map_err(|err| {
                SinkError::from_io(SINK_NAME, &format!("write {}", self.path.display()), &err)
            })
    }
}
