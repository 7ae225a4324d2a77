//! Append-only audit trail for run results.

use crate::model::RunResult;
use crate::runner::{RunnerError, RunnerResult};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Receives every finished run. Implementations must be thread-safe; the
/// gateway records from whichever thread executed the run.
pub trait AuditSink: Send + Sync {
    /// Persist one result.
    ///
    /// # Errors
    /// - `E_IO`: the record could not be written
    fn record(&self, result: &RunResult) -> RunnerResult<()>;
}

/// Writes one JSON object per line to a file opened in append mode.
#[derive(Debug)]
pub struct JsonlAuditLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlAuditLog {
    /// Open (or create) the log at `path`.
    ///
    /// # Errors
    /// - `E_IO`: the file could not be opened for appending
    pub fn open(path: impl Into<PathBuf>) -> RunnerResult<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| {
                RunnerError::io(
                    format!("failed to open audit log {}", path.display()),
                    err,
                )
            })?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlAuditLog {
    fn record(&self, result: &RunResult) -> RunnerResult<()> {
        let mut line = serde_json::to_vec(result)
            .map_err(|err| RunnerError::io("failed to serialize run result", err))?;
        line.push(b'\n');
        // Whole line in a single write under the lock.
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(&line)
            .and_then(|()| file.flush())
            .map_err(|err| RunnerError::io("failed to append to audit log", err))
    }
}
