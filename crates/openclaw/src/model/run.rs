use crate::model::RunId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys the gateway writes into [`RunResult::metadata`].
///
/// `CMD`, `CONTEXT` and `MODE` are present on every result.
pub mod meta {
    /// Resolved argument vector (JSON array of strings).
    pub const CMD: &str = "cmd";
    /// Execution context the run targeted.
    pub const CONTEXT: &str = "context";
    /// Declared mode.
    pub const MODE: &str = "mode";
    /// Wall time of the run in milliseconds.
    pub const DURATION_MS: &str = "duration_ms";
    /// Error code for non-successful runs.
    pub const ERROR_CODE: &str = "error_code";
    /// Policy rule that denied the run.
    pub const POLICY_RULE: &str = "policy_rule";
    /// Set when the run hit the timeout ceiling.
    pub const TIMED_OUT: &str = "timed_out";
    /// Signal that terminated the tool.
    pub const SIGNAL: &str = "signal";
    pub const STDOUT_TRUNCATED: &str = "stdout_truncated";
    pub const STDERR_TRUNCATED: &str = "stderr_truncated";
}

/// Lifecycle state of a run.
///
/// The gateway executes synchronously and only ever returns `Succeeded`,
/// `Failed` or `Denied`; `Queued` and `Running` are reserved for
/// asynchronous callers that track runs in flight.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Denied,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Denied => "denied",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Denied)
    }
}

/// Record of one gateway run. Produced exactly once per request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RunResult {
    pub run_id: RunId,
    pub status: RunStatus,
    /// Present when the tool ran to completion.
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Structured cause for every non-successful run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl RunResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Time between start and finish.
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// String-valued metadata entry, if present.
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Error code of a non-successful run.
    #[must_use]
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|err| err.code.as_str())
    }
}

/// Serializable error payload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}
