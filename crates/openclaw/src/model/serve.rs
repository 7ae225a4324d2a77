use crate::model::{ErrorInfo, RunRequest, RunResult};
use serde::{Deserialize, Serialize};

/// Serve protocol version for request/response compatibility.
pub const SERVE_PROTOCOL_VERSION: u32 = 1;

/// One line of `openclaw serve` input.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServeRequest {
    /// Client-provided identifier echoed in the response.
    pub request_id: String,
    /// Run to execute.
    pub run: RunRequest,
}

/// Serve response status.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServeStatus {
    /// The request was executed; `result` holds its outcome, which may
    /// itself be `failed` or `denied`.
    Ok,
    /// The request line could not be processed.
    Error,
}

/// One line of `openclaw serve` output.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServeResponse {
    pub protocol_version: u32,
    /// Request identifier echoed from the request, empty when the line
    /// could not be parsed far enough to find one.
    pub request_id: String,
    pub status: ServeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<RunResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl ServeResponse {
    #[must_use]
    pub fn completed(request_id: String, result: RunResult) -> Self {
        Self {
            protocol_version: SERVE_PROTOCOL_VERSION,
            request_id,
            status: ServeStatus::Ok,
            result: Some(result),
            error: None,
        }
    }

    #[must_use]
    pub fn rejected(request_id: String, error: ErrorInfo) -> Self {
        Self {
            protocol_version: SERVE_PROTOCOL_VERSION,
            request_id,
            status: ServeStatus::Error,
            result: None,
            error: Some(error),
        }
    }
}
