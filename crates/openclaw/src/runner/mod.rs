//! Process execution seam and the gateway's error vocabulary.
//!
//! [`ProcessRunner`] is the only place a tool process is created. The
//! gateway hands it a fully resolved [`Invocation`] and turns the returned
//! [`Completion`] (or [`RunnerError`]) into a run result.

use miette::Diagnostic;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod system;

pub use system::SystemRunner;

pub type RunnerResult<T> = Result<T, RunnerError>;

/// Stable error codes. Each maps to a process exit code for the CLI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    PolicyDenied,
    Spawn,
    Timeout,
    Cwd,
    ProcessExit,
    Config,
    Protocol,
    Io,
    Internal,
    CliInvalidArg,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 10] = [
        ErrorCode::PolicyDenied,
        ErrorCode::Spawn,
        ErrorCode::Timeout,
        ErrorCode::Cwd,
        ErrorCode::ProcessExit,
        ErrorCode::Config,
        ErrorCode::Protocol,
        ErrorCode::Io,
        ErrorCode::Internal,
        ErrorCode::CliInvalidArg,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PolicyDenied => "E_POLICY_DENIED",
            Self::Spawn => "E_SPAWN",
            Self::Timeout => "E_TIMEOUT",
            Self::Cwd => "E_CWD",
            Self::ProcessExit => "E_PROCESS_EXIT",
            Self::Config => "E_CONFIG",
            Self::Protocol => "E_PROTOCOL",
            Self::Io => "E_IO",
            Self::Internal => "E_INTERNAL",
            Self::CliInvalidArg => "E_CLI_INVALID_ARG",
        }
    }

    /// Parse a wire code such as `E_TIMEOUT`.
    #[must_use]
    pub fn parse(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|candidate| candidate.as_str() == code)
    }

    /// Exit code used by the CLI when a run ends with this error.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::PolicyDenied => 2,
            Self::Spawn => 3,
            Self::Timeout => 4,
            Self::Cwd => 5,
            Self::ProcessExit => 6,
            Self::Config => 7,
            Self::Protocol => 9,
            Self::Io => 10,
            Self::Internal => 11,
            Self::CliInvalidArg => 12,
        }
    }

    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::PolicyDenied => "request rejected by the gateway policy",
            Self::Spawn => "tool could not be launched",
            Self::Timeout => "tool exceeded the runtime budget and was terminated",
            Self::Cwd => "working directory is missing or not a directory",
            Self::ProcessExit => "tool exited with a non-zero status or was killed by a signal",
            Self::Config => "policy file is invalid",
            Self::Protocol => "malformed request",
            Self::Io => "filesystem or pipe failure",
            Self::Internal => "unexpected gateway failure",
            Self::CliInvalidArg => "invalid command-line argument",
        }
    }

    fn help(self) -> Option<&'static str> {
        match self {
            Self::PolicyDenied => Some("run `openclaw policy show` to inspect the active policy"),
            Self::Spawn => Some("check that the tool is installed and on the inherited PATH"),
            Self::Timeout => Some("raise budgets.max_runtime_ms in the policy file"),
            Self::Config => Some("run `openclaw policy check --policy <file>` for details"),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised by the runner, validator or configuration layer.
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct RunnerError {
    pub code: ErrorCode,
    pub message: String,
    pub context: Option<Value>,
}

impl RunnerError {
    pub fn new(code: ErrorCode, message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self {
            code,
            message: message.into(),
            context: context.into(),
        }
    }

    pub fn policy_denied(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self::new(ErrorCode::PolicyDenied, message, context)
    }

    pub fn spawn(message: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::Spawn,
            message,
            serde_json::json!({ "source": err.to_string() }),
        )
    }

    pub fn timeout(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self::new(ErrorCode::Timeout, message, context)
    }

    pub fn cwd(message: impl Into<String>, path: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::Cwd,
            message,
            serde_json::json!({ "cwd": path.to_string() }),
        )
    }

    pub fn config(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self::new(ErrorCode::Config, message, context)
    }

    pub fn protocol(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self::new(ErrorCode::Protocol, message, context)
    }

    pub fn io(message: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::Io,
            message,
            serde_json::json!({ "source": err.to_string() }),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message, None)
    }

    pub fn cli_invalid_arg(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CliInvalidArg, message, None)
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.code.exit_code()
    }

    #[must_use]
    pub fn to_error_info(&self) -> crate::model::ErrorInfo {
        crate::model::ErrorInfo {
            code: self.code.as_str().to_string(),
            message: self.message.clone(),
            context: self.context.clone(),
        }
    }
}

impl Diagnostic for RunnerError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(self.code))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        self.code
            .help()
            .map(|text| Box::new(text) as Box<dyn fmt::Display + 'a>)
    }
}

// =============================================================================
// Runner seam
// =============================================================================

/// A fully resolved process launch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    /// Program first, then arguments. Never passed through a shell.
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Complete environment of the child; nothing else is inherited.
    pub env: BTreeMap<String, String>,
    /// Wall-clock ceiling for the run.
    pub timeout: Duration,
    /// Time between SIGTERM and SIGKILL on termination.
    pub grace: Duration,
    /// Bytes kept per output stream.
    pub max_output_bytes: usize,
}

impl Invocation {
    #[must_use]
    pub fn program(&self) -> &str {
        self.argv.first().map_or("", String::as_str)
    }
}

/// How the child process ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    Exited { code: i32 },
    Signaled { signal: i32 },
    /// Killed by the runner after exceeding its timeout.
    TimedOut { after: Duration },
}

/// Output and termination of a finished child.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub termination: Termination,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub elapsed: Duration,
}

/// Executes tool processes on behalf of the gateway.
///
/// Implementations must not invoke a shell and must ensure no process they
/// started outlives the call when it returns `TimedOut`.
pub trait ProcessRunner: Send + Sync {
    /// Run the invocation to completion.
    ///
    /// # Errors
    /// - `E_CWD`: working directory missing or not a directory
    /// - `E_SPAWN`: the program could not be launched
    /// - `E_IO`: waiting on or reading from the child failed
    fn invoke(&self, invocation: &Invocation) -> RunnerResult<Completion>;
}

impl<T: ProcessRunner + ?Sized> ProcessRunner for Arc<T> {
    fn invoke(&self, invocation: &Invocation) -> RunnerResult<Completion> {
        (**self).invoke(invocation)
    }
}

impl<T: ProcessRunner + ?Sized> ProcessRunner for &T {
    fn invoke(&self, invocation: &Invocation) -> RunnerResult<Completion> {
        (**self).invoke(invocation)
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorCode, RunnerError};

    #[test]
    fn error_codes_round_trip_through_parse() {
        for code in ErrorCode::ALL {
            assert_eq!(ErrorCode::parse(code.as_str()), Some(code));
        }
        assert_eq!(ErrorCode::parse("E_NOPE"), None);
    }

    #[test]
    fn exit_codes_are_distinct_and_nonzero() {
        let mut seen = std::collections::BTreeSet::new();
        for code in ErrorCode::ALL {
            assert_ne!(code.exit_code(), 0);
            assert!(seen.insert(code.exit_code()), "duplicate exit code for {code}");
        }
    }

    #[test]
    fn error_info_carries_wire_code() {
        let err = RunnerError::spawn("failed to launch 'nope'", "No such file or directory");
        let info = err.to_error_info();
        assert_eq!(info.code, "E_SPAWN");
        assert_eq!(err.to_string(), "E_SPAWN: failed to launch 'nope'");
        assert!(info.context.is_some());
    }
}
