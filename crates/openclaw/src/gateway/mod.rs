//! Run orchestration: policy check, process launch, result normalization.

use crate::audit::AuditSink;
use crate::model::policy::GatewayPolicy;
use crate::model::run::meta;
use crate::model::{RunId, RunRequest, RunResult, RunStatus};
use crate::policy::{apply_env_policy, Denial, PolicyValidator, Verdict};
use crate::runner::{
    Completion, ErrorCode, Invocation, ProcessRunner, RunnerError, RunnerResult, SystemRunner,
    Termination,
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Exit code reported for faults that happen after the run was allowed
/// (unusable working directory, pipe failures, runner panics).
const FAULT_EXIT_CODE: i32 = 1;
/// Shells report death by signal N as 128 + N.
const SIGNAL_EXIT_BASE: i32 = 128;

/// The command-execution gateway.
///
/// Each [`Gateway::execute`] call is independent; share the gateway behind
/// an `Arc` to serve concurrent requests.
pub struct Gateway<R = SystemRunner> {
    validator: PolicyValidator,
    runner: R,
    audit: Option<Arc<dyn AuditSink>>,
}

impl Gateway<SystemRunner> {
    /// Gateway that runs tools as real child processes.
    ///
    /// # Errors
    /// - `E_CONFIG`: the policy is invalid
    pub fn new(policy: GatewayPolicy) -> RunnerResult<Self> {
        Self::with_runner(policy, SystemRunner::new())
    }
}

impl<R: ProcessRunner> Gateway<R> {
    /// Gateway with a custom process runner.
    ///
    /// # Errors
    /// - `E_CONFIG`: the policy is invalid
    pub fn with_runner(policy: GatewayPolicy, runner: R) -> RunnerResult<Self> {
        Ok(Self {
            validator: PolicyValidator::new(policy)?,
            runner,
            audit: None,
        })
    }

    /// Record every result to `sink`.
    #[must_use]
    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    #[must_use]
    pub fn policy(&self) -> &GatewayPolicy {
        self.validator.policy()
    }

    #[must_use]
    pub fn validator(&self) -> &PolicyValidator {
        &self.validator
    }

    /// Execute one request and return its result.
    ///
    /// Never fails: denials, launch failures, timeouts and runner faults all
    /// come back as a [`RunResult`].
    pub fn execute(&self, request: &RunRequest) -> RunResult {
        let run_id = RunId::new();
        let started_at = Utc::now();
        let clock = Instant::now();
        let context = request
            .context
            .clone()
            .unwrap_or_else(|| self.policy().default_context.clone());
        let metadata = base_metadata(request, &context);

        let result = match self.validator.check(request) {
            Verdict::Denied(denial) => {
                tracing::warn!(
                    run_id = %run_id.short(),
                    tool = %request.tool,
                    rule = %denial.rule,
                    "run denied by policy"
                );
                denied_result(run_id, started_at, metadata, &denial)
            }
            Verdict::Allowed => {
                tracing::info!(
                    run_id = %run_id.short(),
                    tool = %request.tool,
                    context = %context,
                    mode = %request.mode,
                    "run started"
                );
                let invocation = self.invocation_for(request);
                let outcome = catch_unwind(AssertUnwindSafe(|| self.runner.invoke(&invocation)))
                    .unwrap_or_else(|_| Err(RunnerError::internal("process runner panicked")));
                let elapsed = clock.elapsed();
                let mut result = RunResult {
                    run_id,
                    status: RunStatus::Failed,
                    exit_code: None,
                    stdout: String::new(),
                    stderr: String::new(),
                    started_at,
                    finished_at: finished_at(started_at, elapsed),
                    metadata,
                    error: None,
                };
                match outcome {
                    Ok(completion) => apply_completion(&mut result, completion, &invocation),
                    Err(err) => apply_fault(&mut result, &err),
                }
                result
                    .metadata
                    .insert(meta::DURATION_MS.to_string(), Value::from(duration_ms(elapsed)));
                tracing::info!(
                    run_id = %run_id.short(),
                    tool = %request.tool,
                    status = result.status.as_str(),
                    exit_code = ?result.exit_code,
                    duration_ms = duration_ms(elapsed),
                    "run finished"
                );
                result
            }
        };

        self.record(&result);
        result
    }

    fn invocation_for(&self, request: &RunRequest) -> Invocation {
        let policy = self.policy();
        let budgets = &policy.budgets;
        Invocation {
            argv: request.argv(),
            cwd: request.cwd.as_ref().map(PathBuf::from),
            env: apply_env_policy(&policy.env, request.env.as_ref(), |key| {
                std::env::var(key).ok()
            }),
            timeout: budgets.timeout(),
            grace: budgets.grace(),
            max_output_bytes: usize::try_from(budgets.max_output_bytes).unwrap_or(usize::MAX),
        }
    }

    fn record(&self, result: &RunResult) {
        let Some(sink) = self.audit.as_ref() else {
            return;
        };
        if let Err(err) = sink.record(result) {
            tracing::warn!(run_id = %result.run_id.short(), error = %err, "failed to record audit entry");
        }
    }
}

fn base_metadata(request: &RunRequest, context: &str) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert(
        meta::CMD.to_string(),
        Value::from(request.argv()),
    );
    metadata.insert(meta::CONTEXT.to_string(), Value::from(context));
    metadata.insert(meta::MODE.to_string(), Value::from(request.mode.as_str()));
    metadata
}

fn denied_result(
    run_id: RunId,
    started_at: DateTime<Utc>,
    mut metadata: Map<String, Value>,
    denial: &Denial,
) -> RunResult {
    let error = denial.to_error().to_error_info();
    metadata.insert(meta::POLICY_RULE.to_string(), Value::from(denial.rule.as_str()));
    metadata.insert(meta::ERROR_CODE.to_string(), Value::from(error.code.clone()));
    metadata.insert(meta::DURATION_MS.to_string(), Value::from(0_u64));
    RunResult {
        run_id,
        status: RunStatus::Denied,
        exit_code: None,
        stdout: String::new(),
        stderr: denial.reason.clone(),
        started_at,
        finished_at: started_at,
        metadata,
        error: Some(error),
    }
}

fn apply_completion(result: &mut RunResult, completion: Completion, invocation: &Invocation) {
    result.stdout = completion.stdout;
    result.stderr = completion.stderr;
    if completion.stdout_truncated {
        result
            .metadata
            .insert(meta::STDOUT_TRUNCATED.to_string(), Value::Bool(true));
    }
    if completion.stderr_truncated {
        result
            .metadata
            .insert(meta::STDERR_TRUNCATED.to_string(), Value::Bool(true));
    }

    match completion.termination {
        Termination::Exited { code: 0 } => {
            result.status = RunStatus::Succeeded;
            result.exit_code = Some(0);
        }
        Termination::Exited { code } => {
            result.exit_code = Some(code);
            set_error(
                result,
                &RunnerError::new(
                    ErrorCode::ProcessExit,
                    format!("tool exited with status {code}"),
                    serde_json::json!({ "exit_code": code }),
                ),
            );
        }
        Termination::Signaled { signal } => {
            result.exit_code = Some(SIGNAL_EXIT_BASE.saturating_add(signal));
            result
                .metadata
                .insert(meta::SIGNAL.to_string(), Value::from(signal));
            set_error(
                result,
                &RunnerError::new(
                    ErrorCode::ProcessExit,
                    format!("tool terminated by signal {signal}"),
                    serde_json::json!({ "signal": signal }),
                ),
            );
        }
        Termination::TimedOut { after } => {
            let timeout_ms = duration_ms(invocation.timeout);
            tracing::warn!(
                run_id = %result.run_id.short(),
                timeout_ms,
                "run timed out; process group terminated"
            );
            let err = RunnerError::timeout(
                format!("timed out after {timeout_ms} ms"),
                serde_json::json!({
                    "timeout_ms": timeout_ms,
                    "elapsed_ms": duration_ms(after),
                }),
            );
            append_line(&mut result.stderr, &err.message);
            result
                .metadata
                .insert(meta::TIMED_OUT.to_string(), Value::Bool(true));
            set_error(result, &err);
        }
    }
}

fn apply_fault(result: &mut RunResult, err: &RunnerError) {
    match err.code {
        ErrorCode::Spawn | ErrorCode::Timeout => {
            tracing::warn!(run_id = %result.run_id.short(), error = %err, "run could not complete");
        }
        _ => {
            tracing::error!(run_id = %result.run_id.short(), error = %err, "run failed with fault");
            result.exit_code = Some(FAULT_EXIT_CODE);
        }
    }
    if err.code == ErrorCode::Timeout {
        result
            .metadata
            .insert(meta::TIMED_OUT.to_string(), Value::Bool(true));
    }
    result.stderr = err.message.clone();
    set_error(result, err);
}

fn set_error(result: &mut RunResult, err: &RunnerError) {
    result.status = RunStatus::Failed;
    result.metadata.insert(
        meta::ERROR_CODE.to_string(),
        Value::from(err.code.as_str()),
    );
    result.error = Some(err.to_error_info());
}

fn append_line(buffer: &mut String, line: &str) {
    if !buffer.is_empty() && !buffer.ends_with('\n') {
        buffer.push('\n');
    }
    buffer.push_str(line);
}

/// Wall-clock finish derived from the monotonic elapsed time, so it never
/// precedes the start.
fn finished_at(started_at: DateTime<Utc>, elapsed: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(elapsed)
        .ok()
        .and_then(|delta| started_at.checked_add_signed(delta))
        .unwrap_or(started_at)
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::{append_line, finished_at};
    use chrono::Utc;
    use std::time::Duration;

    #[test]
    fn finished_at_never_precedes_start() {
        let start = Utc::now();
        assert_eq!(finished_at(start, Duration::ZERO), start);
        assert!(finished_at(start, Duration::from_millis(5)) > start);
        assert_eq!(finished_at(start, Duration::MAX), start);
    }

    #[test]
    fn append_line_separates_existing_output() {
        let mut stderr = String::from("partial");
        append_line(&mut stderr, "timed out after 10 ms");
        assert_eq!(stderr, "partial\ntimed out after 10 ms");

        let mut empty = String::new();
        append_line(&mut empty, "timed out");
        assert_eq!(empty, "timed out");
    }
}
