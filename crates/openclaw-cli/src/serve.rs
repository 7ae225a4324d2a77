//! NDJSON request loop for `openclaw serve --stdio`.

use miette::{IntoDiagnostic, Result};
use openclaw::model::{ServeRequest, ServeResponse};
use openclaw::runner::RunnerError;
use openclaw::Gateway;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

/// Longest slice of an invalid line echoed back in the error context.
const ECHO_LIMIT: usize = 200;

/// Read requests from `input` until EOF and write one response line per
/// request to `output`.
///
/// Up to `max_concurrency` runs execute at once; reading pauses while all
/// slots are busy. Responses are written as runs finish, so their order may
/// differ from the input; clients correlate by `request_id`.
pub fn run_serve<I, O>(
    gateway: Arc<Gateway>,
    max_concurrency: usize,
    input: I,
    output: O,
) -> Result<()>
where
    I: BufRead,
    O: Write + Send + 'static,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("openclaw-serve")
        .build()
        .into_diagnostic()?;
    let slots = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let (tx, rx) = mpsc::unbounded_channel::<ServeResponse>();
    let writer = std::thread::Builder::new()
        .name("openclaw-serve-writer".to_string())
        .spawn(move || write_responses(rx, output))
        .into_diagnostic()?;

    let mut tasks = JoinSet::new();
    let mut read_error = None;
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                read_error = Some(err);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let request = match parse_request(&line) {
            Ok(request) => request,
            Err(response) => {
                tracing::warn!(request_id = %response.request_id, "rejected invalid request line");
                tx.send(*response).ok();
                continue;
            }
        };
        let permit = runtime
            .block_on(Arc::clone(&slots).acquire_owned())
            .into_diagnostic()?;
        reap_finished(&mut tasks);
        let gateway = Arc::clone(&gateway);
        let tx = tx.clone();
        tasks.spawn_blocking_on(
            move || {
                let result = gateway.execute(&request.run);
                drop(permit);
                tx.send(ServeResponse::completed(request.request_id, result)).ok();
            },
            runtime.handle(),
        );
    }

    runtime.block_on(async {
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "serve task failed");
            }
        }
    });
    drop(tx);

    match writer.join() {
        Ok(result) => result.into_diagnostic()?,
        Err(_) => return Err(miette::miette!("serve writer thread panicked")),
    }
    match read_error {
        Some(err) => Err(RunnerError::io("failed to read request line", err).into()),
        None => Ok(()),
    }
}

/// Collect runs that already finished; returns how many were collected.
/// Only runs in flight keep a handle in `tasks`.
fn reap_finished(tasks: &mut JoinSet<()>) -> usize {
    let mut reaped = 0;
    while let Some(joined) = tasks.try_join_next() {
        if let Err(err) = joined {
            tracing::error!(error = %err, "serve task failed");
        }
        reaped += 1;
    }
    reaped
}

fn write_responses<O: Write>(
    mut rx: mpsc::UnboundedReceiver<ServeResponse>,
    mut output: O,
) -> io::Result<()> {
    while let Some(response) = rx.blocking_recv() {
        let payload = serde_json::to_string(&response)?;
        writeln!(output, "{payload}")?;
        output.flush()?;
    }
    Ok(())
}

/// Parse one input line, or build the `E_PROTOCOL` response for it.
fn parse_request(line: &str) -> std::result::Result<ServeRequest, Box<ServeResponse>> {
    let value: serde_json::Value = serde_json::from_str(line).map_err(|err| {
        let error = RunnerError::protocol(
            "invalid json request",
            serde_json::json!({
                "parse_error": err.to_string(),
                "received": line.chars().take(ECHO_LIMIT).collect::<String>(),
                "example": {
                    "request_id": "1",
                    "run": {"tool": "kubectl", "args": ["get", "pods"], "mode": "plan"}
                },
            }),
        );
        Box::new(ServeResponse::rejected(String::new(), error.to_error_info()))
    })?;
    let request_id = value
        .get("request_id")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string();
    serde_json::from_value(value).map_err(|err| {
        let error = RunnerError::protocol(
            "invalid run request",
            serde_json::json!({
                "parse_error": err.to_string(),
                "expected_schema": {
                    "request_id": "string",
                    "run": {
                        "tool": "string",
                        "args": "array of strings (optional)",
                        "context": "string (optional)",
                        "mode": "explain | plan | apply (optional)",
                        "env": "object of strings (optional)",
                        "cwd": "string (optional)"
                    }
                },
            }),
        );
        Box::new(ServeResponse::rejected(request_id, error.to_error_info()))
    })
}
