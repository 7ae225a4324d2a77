use super::{Completion, ErrorCode, Invocation, ProcessRunner, RunnerError, RunnerResult, Termination};
use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How long to wait for the group to disappear after SIGKILL.
const KILL_REAP_TIMEOUT: Duration = Duration::from_millis(200);
/// How long output readers get to drain once the tool or its group is gone.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);
const READ_CHUNK: usize = 8192;

/// Runs tools as real child processes.
///
/// On unix each child leads its own process group, so termination reaches
/// every descendant that did not explicitly leave the group.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemRunner;

impl SystemRunner {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ProcessRunner for SystemRunner {
    fn invoke(&self, invocation: &Invocation) -> RunnerResult<Completion> {
        let started = Instant::now();
        let deadline = started.checked_add(invocation.timeout);
        let cwd = resolve_cwd(invocation.cwd.as_deref())?;

        let mut child = spawn_child(invocation, cwd)?;
        tracing::debug!(pid = child.id(), program = invocation.program(), "spawned tool");

        let stdout = Capture::shared();
        let stderr = Capture::shared();
        let readers = match start_readers(&mut child, &stdout, &stderr, invocation.max_output_bytes)
        {
            Ok(readers) => readers,
            Err(err) => {
                terminate_process_group(&mut child, Duration::ZERO).ok();
                return Err(err);
            }
        };

        let status = match wait_for_exit(&mut child, deadline) {
            Ok(status) => status,
            Err(err) => {
                terminate_process_group(&mut child, Duration::ZERO).ok();
                return Err(err);
            }
        };

        let termination = match status {
            Some(status) => {
                if !wait_for_readers(&readers, exit_drain_deadline(deadline)) {
                    // Descendants still hold the pipes after the drain window.
                    tracing::debug!("output still open after tool exit; killing process group");
                    kill_process_group(&mut child)?;
                }
                termination_from_status(status)
            }
            None => {
                tracing::debug!(
                    timeout_ms = u64::try_from(invocation.timeout.as_millis()).unwrap_or(u64::MAX),
                    "tool exceeded timeout; terminating process group"
                );
                terminate_process_group(&mut child, invocation.grace)?;
                Termination::TimedOut {
                    after: started.elapsed(),
                }
            }
        };

        finish_readers(readers);
        let (stdout, stdout_truncated) = Capture::snapshot(&stdout);
        let (stderr, stderr_truncated) = Capture::snapshot(&stderr);

        Ok(Completion {
            termination,
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
            elapsed: started.elapsed(),
        })
    }
}

fn resolve_cwd(cwd: Option<&Path>) -> RunnerResult<Option<&Path>> {
    let Some(dir) = cwd else {
        return Ok(None);
    };
    match std::fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => Ok(Some(dir)),
        Ok(_) => Err(RunnerError::cwd(
            format!("working directory is not a directory: {}", dir.display()),
            dir.display(),
        )),
        Err(err) => Err(RunnerError::cwd(
            format!("working directory unavailable: {}: {err}", dir.display()),
            dir.display(),
        )),
    }
}

fn spawn_child(invocation: &Invocation, cwd: Option<&Path>) -> RunnerResult<Child> {
    let program = invocation.program();
    if program.is_empty() {
        return Err(RunnerError::new(ErrorCode::Spawn, "missing program", None));
    }

    let mut command = Command::new(program);
    command
        .args(invocation.argv.iter().skip(1))
        .env_clear()
        .envs(&invocation.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    command
        .spawn()
        .map_err(|err| RunnerError::spawn(format!("failed to launch '{program}': {err}"), err))
}

// =============================================================================
// Output capture
// =============================================================================

/// Bytes read from one stream, clipped at the output budget.
#[derive(Debug, Default)]
struct Capture {
    bytes: Vec<u8>,
    truncated: bool,
}

type SharedCapture = Arc<Mutex<Capture>>;

impl Capture {
    fn shared() -> SharedCapture {
        Arc::new(Mutex::new(Self::default()))
    }

    fn push(&mut self, data: &[u8], limit: usize) {
        let room = limit.saturating_sub(self.bytes.len());
        if data.len() > room {
            self.truncated = true;
        }
        let kept = data.get(..room.min(data.len())).unwrap_or_default();
        self.bytes.extend_from_slice(kept);
    }

    fn snapshot(shared: &SharedCapture) -> (String, bool) {
        let guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
        (
            String::from_utf8_lossy(&guard.bytes).into_owned(),
            guard.truncated,
        )
    }
}

fn start_readers(
    child: &mut Child,
    stdout: &SharedCapture,
    stderr: &SharedCapture,
    limit: usize,
) -> RunnerResult<Vec<JoinHandle<()>>> {
    let out = child
        .stdout
        .take()
        .ok_or_else(|| RunnerError::internal("child stdout was not captured"))?;
    let err = child
        .stderr
        .take()
        .ok_or_else(|| RunnerError::internal("child stderr was not captured"))?;
    Ok(vec![
        spawn_reader("openclaw-stdout", out, Arc::clone(stdout), limit)?,
        spawn_reader("openclaw-stderr", err, Arc::clone(stderr), limit)?,
    ])
}

fn spawn_reader<R: Read + Send + 'static>(
    name: &str,
    mut source: R,
    capture: SharedCapture,
    limit: usize,
) -> RunnerResult<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let mut chunk = [0_u8; READ_CHUNK];
            loop {
                match source.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => {
                        let data = chunk.get(..n).unwrap_or_default();
                        capture
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(data, limit);
                    }
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                    Err(_) => break,
                }
            }
        })
        .map_err(|err| RunnerError::io("failed to start output reader", err))
}

/// Wait until every reader has hit end-of-file. Returns `false` if the
/// deadline passed first.
fn wait_for_readers(readers: &[JoinHandle<()>], deadline: Option<Instant>) -> bool {
    loop {
        if readers.iter().all(JoinHandle::is_finished) {
            return true;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return false;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// How long output may stay open once the tool itself has exited: the drain
/// window, cut short by the run deadline.
fn exit_drain_deadline(deadline: Option<Instant>) -> Option<Instant> {
    let drain = Instant::now().checked_add(READER_DRAIN_TIMEOUT);
    match (drain, deadline) {
        (Some(drain), Some(deadline)) => Some(drain.min(deadline)),
        (drain, deadline) => drain.or(deadline),
    }
}

/// Join readers that finish within the drain window; detach the rest.
fn finish_readers(readers: Vec<JoinHandle<()>>) {
    wait_for_readers(&readers, Instant::now().checked_add(READER_DRAIN_TIMEOUT));
    for reader in readers {
        if reader.is_finished() && reader.join().is_err() {
            tracing::warn!("output reader panicked");
        }
    }
}

// =============================================================================
// Process lifecycle
// =============================================================================

/// Poll the child until it exits or the deadline passes.
fn wait_for_exit(child: &mut Child, deadline: Option<Instant>) -> RunnerResult<Option<ExitStatus>> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(Some(status)),
            Ok(None) => {
                if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    return Ok(None);
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(err) => return Err(RunnerError::io("failed to wait for child", err)),
        }
    }
}

fn termination_from_status(status: ExitStatus) -> Termination {
    if let Some(code) = status.code() {
        return Termination::Exited { code };
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Termination::Signaled { signal };
        }
    }
    Termination::Exited { code: 1 }
}

/// SIGTERM the group, wait out the grace period, then SIGKILL whatever is
/// left. The leader is reaped before returning.
fn terminate_process_group(child: &mut Child, grace: Duration) -> RunnerResult<()> {
    #[cfg(unix)]
    {
        let pgid = process_group_id(child)?;
        signal_process_group(pgid, Signal::SIGTERM)?;
        wait_for_exit(child, Instant::now().checked_add(grace))?;
        signal_process_group(pgid, Signal::SIGKILL)?;
        wait_for_exit(child, Instant::now().checked_add(KILL_REAP_TIMEOUT))?;
        Ok(())
    }
    #[cfg(not(unix))]
    {
        kill_process_group(child)?;
        wait_for_exit(child, Instant::now().checked_add(grace))?;
        Ok(())
    }
}

#[cfg(unix)]
#[allow(clippy::needless_pass_by_ref_mut)]
fn kill_process_group(child: &mut Child) -> RunnerResult<()> {
    signal_process_group(process_group_id(child)?, Signal::SIGKILL)
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) -> RunnerResult<()> {
    match child.kill() {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::InvalidInput => Ok(()),
        Err(err) => Err(RunnerError::io("failed to kill child", err)),
    }
}

/// The child was spawned with `process_group(0)`, so its pid is its pgid.
#[cfg(unix)]
fn process_group_id(child: &Child) -> RunnerResult<Pid> {
    i32::try_from(child.id())
        .map(Pid::from_raw)
        .map_err(|_| RunnerError::internal("child pid out of range"))
}

#[cfg(unix)]
fn signal_process_group(pgid: Pid, signal: Signal) -> RunnerResult<()> {
    match killpg(pgid, signal) {
        // ESRCH: the whole group is already gone
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(err) => Err(RunnerError::io("failed to signal process group", err)),
    }
}
