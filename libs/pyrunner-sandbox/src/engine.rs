/// Execution Engine - Bounded Interpreter Runs
///
/// **Core Responsibility:**
/// Run the interpreter once against a prepared workspace and capture raw
/// stdout/stderr plus how the process ended.
///
/// **Architectural Boundary:**
/// - Engine knows HOW to run (spawn, pipes, deadline, kill)
/// - Engine does NOT decide what counts as an error for the caller
/// - Engine returns raw streams for the normalizer to shape
///
/// **Safety Guarantees:**
/// - Hard wall-clock timeout; on expiry the whole process group is killed
/// - The process group is also killed when the interpreter exits on its own,
///   so background children never outlive the run
/// - Partial output captured before a kill is kept
/// - Each stream is capped; the excess is drained and dropped so the child
///   never stalls on a full pipe
/// - Spawn failures are reported separately from script failures, without
///   host paths
/// - The child (and on unix its process group) is killed if the run is
///   cancelled mid-flight

use crate::workspace::Workspace;
use pyrunner_common::config::RunnerConfig;
use pyrunner_common::types::{CapturedStream, ExecutionResult, Termination};
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Kills the child's process group exactly once: explicitly when the
/// interpreter exits or times out, otherwise when the run is abandoned.
struct ProcessGroupGuard {
    pid: Option<u32>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self { pid }
    }

    fn kill(&mut self) {
        if let Some(pid) = self.pid.take() {
            kill_process_group(pid);
        }
    }

}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let Ok(pgid) = i32::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) with a negative pid signals the group spawned with
    // process_group(0); it touches no memory owned by this process.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc == -1 {
        let err = io::Error::last_os_error();
        // ESRCH: group already gone
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pgid, error = %err, "Failed to kill process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

/// Read a pipe to EOF, keeping at most `limit` bytes.
/// Stops early (with what it has) once `stop` flips to true.
async fn capture_stream<R>(mut pipe: R, limit: usize, mut stop: watch::Receiver<bool>) -> CapturedStream
where
    R: AsyncRead + Unpin,
{
    let mut captured = Vec::new();
    let mut total = 0usize;
    let mut buf = vec![0u8; READ_CHUNK_BYTES];

    loop {
        tokio::select! {
            read = pipe.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    total += n;
                    let room = limit.saturating_sub(captured.len());
                    captured.extend_from_slice(&buf[..n.min(room)]);
                }
                Err(e) => {
                    debug!(error = %e, "Output pipe read failed");
                    break;
                }
            },
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }

    if total > limit {
        // Don't leave half a character at the cut
        if let Err(e) = std::str::from_utf8(&captured) {
            if e.error_len().is_none() {
                captured.truncate(e.valid_up_to());
            }
        }
    }

    CapturedStream {
        text: String::from_utf8_lossy(&captured).into_owned(),
        truncated_at: (total > limit).then_some(limit),
    }
}

async fn join_capture(task: Option<JoinHandle<CapturedStream>>) -> CapturedStream {
    match task {
        Some(handle) => handle.await.unwrap_or_else(|e| {
            error!(error = %e, "Output capture task failed");
            CapturedStream::default()
        }),
        None => CapturedStream::default(),
    }
}

/// Describe a spawn failure by error kind and executable name only
fn describe_spawn_error(interpreter: &str, err: &io::Error) -> String {
    let name = Path::new(interpreter)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| interpreter.to_string());

    match err.kind() {
        io::ErrorKind::NotFound => format!("Interpreter '{}' was not found", name),
        io::ErrorKind::PermissionDenied => format!("Interpreter '{}' is not executable", name),
        kind => format!("Interpreter '{}' could not be started ({})", name, kind),
    }
}

/// Runs scripts with a single configured interpreter
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    interpreter: String,
    max_output_bytes: usize,
    kill_grace: Duration,
}

impl ExecutionEngine {
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            max_output_bytes: config.max_output_bytes,
            kill_grace: config.kill_grace(),
        }
    }

    fn command(&self, workspace: &Workspace) -> Command {
        let mut command = Command::new(&self.interpreter);
        // Relative script name keeps host paths out of tracebacks
        command
            .arg(workspace.script_name())
            .current_dir(workspace.root_path())
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        command
    }

    /// Run the workspace's script once with a hard wall-clock limit.
    ///
    /// Never fails: spawn problems come back as `Termination::SpawnFailed`.
    #[instrument(
        skip(self, workspace),
        fields(workspace_id = %workspace.id(), timeout_ms = timeout.as_millis() as u64)
    )]
    pub async fn run(&self, workspace: &Workspace, timeout: Duration) -> ExecutionResult {
        let start_time = Instant::now();

        let mut child = match self.command(workspace).spawn() {
            Ok(child) => child,
            Err(e) => {
                let reason = describe_spawn_error(&self.interpreter, &e);
                error!(interpreter = %self.interpreter, error = %e, "Failed to spawn interpreter");
                return ExecutionResult {
                    stdout: CapturedStream::default(),
                    stderr: CapturedStream::default(),
                    termination: Termination::SpawnFailed { reason },
                    execution_time_ms: start_time.elapsed().as_millis() as u64,
                };
            }
        };

        let pid = child.id();
        let mut group = ProcessGroupGuard::new(pid);
        let (stop_tx, stop_rx) = watch::channel(false);

        let stdout_task = child
            .stdout
            .take()
            .map(|pipe| tokio::spawn(capture_stream(pipe, self.max_output_bytes, stop_rx.clone())));
        let stderr_task = child
            .stderr
            .take()
            .map(|pipe| tokio::spawn(capture_stream(pipe, self.max_output_bytes, stop_rx.clone())));

        let termination = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                // Nothing the script started may outlive the run. Members
                // still alive pin the group id, so it cannot have been
                // recycled; an empty group just yields ESRCH.
                group.kill();
                Termination::Completed {
                    exit_code: status.code(),
                }
            }
            Ok(Err(e)) => {
                error!(error = %e, "Failed to wait for interpreter");
                self.terminate(&mut child, &mut group).await;
                Termination::SpawnFailed {
                    reason: "Lost track of the interpreter process".to_string(),
                }
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Execution timed out, killing interpreter");
                self.terminate(&mut child, &mut group).await;
                Termination::TimedOut {
                    timeout_ms: timeout.as_millis() as u64,
                }
            }
        };

        let execution_time_ms = start_time.elapsed().as_millis() as u64;

        // A descendant that left the group can still hold the pipes open.
        // Kill the group again and give readers one more grace period.
        let collect = async { tokio::join!(join_capture(stdout_task), join_capture(stderr_task)) };
        tokio::pin!(collect);
        let first_wait = tokio::time::timeout(self.kill_grace, &mut collect).await;
        let (stdout, stderr) = match first_wait {
            Ok(captured) => captured,
            Err(_) => {
                debug!("Output pipes still open after grace period");
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                let second_wait = tokio::time::timeout(self.kill_grace, &mut collect).await;
                match second_wait {
                    Ok(captured) => captured,
                    Err(_) => {
                        let _ = stop_tx.send(true);
                        collect.await
                    }
                }
            }
        };

        match &termination {
            Termination::Completed { exit_code } => info!(
                exit_code = ?exit_code,
                execution_ms = execution_time_ms,
                stdout_bytes = stdout.text.len(),
                stderr_bytes = stderr.text.len(),
                "Interpreter finished"
            ),
            other => warn!(
                termination = %other.kind(),
                execution_ms = execution_time_ms,
                "Interpreter did not complete"
            ),
        }

        ExecutionResult {
            stdout,
            stderr,
            termination,
            execution_time_ms,
        }
    }

    async fn terminate(&self, child: &mut Child, group: &mut ProcessGroupGuard) {
        group.kill();
        // kill() also reaps the child
        if let Err(e) = child.kill().await {
            debug!(error = %e, "Interpreter already exited");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receiver() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test]
    async fn test_capture_keeps_everything_under_limit() {
        let (_tx, rx) = receiver();
        let captured = capture_stream(&b"hello\nworld\n"[..], 1024, rx).await;
        assert_eq!(captured.text, "hello\nworld\n");
        assert_eq!(captured.truncated_at, None);
    }

    #[tokio::test]
    async fn test_capture_truncates_and_drains() {
        let (_tx, rx) = receiver();
        let data = vec![b'a'; 20_000];
        let captured = capture_stream(&data[..], 100, rx).await;
        assert_eq!(captured.text.len(), 100);
        assert_eq!(captured.truncated_at, Some(100));
    }

    #[tokio::test]
    async fn test_capture_truncation_keeps_whole_characters() {
        let (_tx, rx) = receiver();
        // "é" is two bytes; a cap of 4 lands inside it
        let captured = capture_stream("aaaé tail".as_bytes(), 4, rx).await;
        assert_eq!(captured.text, "aaa");
        assert!(!captured.text.contains('\u{FFFD}'));
        assert_eq!(captured.truncated_at, Some(4));
    }

    #[tokio::test]
    async fn test_capture_stops_on_signal() {
        let (tx, rx) = receiver();
        let (mut writer, reader) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut writer, b"partial").await.unwrap();

        let task = tokio::spawn(capture_stream(reader, 1024, rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let captured = task.await.unwrap();
        assert_eq!(captured.text, "partial");
        drop(writer);
    }

    #[test]
    fn test_spawn_error_hides_directories() {
        let err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let message = describe_spawn_error("/opt/secret/bin/python3", &err);
        assert_eq!(message, "Interpreter 'python3' was not found");
        assert!(!message.contains("/opt"));

        let err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(describe_spawn_error("py", &err).contains("not executable"));
    }
}
