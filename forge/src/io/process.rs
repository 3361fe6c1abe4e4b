//! Helpers for running child processes with timeouts, cancellation and bounded output.

use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::types::ProcessOutput;

/// How often a waiting child is checked against its [`CancelToken`].
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long readers may take to reach EOF after the child has exited or been killed.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Cooperative cancellation flag shared between a run and its in-flight process.
///
/// Cancellation is sticky: once cancelled, every later wait on the same token
/// kills its child immediately.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Failure to run a child process to completion.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("output reader thread panicked")]
    ReaderPanicked,
    #[error("output pipe held open by a process outside the command's process group")]
    OutputHeldOpen,
}

impl ProcessError {
    fn io(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| ProcessError::Io { context, source }
    }
}

/// Captured child process output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// `None` when the child was terminated by a signal (including our own kill).
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl CommandOutput {
    pub fn into_process_output(self) -> ProcessOutput {
        ProcessOutput {
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
            exit_code: self.exit_code,
            stdout_truncated: self.stdout_truncated,
            stderr_truncated: self.stderr_truncated,
        }
    }
}

enum WaitOutcome {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
///
/// The child leads its own process group. A timed-out or cancelled child is killed together with
/// everything it spawned, then reaped before this returns. Group members still holding the output
/// pipes after the child exits are killed too.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
    cancel: &CancelToken,
) -> Result<CommandOutput, ProcessError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let program = cmd.get_program().to_string_lossy().into_owned();
    debug!(%program, "spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, %program, "failed to spawn command");
            return Err(ProcessError::Spawn { program, source: e });
        }
    };

    let stdout = child.stdout.take().ok_or_else(|| ProcessError::Io {
        context: "stdout was not piped",
        source: io::Error::from(io::ErrorKind::BrokenPipe),
    })?;
    let stderr = child.stderr.take().ok_or_else(|| ProcessError::Io {
        context: "stderr was not piped",
        source: io::Error::from(io::ErrorKind::BrokenPipe),
    })?;

    let stdout_rx = spawn_reader(stdout, output_limit_bytes);
    let stderr_rx = spawn_reader(stderr, output_limit_bytes);

    let (timed_out, cancelled) = match wait_or_cancel(&mut child, timeout, cancel)? {
        WaitOutcome::Exited(status) => {
            let (stdout, stdout_truncated) = collect_output(&mut child, &stdout_rx)?;
            let (stderr, stderr_truncated) = collect_output(&mut child, &stderr_rx)?;
            return Ok(finish(CommandOutput {
                exit_code: status.code(),
                stdout,
                stderr,
                stdout_truncated,
                stderr_truncated,
                timed_out: false,
                cancelled: false,
            }));
        }
        WaitOutcome::TimedOut => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing process group"
            );
            (true, false)
        }
        WaitOutcome::Cancelled => {
            warn!("command cancelled, killing process group");
            (false, true)
        }
    };

    kill_and_reap(&mut child)?;
    let (stdout, stdout_truncated) = collect_output(&mut child, &stdout_rx)?;
    let (stderr, stderr_truncated) = collect_output(&mut child, &stderr_rx)?;
    Ok(finish(CommandOutput {
        exit_code: None,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        cancelled,
    }))
}

fn finish(output: CommandOutput) -> CommandOutput {
    if output.stdout_truncated > 0 || output.stderr_truncated > 0 {
        warn!(
            stdout_truncated = output.stdout_truncated,
            stderr_truncated = output.stderr_truncated,
            "output truncated"
        );
    }
    debug!(
        exit_code = ?output.exit_code,
        timed_out = output.timed_out,
        cancelled = output.cancelled,
        "command finished"
    );
    output
}

/// Wait in short slices so cancellation is noticed without waiting out the full timeout.
fn wait_or_cancel(
    child: &mut Child,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<WaitOutcome, ProcessError> {
    let deadline = Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            return Ok(WaitOutcome::Cancelled);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(WaitOutcome::TimedOut);
        }
        let slice = remaining.min(CANCEL_POLL_INTERVAL);
        if let Some(status) = child
            .wait_timeout(slice)
            .map_err(ProcessError::io("wait for command"))?
        {
            return Ok(WaitOutcome::Exited(status));
        }
    }
}

fn kill_and_reap(child: &mut Child) -> Result<(), ProcessError> {
    kill_process_group(child)?;
    child
        .wait()
        .map_err(ProcessError::io("wait command after kill"))?;
    Ok(())
}

/// SIGKILL every process in the group led by `child`.
#[cfg(unix)]
fn kill_process_group(child: &mut Child) -> Result<(), ProcessError> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let leader = i32::try_from(child.id()).map_err(|err| ProcessError::Io {
        context: "process id out of range",
        source: io::Error::other(err),
    })?;
    match killpg(Pid::from_raw(leader), Signal::SIGKILL) {
        // Group already empty.
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(ProcessError::Io {
            context: "kill process group",
            source: io::Error::from(errno),
        }),
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) -> Result<(), ProcessError> {
    child.kill().map_err(ProcessError::io("kill command"))
}

type StreamResult = io::Result<(Vec<u8>, usize)>;

fn spawn_reader<R: Read + Send + 'static>(reader: R, limit: usize) -> Receiver<StreamResult> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(read_stream_limited(reader, limit));
    });
    rx
}

/// Wait for a reader to hit EOF once the child is gone.
///
/// A pipe still open after [`PIPE_DRAIN_GRACE`] is held by a process the child left behind; the
/// child's process group is killed and the reader gets one more grace period.
fn collect_output(
    child: &mut Child,
    rx: &Receiver<StreamResult>,
) -> Result<(Vec<u8>, usize), ProcessError> {
    match rx.recv_timeout(PIPE_DRAIN_GRACE) {
        Ok(result) => return result.map_err(ProcessError::io("read output")),
        Err(RecvTimeoutError::Disconnected) => return Err(ProcessError::ReaderPanicked),
        Err(RecvTimeoutError::Timeout) => {}
    }
    warn!("output pipe held open after exit, killing process group");
    kill_process_group(child)?;
    match rx.recv_timeout(PIPE_DRAIN_GRACE) {
        Ok(result) => result.map_err(ProcessError::io("read output")),
        Err(RecvTimeoutError::Disconnected) => Err(ProcessError::ReaderPanicked),
        Err(RecvTimeoutError::Timeout) => Err(ProcessError::OutputHeldOpen),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> io::Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}
