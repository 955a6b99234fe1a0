//! Subprocess execution bound to a run scope.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::scope::{Interrupt, RunScope};

const STDERR_TRUNCATED_MARKER: &str = "\n... (stderr truncated)";

/// How long stderr may keep draining once the worker has exited.
const STDERR_DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
}

#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stderr: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed waiting for process: {0}")]
    Wait(#[from] std::io::Error),
    #[error("process cancelled")]
    Cancelled,
    #[error("process timed out")]
    TimedOut,
}

impl From<Interrupt> for ProcessError {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Cancelled => ProcessError::Cancelled,
            Interrupt::TimedOut => ProcessError::TimedOut,
        }
    }
}

#[async_trait]
pub trait SubprocessRunner: Send + Sync {
    /// Run `command` to completion with `stdin` as its entire standard input.
    ///
    /// The process is killed if `scope` is cancelled or its deadline passes
    /// before it exits.
    async fn run(
        &self,
        scope: &RunScope,
        command: WorkerCommand,
        stdin: Vec<u8>,
    ) -> Result<ProcessOutput, ProcessError>;
}

/// Runs commands with `tokio::process`, keeping at most `stderr_limit` bytes
/// of standard error.
#[derive(Debug, Clone)]
pub struct TokioSubprocessRunner {
    stderr_limit: usize,
}

impl TokioSubprocessRunner {
    pub fn new(stderr_limit: usize) -> Self {
        Self { stderr_limit }
    }
}

#[async_trait]
impl SubprocessRunner for TokioSubprocessRunner {
    async fn run(
        &self,
        scope: &RunScope,
        command: WorkerCommand,
        stdin: Vec<u8>,
    ) -> Result<ProcessOutput, ProcessError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.current_dir {
            cmd.current_dir(dir);
        }
        // Worker leads its own process group.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: command.program.clone(),
            source,
        })?;
        let pgid = child.id();
        debug!(program = %command.program, pid = ?pgid, "worker process spawned");

        // Feed stdin from its own task so a worker that never reads cannot
        // stall the wait below. Dropping the handle closes the pipe.
        if let Some(mut pipe) = child.stdin.take() {
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(&stdin).await {
                    warn!(error = %e, "failed to write worker stdin");
                }
            });
        }

        let captured = Arc::new(Mutex::new(StderrBuffer::default()));
        let mut drain = child.stderr.take().map(|pipe| {
            let limit = self.stderr_limit;
            let captured = Arc::clone(&captured);
            tokio::spawn(async move { drain_bounded(pipe, limit, &captured).await })
        });

        let status = match scope.bound(child.wait()).await {
            Ok(status) => status?,
            Err(interrupt) => {
                kill_group(pgid);
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill worker process");
                }
                if let Some(task) = drain {
                    task.abort();
                }
                return Err(interrupt.into());
            }
        };

        // Anything the worker left running in the background goes with it.
        kill_group(pgid);

        if let Some(task) = drain.as_mut() {
            if tokio::time::timeout(STDERR_DRAIN_GRACE, task).await.is_err() {
                warn!("worker stderr still open after exit, keeping partial output");
            }
        }
        if let Some(task) = drain {
            task.abort();
        }

        Ok(ProcessOutput {
            status,
            stderr: take_captured(&captured),
        })
    }
}

/// Prefix of a stream, capped at a byte limit.
#[derive(Debug, Default)]
struct StderrBuffer {
    kept: Vec<u8>,
    truncated: bool,
}

impl StderrBuffer {
    fn push(&mut self, chunk: &[u8], limit: usize) {
        let room = limit.saturating_sub(self.kept.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.kept.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    fn into_bytes(mut self) -> Vec<u8> {
        if self.truncated {
            self.kept.extend_from_slice(STDERR_TRUNCATED_MARKER.as_bytes());
        }
        self.kept
    }
}

fn take_captured(captured: &Mutex<StderrBuffer>) -> Vec<u8> {
    let buffer = match captured.lock() {
        Ok(mut guard) => std::mem::take(&mut *guard),
        Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
    };
    buffer.into_bytes()
}

/// Drain `reader` to EOF into `captured`, keeping the first `limit` bytes.
async fn drain_bounded<R>(mut reader: R, limit: usize, captured: &Mutex<StderrBuffer>)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => match captured.lock() {
                Ok(mut buffer) => buffer.push(&chunk[..n], limit),
                Err(poisoned) => poisoned.into_inner().push(&chunk[..n], limit),
            },
            Err(e) => {
                warn!(error = %e, "failed to read worker stderr");
                break;
            }
        }
    }
}

/// SIGKILL every process left in the worker's group.
#[cfg(unix)]
fn kill_group(pgid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pgid) = pgid else {
        return;
    };
    match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
        Ok(()) => debug!(pgid, "worker process group killed"),
        Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid, error = %e, "failed to kill worker process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: Option<u32>) {}
