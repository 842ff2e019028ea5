//! Out-of-process shell command execution.
//!
//! Commands are handed to the host shell verbatim. Nothing here inspects or
//! rejects command text: whoever can reach [`CommandExecutor::run`] can run
//! anything the service account can. Gate access before calling it.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::limits::{CommandLimits, LimitedBuffer};
use crate::runtime::{ERROR_MARKER, ExecutionResult};

/// Appended to output that hit [`CommandLimits::max_output_bytes`].
pub const TRUNCATION_NOTICE: &str = "\n[output truncated]\n";

/// Why a command produced no normal result.
#[derive(Debug, thiserror::Error)]
enum CommandFault {
    #[error("failed to spawn `{shell}`: {source}")]
    Spawn {
        shell: String,
        source: std::io::Error,
    },
    #[error("failed to wait for command: {0}")]
    Wait(std::io::Error),
    #[error("command timed out after {}ms and was terminated", .0.as_millis())]
    Timeout(Duration),
}

/// Spawns shell commands with a hard wall-clock timeout.
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor {
    limits: CommandLimits,
}

impl CommandExecutor {
    /// Create an executor with the given limits.
    pub fn new(limits: CommandLimits) -> Self {
        Self { limits }
    }

    /// The configured limits.
    pub fn limits(&self) -> &CommandLimits {
        &self.limits
    }

    /// Run `command` with the configured timeout.
    pub async fn run(&self, command: &str) -> ExecutionResult {
        self.run_with_timeout(command, self.limits.timeout).await
    }

    /// Run `command` through the shell, killing it after `timeout`.
    ///
    /// Output is stdout followed by stderr, decoded lossily. A non-zero exit
    /// status still counts as a completed run; only spawn failures and
    /// timeouts produce an unsuccessful result.
    pub async fn run_with_timeout(&self, command: &str, timeout: Duration) -> ExecutionResult {
        let start = Instant::now();
        match self.spawn_and_collect(command, timeout).await {
            Ok((output, exit_code, truncated)) => {
                let elapsed = start.elapsed();
                tracing::debug!(
                    exit_code = ?exit_code,
                    truncated,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "command finished"
                );
                ExecutionResult {
                    output,
                    succeeded: true,
                    exit_code,
                    truncated,
                    elapsed,
                }
            }
            Err(fault) => {
                tracing::debug!(fault = %fault, "command faulted");
                ExecutionResult {
                    output: format!("{ERROR_MARKER}{fault}"),
                    succeeded: false,
                    exit_code: None,
                    truncated: false,
                    elapsed: start.elapsed(),
                }
            }
        }
    }

    async fn spawn_and_collect(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<(String, Option<i32>, bool), CommandFault> {
        let mut cmd = Command::new(&self.limits.shell);
        cmd.arg("-c").arg(command);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // Kill child on drop so a cancelled caller leaves no orphan behind
        cmd.kill_on_drop(true);
        // Own process group, so a timeout takes down grandchildren too
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| CommandFault::Spawn {
            shell: self.limits.shell.clone(),
            source,
        })?;
        // Taken now: once the shell is reaped `child.id()` is gone, but the
        // group it led can still hold background jobs.
        let pid = child.id();

        let per_stream_limit = self.limits.max_output_bytes / 2;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let collected = tokio::time::timeout(timeout, async {
            let (stdout, stderr, status) = tokio::join!(
                drain(stdout, per_stream_limit),
                drain(stderr, per_stream_limit),
                child.wait()
            );
            status.map(|status| (stdout, stderr, status))
        })
        .await;

        match collected {
            Ok(Ok((stdout, stderr, status))) => {
                let truncated = stdout.was_truncated() || stderr.was_truncated();
                let mut bytes = stdout.into_bytes();
                bytes.extend_from_slice(&stderr.into_bytes());
                let mut output = String::from_utf8_lossy(&bytes).into_owned();
                if truncated {
                    output.push_str(TRUNCATION_NOTICE);
                }
                Ok((output, status.code(), truncated))
            }
            Ok(Err(e)) => Err(CommandFault::Wait(e)),
            Err(_) => {
                terminate(&mut child, pid).await;
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "command timed out");
                Err(CommandFault::Timeout(timeout))
            }
        }
    }
}

/// Read a pipe to EOF, keeping at most `limit` bytes.
async fn drain<R>(pipe: Option<R>, limit: usize) -> LimitedBuffer
where
    R: AsyncRead + Unpin,
{
    let mut buffer = LimitedBuffer::new(limit);
    let Some(mut pipe) = pipe else {
        return buffer;
    };

    let mut chunk = vec![0u8; 8 * 1024];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                buffer.write(&chunk[..n]);
            }
        }
    }
    buffer
}

/// Kill the process group led by `pid`, then reap the child.
async fn terminate(child: &mut tokio::process::Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        kill_group(pid);
    }
    let _ = child.kill().await;
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    // SAFETY: killpg only sends a signal; the group id is the child's pid
    // because it was spawned with process_group(0).
    unsafe {
        libc::killpg(pid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}
