use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;

use super::error::ProcessError;

/// How long a drain may keep running after the child was killed on timeout.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Error(i32),
    Signal(i32),
    Timeout,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Success => Some(0),
            ExitStatus::Error(code) => Some(*code),
            _ => None,
        }
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError>;
}

pub struct TokioProcessRunner;

impl TokioProcessRunner {
    /// Configure the command with environment, working directory and piped
    /// stdio. Explicit environment entries are applied on top of the
    /// inherited environment, so secrets handed to the child never leak
    /// into the parent process.
    fn configure_command(command: &ProcessCommand) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args);

        for (key, value) in &command.env {
            cmd.env(key, value);
        }

        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        cmd
    }

    fn log_command_start(command: &ProcessCommand) {
        tracing::debug!(
            "Executing subprocess: {} {}",
            command.program,
            command.args.join(" ")
        );
        if !command.env.is_empty() {
            // Values may carry key material; log names only.
            let keys: Vec<&str> = command.env.keys().map(String::as_str).collect();
            tracing::trace!("Environment variable overrides: {}", keys.join(", "));
        }
    }

    fn map_spawn_error(error: std::io::Error, command: &ProcessCommand) -> ProcessError {
        if error.kind() == std::io::ErrorKind::NotFound {
            ProcessError::CommandNotFound(command.program.clone())
        } else {
            ProcessError::SpawnFailed {
                command: format!("{} {}", command.program, command.args.join(" ")),
                source: error,
            }
        }
    }

    /// Spawn a task draining one output stream to completion. Draining runs
    /// concurrently with the wait for process exit; a full pipe buffer on
    /// either stream would otherwise deadlock the child.
    fn spawn_drain<R>(mut stream: R) -> JoinHandle<String>
    where
        R: tokio::io::AsyncRead + Send + Unpin + 'static,
    {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Err(e) = stream.read_to_end(&mut buf).await {
                tracing::warn!("Error reading process output: {}", e);
            }
            String::from_utf8_lossy(&buf).into_owned()
        })
    }

    /// Join one drain task. Without a bound the join waits for end-of-stream;
    /// with a bound (timeout path) an overdue drain is abandoned, since an
    /// orphaned grandchild inheriting the pipe could hold it open forever.
    async fn join_drain(
        mut task: JoinHandle<String>,
        bound: Option<Duration>,
        stream: &'static str,
    ) -> Result<String, ProcessError> {
        if let Some(limit) = bound {
            return match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined.map_err(|_| ProcessError::DrainInterrupted(stream)),
                Err(_) => {
                    task.abort();
                    tracing::warn!("Abandoning {} drain held open past process kill", stream);
                    Ok(String::new())
                }
            };
        }
        task.await
            .map_err(|_| ProcessError::DrainInterrupted(stream))
    }

    fn parse_exit_status(status: std::process::ExitStatus) -> ExitStatus {
        if status.success() {
            ExitStatus::Success
        } else if let Some(code) = status.code() {
            ExitStatus::Error(code)
        } else {
            Self::parse_signal_status(status)
        }
    }

    #[cfg(unix)]
    fn parse_signal_status(status: std::process::ExitStatus) -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            ExitStatus::Signal(signal)
        } else {
            ExitStatus::Error(1)
        }
    }

    #[cfg(not(unix))]
    fn parse_signal_status(_status: std::process::ExitStatus) -> ExitStatus {
        ExitStatus::Error(1)
    }

    fn log_result(result: &ProcessOutput, command: &ProcessCommand) {
        let command_str = format!("{} {}", command.program, command.args.join(" "));
        match &result.status {
            ExitStatus::Success => {
                tracing::debug!(
                    "Subprocess completed successfully in {:?}: {}",
                    result.duration,
                    command_str
                );
            }
            ExitStatus::Error(code) => {
                tracing::debug!(
                    "Subprocess failed with exit code {} in {:?}: {}",
                    code,
                    result.duration,
                    command_str
                );
                if !result.stderr.is_empty() {
                    tracing::trace!("Stderr: {}", result.stderr);
                }
            }
            ExitStatus::Signal(signal) => {
                tracing::warn!(
                    "Subprocess terminated by signal {} in {:?}: {}",
                    signal,
                    result.duration,
                    command_str
                );
            }
            ExitStatus::Timeout => {
                tracing::warn!(
                    "Subprocess timed out after {:?}: {}",
                    result.duration,
                    command_str
                );
            }
        }
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        let start = std::time::Instant::now();
        Self::log_command_start(&command);

        let mut cmd = Self::configure_command(&command);
        let mut child = cmd
            .spawn()
            .map_err(|e| Self::map_spawn_error(e, &command))?;

        let stdout = child.stdout.take().ok_or_else(|| ProcessError::Io(
            std::io::Error::other("failed to capture stdout"),
        ))?;
        let stderr = child.stderr.take().ok_or_else(|| ProcessError::Io(
            std::io::Error::other("failed to capture stderr"),
        ))?;

        let stdout_task = Self::spawn_drain(stdout);
        let stderr_task = Self::spawn_drain(stderr);

        let (status, drain_bound) = match command.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(result) => (
                    Self::parse_exit_status(result.map_err(ProcessError::Io)?),
                    None,
                ),
                Err(_) => {
                    // Forcible termination. The kill reaps the direct child
                    // only; a grandchild may keep the pipes open, so the
                    // drain joins below are bounded rather than unbounded.
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    (ExitStatus::Timeout, Some(DRAIN_GRACE))
                }
            },
            None => (
                Self::parse_exit_status(child.wait().await.map_err(ProcessError::Io)?),
                None,
            ),
        };

        // Both drains must complete before the exit status is interpreted.
        let stdout = Self::join_drain(stdout_task, drain_bound, "stdout").await?;
        let stderr = Self::join_drain(stderr_task, drain_bound, "stderr").await?;

        let result = ProcessOutput {
            status,
            stdout,
            stderr,
            duration: start.elapsed(),
        };
        Self::log_result(&result, &command);

        Ok(result)
    }
}
