//! Parent half of sandboxed execution.
//!
//! The executor never restricts its own process: it re-executes the current
//! binary with the [`SANDBOX_EXEC_SUBCOMMAND`] marker and hands it a
//! [`SandboxedCommand`] over stdin. The child installs the Landlock ruleset
//! and execs the task command in place, so the restriction applies to the
//! command and all of its descendants while the parent keeps full
//! filesystem access for other tasks.

use crate::runner::Coordinator;
use crate::sandbox::{SandboxedCommand, SANDBOX_EXEC_SUBCOMMAND};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tracing::{debug, instrument, warn};

/// How long a cancelled child gets between SIGTERM and SIGKILL.
const TERMINATION_GRACE: Duration = Duration::from_secs(5);

/// How often a waiting executor rechecks the coordinator.
const CANCELLATION_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The captured outcome of one task command.
#[derive(Clone, Debug)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// How the runner executes one prepared command. The production
/// implementation is [`SandboxedExecutor`]; tests substitute stubs.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        command: SandboxedCommand,
        coordinator: &Coordinator,
    ) -> Result<ExecResult, ExecutorError>;
}

/// Runs task commands inside the filesystem sandbox.
#[derive(Clone, Debug, Default)]
pub struct SandboxedExecutor;

impl SandboxedExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Whether commands will actually be restricted on this host.
    pub fn sandbox_supported() -> bool {
        crate::sandbox::landlock::is_supported()
    }
}

#[async_trait]
impl Executor for SandboxedExecutor {
    #[instrument(name = "SandboxedExecutor::execute", skip(self, command, coordinator), fields(command = %command.name))]
    async fn execute(
        &self,
        command: SandboxedCommand,
        coordinator: &Coordinator,
    ) -> Result<ExecResult, ExecutorError> {
        let exe = std::env::current_exe().map_err(ExecutorError::CurrentExe)?;

        let start = Utc::now();
        let mut child = tokio::process::Command::new(exe)
            .arg(SANDBOX_EXEC_SUBCOMMAND)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(ExecutorError::Spawn)?;

        let mut record = vec![];
        command
            .write_to(&mut record)
            .map_err(ExecutorError::WriteCommand)?;

        let mut stdin = child.stdin.take().expect("child stdin is piped");
        stdin
            .write_all(&record)
            .await
            .map_err(ExecutorError::WriteCommand)?;
        drop(stdin);

        let mut stdout_pipe = child.stdout.take().expect("child stdout is piped");
        let mut stderr_pipe = child.stderr.take().expect("child stderr is piped");
        let stdout_task = tokio::spawn(async move {
            let mut buf = vec![];
            let _ = stdout_pipe.read_to_end(&mut buf).await;
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = vec![];
            let _ = stderr_pipe.read_to_end(&mut buf).await;
            buf
        });

        let status = loop {
            if coordinator.should_shutdown() {
                terminate(&mut child).await;
                return Err(ExecutorError::Cancelled);
            }
            match tokio::time::timeout(CANCELLATION_POLL_INTERVAL, child.wait()).await {
                Ok(status) => break status.map_err(ExecutorError::Wait)?,
                Err(_) => continue,
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let exit_code = status.code().unwrap_or(-1);

        debug!(exit_code, "task command finished");

        Ok(ExecResult {
            exit_code,
            stdout,
            stderr,
            start,
            stop: Utc::now(),
        })
    }
}

/// SIGTERM, a grace period, then SIGKILL.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    }

    #[cfg(not(unix))]
    let _ = child.start_kill();

    if tokio::time::timeout(TERMINATION_GRACE, child.wait())
        .await
        .is_err()
    {
        warn!("child ignored SIGTERM, sending SIGKILL");
        let _ = child.kill().await;
    }
}

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("determining the current executable path failed: {0}")]
    CurrentExe(io::Error),

    #[error("spawning the sandbox child process failed: {0}")]
    Spawn(io::Error),

    #[error("passing the command record to the sandbox child failed: {0}")]
    WriteCommand(io::Error),

    #[error("waiting for the task command failed: {0}")]
    Wait(io::Error),

    #[error("the run was cancelled")]
    Cancelled,
}
