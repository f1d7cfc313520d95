//! Tool invocation under cancellation supervision.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, RunnerError};
use crate::stage::ToolCommand;

/// Default time a cancelled child gets to exit after being killed.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(10);

/// Output of one tool invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Step label.
    pub label: String,

    /// Exit code (0 = success, -1 when killed by a signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl ToolOutput {
    pub fn new(label: &str, exit_code: i32, stdout: &str, stderr: &str) -> Self {
        Self {
            label: label.to_string(),
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            duration_ms: 0,
        }
    }

    /// Whether this step passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (true, true) => String::new(),
            (false, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Runs tool commands. The seam between check logic and real subprocesses.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Run `command` to completion.
    ///
    /// A non-zero exit is a normal [`ToolOutput`]; only launch failures and
    /// cancellation are errors.
    async fn invoke(&self, command: &ToolCommand, cancel: &CancellationToken) -> Result<ToolOutput>;
}

/// Subprocess invoker backed by `tokio::process`.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    grace: Duration,
}

impl Default for ProcessInvoker {
    fn default() -> Self {
        Self {
            grace: DEFAULT_CANCEL_GRACE,
        }
    }
}

impl ProcessInvoker {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }
}

#[async_trait]
impl ToolInvoker for ProcessInvoker {
    async fn invoke(&self, command: &ToolCommand, cancel: &CancellationToken) -> Result<ToolOutput> {
        if cancel.is_cancelled() {
            return Err(RunnerError::Cancelled);
        }

        let start = Instant::now();
        let launch_error = |source| RunnerError::Launch {
            program: command.program.clone(),
            source,
        };

        debug!(step = %command.label, command = %command, "Spawning tool");
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(&command.cwd)
            .envs(&command.envs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(launch_error)?;

        let stdout = tokio::spawn(read_all(child.stdout.take()));
        let stderr = tokio::spawn(read_all(child.stderr.take()));

        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            status = child.wait() => Some(status),
        };

        let Some(status) = waited else {
            if let Err(e) = child.start_kill() {
                debug!(step = %command.label, error = %e, "Child already gone");
            }
            match tokio::time::timeout(self.grace, child.wait()).await {
                Ok(_) => debug!(step = %command.label, "Cancelled tool exited"),
                Err(_) => warn!(
                    step = %command.label,
                    grace_secs = self.grace.as_secs(),
                    "Cancelled tool did not exit within grace period"
                ),
            }
            return Err(RunnerError::Cancelled);
        };

        let status = status.map_err(launch_error)?;
        let stdout = stdout.await.unwrap_or_default();
        let stderr = stderr.await.unwrap_or_default();

        Ok(ToolOutput {
            label: command.label.clone(),
            exit_code: status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        if let Err(e) = reader.read_to_end(&mut buf).await {
            debug!(error = %e, "Failed reading tool output");
        }
    }
    buf
}
