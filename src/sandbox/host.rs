//! Host sandbox: commands run directly on the host machine.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use super::{ExecutionResult, SandboxState, read_pipe};
use crate::error::{PoolError, Result};

pub struct HostSandbox {
    workspace: PathBuf,
    name: String,
    state: SandboxState,
}

impl HostSandbox {
    pub fn new(workspace: PathBuf, name: &str) -> Self {
        Self {
            workspace,
            name: name.to_string(),
            state: SandboxState::Prepared,
        }
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.state == SandboxState::Stopped {
            return Err(PoolError::SandboxStopped);
        }
        tokio::fs::create_dir_all(&self.workspace).await?;
        self.state = SandboxState::Running;
        info!(name = %self.name, workspace = %self.workspace.display(), "Host sandbox started");
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.state = SandboxState::Stopped;
        debug!(name = %self.name, "Host sandbox stopped");
        Ok(())
    }

    pub async fn execute(&self, command: &str, timeout: Duration) -> Result<ExecutionResult> {
        if self.state != SandboxState::Running {
            return Err(PoolError::SandboxNotStarted);
        }

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout_task = tokio::spawn(read_pipe(child.stdout.take()));
        let stderr_task = tokio::spawn(read_pipe(child.stderr.take()));

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => {
                let status = status?;
                Ok(ExecutionResult {
                    stdout: stdout_task.await.unwrap_or_default(),
                    stderr: stderr_task.await.unwrap_or_default(),
                    exit_code: status.code().unwrap_or(-1),
                })
            }
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                stdout_task.abort();
                stderr_task.abort();
                Ok(ExecutionResult::timed_out(timeout))
            }
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn is_running(&self) -> bool {
        self.state == SandboxState::Running
    }
}
