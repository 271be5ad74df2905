//! Container sandbox: a persistent container with the workspace mounted.
//!
//! The container stays alive across commands; each command is executed via
//! `<runtime> exec`. The container is created at start and force-removed
//! at stop.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{ExecutionResult, SandboxState, read_pipe};
use crate::config::ContainerConfig;
use crate::error::{PoolError, Result};
use crate::util::find_in_path;

const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ContainerSandbox {
    workspace: PathBuf,
    config: ContainerConfig,
    runtime: &'static str,
    container_name: String,
    state: SandboxState,
}

impl ContainerSandbox {
    /// Probes for a container runtime; fails with `RuntimeUnavailable`
    /// when neither docker nor podman is on PATH.
    pub fn new(workspace: PathBuf, name: &str, config: ContainerConfig) -> Result<Self> {
        let runtime = detect_runtime()?;
        // Pid suffix isolates concurrent pools on the same host.
        let container_name = format!("agentpool-{}-{}", name, std::process::id());
        Ok(Self {
            workspace,
            config,
            runtime,
            container_name,
            state: SandboxState::Prepared,
        })
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.state == SandboxState::Stopped {
            return Err(PoolError::SandboxStopped);
        }
        tokio::fs::create_dir_all(&self.workspace).await?;

        if self.container_exists().await {
            if self.is_healthy().await {
                info!(container = %self.container_name, "Reusing existing container");
                self.state = SandboxState::Running;
                return Ok(());
            }
            self.remove_container().await;
        }

        let mount = format!("{}:/workspace:rw", self.workspace.display());
        let mut cmd = Command::new(self.runtime);
        cmd.args(["run", "-d", "--name", &self.container_name])
            .args(["--memory", &self.config.memory_limit])
            .args(["--cpus", &self.config.cpu_limit])
            .args(["--security-opt", "no-new-privileges"])
            .args(["-v", &mount])
            .args(["-w", "/workspace"]);

        if let Some(network) = &self.config.network {
            cmd.args(["--network", network]);
        }

        // Keep the container alive between exec calls.
        cmd.args([self.config.image.as_str(), "tail", "-f", "/dev/null"]);

        let output = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(PoolError::SandboxStart(stderr));
        }

        self.state = SandboxState::Running;
        info!(
            container = %self.container_name,
            image = %self.config.image,
            memory = %self.config.memory_limit,
            "Container sandbox started"
        );
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if self.state == SandboxState::Stopped {
            return Ok(());
        }
        self.remove_container().await;
        self.state = SandboxState::Stopped;
        debug!(container = %self.container_name, "Container sandbox stopped");
        Ok(())
    }

    /// Execute a command via `exec`. On timeout only the exec process is
    /// killed; the container itself keeps running.
    pub async fn execute(&self, command: &str, timeout: Duration) -> Result<ExecutionResult> {
        if self.state != SandboxState::Running {
            return Err(PoolError::SandboxNotStarted);
        }
        self.exec_in_container(command, timeout).await
    }

    async fn exec_in_container(&self, command: &str, timeout: Duration) -> Result<ExecutionResult> {
        let mut child = Command::new(self.runtime)
            .args(["exec", &self.container_name, "sh", "-c", command])
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

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub fn is_running(&self) -> bool {
        self.state == SandboxState::Running
    }

    async fn container_exists(&self) -> bool {
        Command::new(self.runtime)
            .args(["inspect", &self.container_name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    async fn is_healthy(&self) -> bool {
        match self.exec_in_container("echo ok", HEALTH_PROBE_TIMEOUT).await {
            Ok(result) => result.ok() && result.stdout.contains("ok"),
            Err(_) => false,
        }
    }

    async fn remove_container(&self) {
        let removed = Command::new(self.runtime)
            .args(["rm", "-f", &self.container_name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = removed {
            warn!(container = %self.container_name, error = %e, "Container removal failed");
        }
    }
}

fn detect_runtime() -> Result<&'static str> {
    for runtime in ["docker", "podman"] {
        if find_in_path(runtime).is_some() {
            return Ok(runtime);
        }
    }
    Err(PoolError::RuntimeUnavailable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_name_includes_pid() {
        if detect_runtime().is_err() {
            return; // no container runtime on this host
        }
        let sandbox = ContainerSandbox::new(
            PathBuf::from("/tmp/ws"),
            "worker-1",
            ContainerConfig::default(),
        )
        .unwrap();
        let expected = format!("agentpool-worker-1-{}", std::process::id());
        assert_eq!(sandbox.container_name(), expected);
        assert!(!sandbox.is_running());
    }

    #[tokio::test]
    async fn test_execute_before_start_fails() {
        if detect_runtime().is_err() {
            return;
        }
        let sandbox = ContainerSandbox::new(
            PathBuf::from("/tmp/ws"),
            "worker-2",
            ContainerConfig::default(),
        )
        .unwrap();
        let err = sandbox.execute("true", Duration::from_secs(1)).await;
        assert!(matches!(err, Err(PoolError::SandboxNotStarted)));
    }
}
