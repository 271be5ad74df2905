//! Execution sandboxes for agent shell commands.
//!
//! Two backends behind one surface:
//! - [`HostSandbox`]: runs directly on the host (no isolation, fast)
//! - [`ContainerSandbox`]: runs inside a persistent container (isolated)
//!
//! Dispatch is a match on the [`Sandbox`] enum.

mod container;
mod host;

use std::path::{Path, PathBuf};
use std::time::Duration;

pub use container::ContainerSandbox;
pub use host::HostSandbox;
use tokio::io::AsyncReadExt;

use crate::config::{ContainerConfig, SandboxKind};
use crate::error::Result;

/// Result of executing a command in a sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecutionResult {
    pub fn ok(&self) -> bool {
        self.exit_code == 0
    }

    pub(crate) fn timed_out(timeout: Duration) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!("Command timed out after {}s", timeout.as_secs()),
            exit_code: -1,
        }
    }
}

/// Lifecycle state of a sandbox. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SandboxState {
    Prepared,
    Running,
    Stopped,
}

/// An execution environment for one agent's shell commands.
pub enum Sandbox {
    Host(HostSandbox),
    Container(ContainerSandbox),
}

impl Sandbox {
    /// Create a sandbox of the requested kind. Container creation probes
    /// for a container runtime and fails with `RuntimeUnavailable` when
    /// neither docker nor podman is on PATH.
    pub fn create(
        kind: SandboxKind,
        workspace: PathBuf,
        name: &str,
        config: &ContainerConfig,
    ) -> Result<Self> {
        match kind {
            SandboxKind::Host => Ok(Self::Host(HostSandbox::new(workspace, name))),
            SandboxKind::Container => Ok(Self::Container(ContainerSandbox::new(
                workspace,
                name,
                config.clone(),
            )?)),
        }
    }

    /// Start the sandbox. Must be called before [`Sandbox::execute`].
    pub async fn start(&mut self) -> Result<()> {
        match self {
            Self::Host(s) => s.start().await,
            Self::Container(s) => s.start().await,
        }
    }

    /// Execute a shell command inside the sandbox.
    pub async fn execute(&self, command: &str, timeout: Duration) -> Result<ExecutionResult> {
        match self {
            Self::Host(s) => s.execute(command, timeout).await,
            Self::Container(s) => s.execute(command, timeout).await,
        }
    }

    /// Stop the sandbox and clean up resources. Idempotent.
    pub async fn stop(&mut self) -> Result<()> {
        match self {
            Self::Host(s) => s.stop().await,
            Self::Container(s) => s.stop().await,
        }
    }

    pub fn kind(&self) -> SandboxKind {
        match self {
            Self::Host(_) => SandboxKind::Host,
            Self::Container(_) => SandboxKind::Container,
        }
    }

    /// The workspace directory visible to the agent.
    pub fn workspace(&self) -> &Path {
        match self {
            Self::Host(s) => s.workspace(),
            Self::Container(s) => s.workspace(),
        }
    }

    pub fn is_running(&self) -> bool {
        match self {
            Self::Host(s) => s.is_running(),
            Self::Container(s) => s.is_running(),
        }
    }
}

/// Drain a child process pipe to a lossy UTF-8 string.
pub(crate) async fn read_pipe<R>(pipe: Option<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(mut reader) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}
