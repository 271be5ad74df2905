//! Pool configuration.
//!
//! All settings have usable defaults; callers override fields directly or
//! load a TOML file with [`AgentPoolConfig::load`].

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{PoolError, Result};

/// Hard cap on concurrent agents, regardless of configuration.
pub const MAX_AGENTS_CAP: usize = 8;

/// Which execution environment an agent's shell commands run in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxKind {
    /// Directly on the host. No isolation, fast.
    #[default]
    Host,
    /// Inside a persistent container (docker or podman).
    Container,
}

impl fmt::Display for SandboxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::Container => write!(f, "container"),
        }
    }
}

/// Container sandbox settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    pub image: String,
    pub memory_limit: String,
    pub cpu_limit: String,
    /// Container network mode. `None` means the runtime's default bridge.
    pub network: Option<String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: "agentpool-worker:latest".to_string(),
            memory_limit: "1g".to_string(),
            cpu_limit: "1.0".to_string(),
            network: None,
        }
    }
}

/// Top-level configuration for [`crate::pool::AgentPool`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentPoolConfig {
    /// Maximum concurrent agents. Clamped to [`MAX_AGENTS_CAP`] at use.
    pub max_agents: usize,
    pub default_model: String,
    pub default_sandbox: SandboxKind,
    /// Default wall-clock seconds per agent session.
    pub timeout_secs: u64,
    pub log_level: String,
    /// Optional JSON-lines file for post-run analysis.
    pub log_file: Option<PathBuf>,
    /// If set, every workspace must lie within this directory.
    pub workspace_root: Option<PathBuf>,
    pub docker: ContainerConfig,
}

impl Default for AgentPoolConfig {
    fn default() -> Self {
        Self {
            max_agents: 4,
            default_model: "claude-sonnet-4-5".to_string(),
            default_sandbox: SandboxKind::Host,
            timeout_secs: 300,
            log_level: "info".to_string(),
            log_file: None,
            workspace_root: None,
            docker: ContainerConfig::default(),
        }
    }
}

impl AgentPoolConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values for consistency.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.max_agents == 0 {
            errors.push("max_agents must be greater than 0");
        }
        if self.timeout_secs == 0 {
            errors.push("timeout_secs must be greater than 0");
        }
        if self.default_model.is_empty() {
            errors.push("default_model must not be empty");
        }
        if self.docker.image.is_empty() {
            errors.push("docker.image must not be empty");
        }
        if self.docker.memory_limit.is_empty() {
            errors.push("docker.memory_limit must not be empty");
        }
        if self.docker.cpu_limit.is_empty() {
            errors.push("docker.cpu_limit must not be empty");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PoolError::Config(errors.join("; ")))
        }
    }

    /// The concurrency bound actually enforced by the pool.
    pub fn effective_max_agents(&self) -> usize {
        self.max_agents.clamp(1, MAX_AGENTS_CAP)
    }
}
