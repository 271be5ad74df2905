//! Agent session request and result types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::SandboxKind;

/// Terminal status of an agent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Completed,
    Error,
    Timeout,
}

/// A request for one agent session. Immutable once submitted; the pool
/// assigns `agent_id` at submit time when the caller left it unset.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub prompt: String,
    pub agent_id: Option<String>,
    /// Pool default when unset.
    pub model: Option<String>,
    pub sandbox: Option<SandboxKind>,
    pub workspace: Option<PathBuf>,
    pub system_prompt: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl AgentRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            agent_id: None,
            model: None,
            sandbox: None,
            workspace: None,
            system_prompt: None,
            timeout_secs: None,
        }
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_sandbox(mut self, sandbox: SandboxKind) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }
}

/// Result from one executed agent session. `duration_seconds` covers the
/// full lifecycle including sandbox teardown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_id: String,
    pub status: AgentStatus,
    pub response: String,
    pub error: Option<String>,
    pub model_used: String,
    pub tokens_used: Option<u64>,
    pub tool_uses: Vec<String>,
    pub duration_seconds: f64,
}

impl AgentResult {
    pub fn error(agent_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            status: AgentStatus::Error,
            response: String::new(),
            error: Some(error.into()),
            model_used: String::new(),
            tokens_used: None,
            tool_uses: Vec::new(),
            duration_seconds: 0.0,
        }
    }

    pub fn timeout(agent_id: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            status: AgentStatus::Timeout,
            ..Self::error(agent_id, format!("Agent timed out after {timeout_secs}s"))
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == AgentStatus::Completed
    }
}
