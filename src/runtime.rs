//! The agent runtime seam.
//!
//! The entity that turns a prompt into a response is a black box behind
//! [`AgentRuntime`]. [`ClaudeCliRuntime`] drives the `claude` CLI as a
//! subprocess; [`ScriptedRuntime`] produces deterministic replies for
//! tests and dry runs.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::coordination::CoordinationServer;
use crate::error::{PoolError, Result};
use crate::util::find_in_path;

/// Everything a runtime needs to execute one agent session.
#[derive(Clone)]
pub struct RuntimeRequest {
    pub agent_id: String,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub model: String,
    pub workspace: PathBuf,
    /// Present in team mode: this agent's coordination tool surface.
    pub coordination: Option<Arc<CoordinationServer>>,
    pub timeout: Duration,
}

/// What a runtime produced. Errors and timeouts are reported through
/// `Result`, so a reply always corresponds to a completed session.
#[derive(Debug, Clone, Default)]
pub struct RuntimeReply {
    pub response: String,
    pub tool_uses: Vec<String>,
    pub tokens_used: Option<u64>,
}

#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn run(&self, request: RuntimeRequest) -> Result<RuntimeReply>;
}

/// Runs sessions through the `claude` CLI in print mode.
pub struct ClaudeCliRuntime {
    binary: String,
}

impl ClaudeCliRuntime {
    pub fn new() -> Self {
        Self {
            binary: "claude".to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for ClaudeCliRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentRuntime for ClaudeCliRuntime {
    async fn run(&self, request: RuntimeRequest) -> Result<RuntimeReply> {
        if find_in_path(&self.binary).is_none() {
            return Err(PoolError::ClaudeCliNotFound);
        }

        let mut cmd = Command::new(&self.binary);
        cmd.arg("-p")
            .arg(&request.prompt)
            .args(["--output-format", "json"])
            .args(["--model", &request.model])
            .current_dir(&request.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(system_prompt) = &request.system_prompt {
            cmd.args(["--append-system-prompt", system_prompt]);
        }

        debug!(agent_id = %request.agent_id, model = %request.model, "Invoking claude CLI");
        let output = cmd.output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(PoolError::AgentExecution(stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: serde_json::Value = serde_json::from_str(stdout.trim())?;
        let response = parsed
            .get("result")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let tokens_used = parsed
            .get("usage")
            .and_then(|usage| usage.get("output_tokens"))
            .and_then(|v| v.as_u64());

        Ok(RuntimeReply {
            response,
            tool_uses: Vec::new(),
            tokens_used,
        })
    }
}

/// Deterministic runtime: replies are computed from the request by a
/// caller-supplied function. The backbone of the crate's own tests.
pub struct ScriptedRuntime {
    script: Box<dyn Fn(&RuntimeRequest) -> Result<RuntimeReply> + Send + Sync>,
}

impl ScriptedRuntime {
    pub fn new(
        script: impl Fn(&RuntimeRequest) -> Result<RuntimeReply> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
        }
    }

    /// Replies with the prompt text itself.
    pub fn echo() -> Self {
        Self::new(|request| {
            Ok(RuntimeReply {
                response: request.prompt.clone(),
                ..Default::default()
            })
        })
    }
}

#[async_trait]
impl AgentRuntime for ScriptedRuntime {
    async fn run(&self, request: RuntimeRequest) -> Result<RuntimeReply> {
        (self.script)(&request)
    }
}
