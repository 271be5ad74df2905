use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Workspace path rejected: {path} ({reason})")]
    WorkspaceRejected { path: PathBuf, reason: String },

    #[error("No container runtime found. Install Docker or Podman.")]
    RuntimeUnavailable,

    #[error("Sandbox not started")]
    SandboxNotStarted,

    #[error("Sandbox is stopped")]
    SandboxStopped,

    #[error("Failed to start sandbox: {0}")]
    SandboxStart(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid task state for {task_id}: expected {expected}, got {actual}")]
    InvalidTaskState {
        task_id: String,
        expected: String,
        actual: String,
    },

    #[error("Agent execution failed: {0}")]
    AgentExecution(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Claude CLI not found. Please install Claude Code.")]
    ClaudeCliNotFound,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pipeline requires at least one stage")]
    EmptyPipeline,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, PoolError>;
