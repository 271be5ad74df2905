//! agentpool: concurrent language-model agent orchestration.
//!
//! Manages a bounded pool of agent sessions with per-agent sandboxing
//! (host or container), a shared cross-process taskboard, inter-agent
//! messaging, and sequential pipelines with textual handoff.
//!
//! Parallel mode:
//! ```no_run
//! use agentpool::{AgentPool, AgentPoolConfig, AgentRequest};
//!
//! # async fn example() -> agentpool::Result<()> {
//! let mut pool = AgentPool::new(AgentPoolConfig::default())?;
//! pool.submit(AgentRequest::new("Review the auth module for security issues"));
//! pool.submit(AgentRequest::new("Write integration tests for the API"));
//! let results = pool.run().await;
//! # Ok(())
//! # }
//! ```
//!
//! Team mode:
//! ```no_run
//! use agentpool::{AgentPool, AgentPoolConfig};
//!
//! # async fn example() -> agentpool::Result<()> {
//! let mut pool = AgentPool::team(AgentPoolConfig::default())?;
//! pool.add_tasks([
//!     "Implement user registration",
//!     "Add password reset flow",
//!     "Write auth middleware",
//! ])?;
//! let results = pool
//!     .run_team("Coordinate these auth tasks", "Claim and implement tasks", None)
//!     .await;
//! # Ok(())
//! # }
//! ```
//!
//! Pipeline mode:
//! ```no_run
//! use agentpool::{AgentPoolConfig, Pipeline, Stage};
//!
//! # async fn example() -> agentpool::Result<()> {
//! let pipeline = Pipeline::new(
//!     vec![
//!         Stage::new("research", "Investigate the codebase."),
//!         Stage::new("plan", "Based on this research:\n{previous_response}\nCreate a plan."),
//!         Stage::new("implement", "Implement this plan:\n{previous_response}"),
//!     ],
//!     AgentPoolConfig::default(),
//! )?;
//! let result = pipeline.run().await;
//! # Ok(())
//! # }
//! ```

pub mod board;
pub mod config;
pub mod coordination;
pub mod error;
pub mod journal;
pub mod logging;
pub mod messages;
pub mod pipeline;
pub mod pool;
pub mod runtime;
pub mod sandbox;
pub mod security;
pub mod session;

mod fslock;
mod util;

pub use board::{BoardTask, TaskBoard, TaskStatus};
pub use config::{AgentPoolConfig, ContainerConfig, MAX_AGENTS_CAP, SandboxKind};
pub use coordination::{CoordinationServer, ToolDefinition, tool_definitions};
pub use error::{PoolError, Result};
pub use journal::{BROADCAST, JournalEntry, MessageJournal};
pub use messages::{Message, MessageBus, Recipient};
pub use pipeline::{Pipeline, PipelineResult, Stage};
pub use pool::{AgentPool, EventCallback, PoolEvent, PoolMode};
pub use runtime::{AgentRuntime, ClaudeCliRuntime, RuntimeReply, RuntimeRequest, ScriptedRuntime};
pub use sandbox::{ContainerSandbox, ExecutionResult, HostSandbox, Sandbox};
pub use security::validate_workspace;
pub use session::{AgentRequest, AgentResult, AgentStatus};
