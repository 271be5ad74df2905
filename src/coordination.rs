//! Coordination tool surface for LLM agents.
//!
//! Each agent gets its own [`CoordinationServer`] bound to the pool's
//! state directory and that agent's id. The server rebinds to the shared
//! taskboard file and message journal by path — it never takes ownership
//! of the pool's components, so an agent process holding one cannot
//! extend the pool's lifetime.
//!
//! # Tools
//!
//! 1. `claim_task` - claim the next available task from the shared board
//! 2. `complete_task` - mark a task completed
//! 3. `fail_task` - mark a task failed
//! 4. `list_tasks` - see all tasks and their status
//! 5. `send_message` - message another agent
//! 6. `broadcast_message` - message all other agents
//! 7. `check_messages` - drain this agent's unread messages

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::board::{BoardTask, TaskBoard};
use crate::error::Result;
use crate::journal::MessageJournal;

// ============================================================================
// Tool inputs and outputs
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteTaskInput {
    pub task_id: String,
    pub result: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailTaskInput {
    pub task_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageInput {
    pub to: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastMessageInput {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimTaskOutput {
    pub claimed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckOutput {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AckOutput {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn err(error: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListTasksOutput {
    pub tasks: Vec<BoardTask>,
}

/// An unread message as surfaced to the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxMessage {
    pub from: String,
    pub content: String,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckMessagesOutput {
    pub messages: Vec<InboxMessage>,
}

// ============================================================================
// Server
// ============================================================================

/// Per-agent facade over the shared taskboard and message journal.
pub struct CoordinationServer {
    agent_id: String,
    board: TaskBoard,
    journal: MessageJournal,
}

impl CoordinationServer {
    pub fn new(state_dir: &Path, agent_id: impl Into<String>) -> Result<Self> {
        Ok(Self {
            agent_id: agent_id.into(),
            board: TaskBoard::at_dir(state_dir)?,
            journal: MessageJournal::new(state_dir)?,
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn claim_task(&self) -> ClaimTaskOutput {
        match self.board.claim(&self.agent_id) {
            Ok(Some(task)) => ClaimTaskOutput {
                claimed: true,
                task_id: Some(task.id),
                description: Some(task.description),
                message: None,
            },
            Ok(None) => ClaimTaskOutput {
                claimed: false,
                task_id: None,
                description: None,
                message: Some("No tasks available".to_string()),
            },
            Err(e) => ClaimTaskOutput {
                claimed: false,
                task_id: None,
                description: None,
                message: Some(e.to_string()),
            },
        }
    }

    pub fn complete_task(&self, input: CompleteTaskInput) -> AckOutput {
        match self.board.complete(&input.task_id, input.result) {
            Ok(()) => AckOutput::ok(),
            Err(e) => AckOutput::err(e),
        }
    }

    pub fn fail_task(&self, input: FailTaskInput) -> AckOutput {
        match self.board.fail(&input.task_id, &input.error) {
            Ok(()) => AckOutput::ok(),
            Err(e) => AckOutput::err(e),
        }
    }

    pub fn list_tasks(&self) -> ListTasksOutput {
        ListTasksOutput {
            tasks: self.board.status().unwrap_or_default(),
        }
    }

    pub fn send_message(&self, input: SendMessageInput) -> AckOutput {
        match self.journal.send(&self.agent_id, &input.to, &input.content) {
            Ok(_) => AckOutput::ok(),
            Err(e) => AckOutput::err(e),
        }
    }

    pub fn broadcast_message(&self, input: BroadcastMessageInput) -> AckOutput {
        match self.journal.broadcast(&self.agent_id, &input.content) {
            Ok(_) => AckOutput::ok(),
            Err(e) => AckOutput::err(e),
        }
    }

    pub fn check_messages(&self) -> CheckMessagesOutput {
        let messages = self
            .journal
            .check_messages(&self.agent_id)
            .unwrap_or_default()
            .into_iter()
            .map(|entry| InboxMessage {
                from: entry.from,
                content: entry.content,
                timestamp: entry.timestamp,
            })
            .collect();
        CheckMessagesOutput { messages }
    }

    /// Dispatch a tool call by name with JSON arguments. Unknown tools and
    /// malformed arguments are reported in the reply, never panicked on.
    pub fn dispatch(&self, tool_name: &str, args: Value) -> Value {
        debug!(agent_id = %self.agent_id, tool = %tool_name, "Coordination tool call");
        match tool_name {
            "claim_task" => to_reply(&self.claim_task()),
            "complete_task" => match serde_json::from_value(args) {
                Ok(input) => to_reply(&self.complete_task(input)),
                Err(e) => invalid_args(e),
            },
            "fail_task" => match serde_json::from_value(args) {
                Ok(input) => to_reply(&self.fail_task(input)),
                Err(e) => invalid_args(e),
            },
            "list_tasks" => to_reply(&self.list_tasks()),
            "send_message" => match serde_json::from_value(args) {
                Ok(input) => to_reply(&self.send_message(input)),
                Err(e) => invalid_args(e),
            },
            "broadcast_message" => match serde_json::from_value(args) {
                Ok(input) => to_reply(&self.broadcast_message(input)),
                Err(e) => invalid_args(e),
            },
            "check_messages" => to_reply(&self.check_messages()),
            other => json!({ "error": format!("Unknown tool: {other}") }),
        }
    }
}

fn to_reply<T: Serialize>(output: &T) -> Value {
    serde_json::to_value(output).unwrap_or_else(|e| json!({ "error": e.to_string() }))
}

fn invalid_args(e: serde_json::Error) -> Value {
    json!({ "success": false, "error": format!("Invalid arguments: {e}") })
}

/// Tool definition for LLM tool calling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Definitions for the coordination tools exposed to each agent.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    let no_params = json!({ "type": "object", "properties": {}, "required": [] });
    vec![
        ToolDefinition {
            name: "claim_task".to_string(),
            description: "Claim the next available task from the shared task board. \
                          Returns the task description or a no-tasks message."
                .to_string(),
            parameters: no_params.clone(),
        },
        ToolDefinition {
            name: "complete_task".to_string(),
            description: "Mark a task as completed. Call this after you finish implementing a task."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "task_id": { "type": "string", "description": "The task ID to complete" },
                    "result": { "type": "string", "description": "Summary of what was done" }
                },
                "required": ["task_id"]
            }),
        },
        ToolDefinition {
            name: "fail_task".to_string(),
            description: "Mark a task as failed if you cannot complete it.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "task_id": { "type": "string", "description": "The task ID" },
                    "error": { "type": "string", "description": "What went wrong" }
                },
                "required": ["task_id", "error"]
            }),
        },
        ToolDefinition {
            name: "list_tasks".to_string(),
            description: "List all tasks on the board with their current status.".to_string(),
            parameters: no_params.clone(),
        },
        ToolDefinition {
            name: "send_message".to_string(),
            description: "Send a message to another agent. Use this to share findings, \
                          ask questions, or coordinate."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "to": { "type": "string", "description": "Target agent ID" },
                    "content": { "type": "string", "description": "Message content" }
                },
                "required": ["to", "content"]
            }),
        },
        ToolDefinition {
            name: "broadcast_message".to_string(),
            description: "Send a message to ALL other agents. Use sparingly.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "content": { "type": "string", "description": "Message content" }
                },
                "required": ["content"]
            }),
        },
        ToolDefinition {
            name: "check_messages".to_string(),
            description: "Check your inbox for messages from other agents.".to_string(),
            parameters: no_params,
        },
    ]
}
