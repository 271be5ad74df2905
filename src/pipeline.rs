//! Pipeline: sequential stages with handoff.
//!
//! Each stage runs a single agent session. The response from one stage is
//! injected into the next stage's prompt via `{previous_response}`
//! substitution, or appended as context when the template carries no
//! placeholder. All stages share one workspace, so files written by an
//! earlier stage are visible to later ones.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use crate::config::{AgentPoolConfig, SandboxKind};
use crate::error::{PoolError, Result};
use crate::pool::AgentPool;
use crate::runtime::{AgentRuntime, ClaudeCliRuntime};
use crate::session::{AgentRequest, AgentResult};

/// Placeholder substituted with the previous stage's response.
pub const PREVIOUS_RESPONSE: &str = "{previous_response}";

pub type Transform = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// A single stage in a pipeline.
#[derive(Clone)]
pub struct Stage {
    pub name: String,
    pub prompt: String,
    pub model: Option<String>,
    pub sandbox: Option<SandboxKind>,
    pub system_prompt: Option<String>,
    pub timeout_secs: Option<u64>,
    /// Applied to the previous response before substitution.
    pub transform: Option<Transform>,
}

impl Stage {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            model: None,
            sandbox: None,
            system_prompt: None,
            timeout_secs: None,
            transform: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_sandbox(mut self, sandbox: SandboxKind) -> Self {
        self.sandbox = Some(sandbox);
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

    pub fn with_transform(
        mut self,
        transform: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.transform = Some(Arc::new(transform));
        self
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("sandbox", &self.sandbox)
            .field("timeout_secs", &self.timeout_secs)
            .field("has_transform", &self.transform.is_some())
            .finish()
    }
}

/// Result from a pipeline run. Contains only the stages that executed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineResult {
    pub stages: Vec<AgentResult>,
}

impl PipelineResult {
    /// True when every stage ran and completed.
    pub fn success(&self) -> bool {
        !self.stages.is_empty() && self.stages.iter().all(|s| s.is_completed())
    }

    /// Response text of the last executed stage.
    pub fn final_response(&self) -> &str {
        self.stages.last().map(|s| s.response.as_str()).unwrap_or("")
    }

    /// Sum of stage durations in seconds.
    pub fn total_duration(&self) -> f64 {
        self.stages.iter().map(|s| s.duration_seconds).sum()
    }
}

/// Build a stage's prompt from its template and the previous response.
/// `None` marks the first stage, whose template is used verbatim.
pub fn compose_prompt(stage: &Stage, previous: Option<&str>) -> String {
    let Some(previous) = previous else {
        return stage.prompt.clone();
    };

    let context = match &stage.transform {
        Some(transform) => transform(previous),
        None => previous.to_string(),
    };

    if stage.prompt.contains(PREVIOUS_RESPONSE) {
        stage.prompt.replace(PREVIOUS_RESPONSE, &context)
    } else if !context.is_empty() {
        format!("{}\n\n## Context from previous stage\n{}", stage.prompt, context)
    } else {
        stage.prompt.clone()
    }
}

/// Sequential stages with textual handoff between agents.
pub struct Pipeline {
    stages: Vec<Stage>,
    config: AgentPoolConfig,
    workspace: PathBuf,
    runtime: Arc<dyn AgentRuntime>,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>, config: AgentPoolConfig) -> Result<Self> {
        if stages.is_empty() {
            return Err(PoolError::EmptyPipeline);
        }
        config.validate()?;
        Ok(Self {
            stages,
            config,
            workspace: std::env::current_dir()?,
            runtime: Arc::new(ClaudeCliRuntime::new()),
        })
    }

    /// Workspace shared by every stage.
    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = workspace.into();
        self
    }

    pub fn with_runtime(mut self, runtime: Arc<dyn AgentRuntime>) -> Self {
        self.runtime = runtime;
        self
    }

    /// Execute all stages in order, threading output to input. Stops at
    /// the first stage that does not complete.
    pub async fn run(&self) -> PipelineResult {
        let mut result = PipelineResult::default();
        let mut previous: Option<String> = None;
        let total = self.stages.len();

        info!(stages = total, "Starting pipeline");

        for (index, stage) in self.stages.iter().enumerate() {
            info!(stage = %stage.name, number = index + 1, total, "Starting stage");

            let prompt = compose_prompt(stage, previous.as_deref());
            let stage_result = self.run_stage(stage, prompt).await;

            info!(
                stage = %stage.name,
                status = ?stage_result.status,
                duration_secs = stage_result.duration_seconds,
                "Stage finished"
            );

            let completed = stage_result.is_completed();
            previous = Some(stage_result.response.clone());
            result.stages.push(stage_result);

            if !completed {
                error!(stage = %stage.name, "Pipeline stopped: stage did not complete");
                break;
            }
        }

        info!(
            executed = result.stages.len(),
            total,
            success = result.success(),
            total_duration_secs = result.total_duration(),
            "Pipeline finished"
        );
        result
    }

    /// Run one stage through a single-request pool with the stage's
    /// overrides applied.
    async fn run_stage(&self, stage: &Stage, prompt: String) -> AgentResult {
        let agent_id = format!("pipeline-{}", stage.name);

        let pool = match AgentPool::new(self.config.clone()) {
            Ok(pool) => pool,
            Err(e) => {
                error!(stage = %stage.name, error = %e, "Stage pool setup failed");
                return AgentResult::error(agent_id.as_str(), e.to_string());
            }
        };
        let mut pool = pool
            .with_workspace(&self.workspace)
            .with_runtime(Arc::clone(&self.runtime));

        let mut request = AgentRequest::new(prompt).with_agent_id(agent_id.as_str());
        if let Some(model) = &stage.model {
            request = request.with_model(model.as_str());
        }
        if let Some(sandbox) = stage.sandbox {
            request = request.with_sandbox(sandbox);
        }
        if let Some(system_prompt) = &stage.system_prompt {
            request = request.with_system_prompt(system_prompt.as_str());
        }
        if let Some(timeout_secs) = stage.timeout_secs {
            request = request.with_timeout_secs(timeout_secs);
        }

        pool.submit(request);
        pool.run()
            .await
            .into_iter()
            .next()
            .unwrap_or_else(|| AgentResult::error(agent_id.as_str(), "Stage produced no result"))
    }
}
