//! AgentPool: the main orchestrator.
//!
//! Manages concurrent agent sessions with per-agent sandboxes, shared
//! task coordination, and inter-agent messaging.
//!
//! Three execution shapes:
//! 1. Parallel: independent requests, no communication
//! 2. Team: agents share a [`TaskBoard`] and exchange messages
//! 3. Pipeline: sequential stages with handoff (see [`crate::pipeline`])

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::board::TaskBoard;
use crate::config::{AgentPoolConfig, SandboxKind};
use crate::coordination::CoordinationServer;
use crate::error::Result;
use crate::logging;
use crate::messages::MessageBus;
use crate::runtime::{AgentRuntime, ClaudeCliRuntime, RuntimeRequest};
use crate::sandbox::Sandbox;
use crate::security::validate_workspace;
use crate::session::{AgentRequest, AgentResult, AgentStatus};
use crate::util::truncate;

/// Coordination instructions appended to every system prompt in team mode.
const TEAM_INSTRUCTIONS: &str = "\n\n## Team Coordination\n\
You have access to coordination tools:\n\
- `claim_task`: get your next task from the shared board\n\
- `complete_task`: mark a task as done\n\
- `list_tasks`: see all tasks and their status\n\
- `send_message`: send a message to another agent\n\
- `broadcast_message`: send to all agents\n\
- `check_messages`: check your inbox\n";

const LEAD_SYSTEM_PROMPT: &str = "You are the team lead. Your job is to break down the task, \
add subtasks to the task board using the claim_task/complete_task tools, \
and coordinate workers via messaging. Workers will claim tasks independently.";

/// How the pool composes its agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolMode {
    /// Independent requests, no shared coordination.
    Parallel,
    /// Agents share the taskboard and message journal.
    Team,
}

/// Events emitted through the pool's optional callback.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    AgentStarted {
        agent_id: String,
        model: String,
        sandbox: SandboxKind,
    },
    AgentComplete {
        agent_id: String,
        result: Value,
    },
}

pub type EventCallback = Arc<dyn Fn(PoolEvent) + Send + Sync>;

/// Orchestrates concurrent agent sessions.
///
/// Each submitted request becomes one agent lifecycle: workspace
/// validation, sandbox start, message-bus registration, runtime
/// invocation with a wall-clock timeout, and teardown on every path.
/// At most `min(max_agents, 8)` lifecycles run at once.
pub struct AgentPool {
    config: AgentPoolConfig,
    mode: PoolMode,
    workspace: PathBuf,
    state_dir: PathBuf,
    // Keeps the auto-created state directory alive for the pool's lifetime.
    _state_guard: Option<tempfile::TempDir>,
    board: Arc<TaskBoard>,
    bus: Arc<MessageBus>,
    runtime: Arc<dyn AgentRuntime>,
    event_callback: Option<EventCallback>,
    requests: Vec<AgentRequest>,
    agent_counter: usize,
    stop_requested: Arc<AtomicBool>,
}

#[derive(Clone)]
struct AgentContext {
    config: AgentPoolConfig,
    mode: PoolMode,
    workspace: PathBuf,
    state_dir: PathBuf,
    board: Arc<TaskBoard>,
    bus: Arc<MessageBus>,
    runtime: Arc<dyn AgentRuntime>,
    event_callback: Option<EventCallback>,
    stop_requested: Arc<AtomicBool>,
}

impl AgentPool {
    /// Pool for independent parallel requests.
    pub fn new(config: AgentPoolConfig) -> Result<Self> {
        Self::with_mode(config, PoolMode::Parallel)
    }

    /// Pool whose agents share the taskboard and message journal. Claims
    /// older than the session timeout are swept back to pending.
    pub fn team(config: AgentPoolConfig) -> Result<Self> {
        Self::with_mode(config, PoolMode::Team)
    }

    pub fn with_mode(config: AgentPoolConfig, mode: PoolMode) -> Result<Self> {
        config.validate()?;
        logging::init(&config.log_level, config.log_file.as_deref())?;

        let state_guard = tempfile::Builder::new().prefix("agentpool-").tempdir()?;
        let state_dir = state_guard.path().to_path_buf();

        let mut board = TaskBoard::at_dir(&state_dir)?;
        if mode == PoolMode::Team {
            board = board.with_stale_timeout(Duration::from_secs(config.timeout_secs));
        }

        Ok(Self {
            workspace: std::env::current_dir()?,
            state_dir,
            _state_guard: Some(state_guard),
            board: Arc::new(board),
            bus: Arc::new(MessageBus::new()),
            runtime: Arc::new(ClaudeCliRuntime::new()),
            event_callback: None,
            requests: Vec::new(),
            agent_counter: 0,
            stop_requested: Arc::new(AtomicBool::new(false)),
            config,
            mode,
        })
    }

    /// Default workspace for agents that do not override it.
    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = workspace.into();
        self
    }

    pub fn with_runtime(mut self, runtime: Arc<dyn AgentRuntime>) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_event_callback(mut self, callback: EventCallback) -> Self {
        self.event_callback = Some(callback);
        self
    }

    /// Enqueue a request. Execution does not begin until [`AgentPool::run`].
    /// Returns the assigned agent id.
    pub fn submit(&mut self, mut request: AgentRequest) -> String {
        self.agent_counter += 1;
        let agent_id = request
            .agent_id
            .clone()
            .unwrap_or_else(|| format!("agent-{}", self.agent_counter));
        request.agent_id = Some(agent_id.clone());
        info!(
            agent_id = %agent_id,
            prompt = %truncate(&request.prompt, 60),
            "Request submitted"
        );
        self.requests.push(request);
        agent_id
    }

    /// Enqueue work items on the shared taskboard (team mode).
    pub fn add_tasks<I, S>(&self, descriptions: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        descriptions
            .into_iter()
            .map(|description| self.board.add(description.as_ref(), &[], 0))
            .collect()
    }

    /// Execute all submitted requests, at most `min(max_agents, 8)` at a
    /// time. Results are returned in submission order.
    pub async fn run(&mut self) -> Vec<AgentResult> {
        let requests = std::mem::take(&mut self.requests);
        if requests.is_empty() {
            warn!("No requests submitted");
            return Vec::new();
        }

        let start = Instant::now();
        info!(
            requests = requests.len(),
            max_agents = self.config.effective_max_agents(),
            mode = ?self.mode,
            "Starting pool"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.effective_max_agents()));
        let ctx = self.context();

        let futures: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let semaphore = Arc::clone(&semaphore);
                let ctx = ctx.clone();
                async move {
                    let _permit = semaphore.acquire().await.expect("semaphore closed");
                    if ctx.stop_requested.load(Ordering::Acquire) {
                        let agent_id = request.agent_id.clone().unwrap_or_default();
                        warn!(agent_id = %agent_id, "Stop requested, agent not started");
                        return AgentResult::error(agent_id, "Stop requested before agent start");
                    }
                    run_agent(ctx, request).await
                }
            })
            .collect();

        let results = join_all(futures).await;

        let completed = results.iter().filter(|r| r.is_completed()).count();
        let errored = results
            .iter()
            .filter(|r| r.status == AgentStatus::Error)
            .count();
        info!(
            completed,
            errored,
            elapsed_secs = start.elapsed().as_secs_f64(),
            "Pool run complete"
        );
        results
    }

    /// Run in team mode: a lead coordinates, workers claim shared tasks.
    ///
    /// `num_workers` defaults to `max_agents - 1` and is clamped to that
    /// range. Returns results lead-first.
    pub async fn run_team(
        &mut self,
        lead_prompt: &str,
        worker_prompt: &str,
        num_workers: Option<usize>,
    ) -> Vec<AgentResult> {
        let worker_cap = self.config.effective_max_agents().saturating_sub(1).max(1);
        let num_workers = num_workers.unwrap_or(worker_cap).clamp(1, worker_cap);

        self.submit(
            AgentRequest::new(lead_prompt)
                .with_agent_id("lead")
                .with_system_prompt(LEAD_SYSTEM_PROMPT),
        );

        for i in 0..num_workers {
            let name = format!("worker-{}", i + 1);
            let system_prompt = format!(
                "You are {name}. Use claim_task to get your assignment from the shared \
                 task board. Implement each task, then call complete_task. Use \
                 send_message to share findings with other agents. Use check_messages \
                 to see if other agents have sent you information."
            );
            self.submit(
                AgentRequest::new(worker_prompt)
                    .with_agent_id(name)
                    .with_system_prompt(system_prompt),
            );
        }

        self.run().await
    }

    /// Request that no further agents start. Advisory: in-flight agents
    /// continue to their own completion or timeout.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        info!("Stop requested for all agents");
    }

    pub fn board(&self) -> &Arc<TaskBoard> {
        &self.board
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn config(&self) -> &AgentPoolConfig {
        &self.config
    }

    fn context(&self) -> AgentContext {
        AgentContext {
            config: self.config.clone(),
            mode: self.mode,
            workspace: self.workspace.clone(),
            state_dir: self.state_dir.clone(),
            board: Arc::clone(&self.board),
            bus: Arc::clone(&self.bus),
            runtime: Arc::clone(&self.runtime),
            event_callback: self.event_callback.clone(),
            stop_requested: Arc::clone(&self.stop_requested),
        }
    }
}

/// One full agent lifecycle. Every failure becomes a terminal
/// [`AgentResult`]; teardown of everything acquired runs on every path.
async fn run_agent(ctx: AgentContext, request: AgentRequest) -> AgentResult {
    let start = Instant::now();
    let agent_id = request.agent_id.clone().unwrap_or_default();
    let model = request
        .model
        .clone()
        .unwrap_or_else(|| ctx.config.default_model.clone());
    let timeout_secs = request.timeout_secs.unwrap_or(ctx.config.timeout_secs);
    let sandbox_kind = request.sandbox.unwrap_or(ctx.config.default_sandbox);
    let workspace = request
        .workspace
        .clone()
        .unwrap_or_else(|| ctx.workspace.clone());

    let workspace = match validate_workspace(&workspace, ctx.config.workspace_root.as_deref()) {
        Ok(path) => path,
        Err(e) => {
            error!(agent_id = %agent_id, error = %e, "Workspace validation failed");
            return finish(&ctx, AgentResult::error(agent_id.as_str(), e.to_string()), start);
        }
    };

    let mut sandbox = match Sandbox::create(
        sandbox_kind,
        workspace.clone(),
        &agent_id,
        &ctx.config.docker,
    ) {
        Ok(sandbox) => sandbox,
        Err(e) => {
            error!(agent_id = %agent_id, error = %e, "Sandbox creation failed");
            return finish(&ctx, AgentResult::error(agent_id.as_str(), e.to_string()), start);
        }
    };

    if let Err(e) = sandbox.start().await {
        error!(agent_id = %agent_id, error = %e, "Sandbox start failed");
        let _ = sandbox.stop().await;
        return finish(&ctx, AgentResult::error(agent_id.as_str(), e.to_string()), start);
    }

    ctx.bus.register(&agent_id);
    emit(
        &ctx,
        PoolEvent::AgentStarted {
            agent_id: agent_id.clone(),
            model: model.clone(),
            sandbox: sandbox_kind,
        },
    );

    let result = invoke_runtime(&ctx, &request, &agent_id, &model, &workspace, timeout_secs).await;

    // Teardown, in reverse order of acquisition.
    ctx.bus.unregister(&agent_id);
    if ctx.mode == PoolMode::Team {
        match ctx.board.release_agent_tasks(&agent_id) {
            Ok(released) if !released.is_empty() => {
                info!(agent_id = %agent_id, released = ?released, "Released tasks on cleanup");
            }
            Ok(_) => {}
            Err(e) => warn!(agent_id = %agent_id, error = %e, "Task release error"),
        }
    }
    if let Err(e) = sandbox.stop().await {
        warn!(agent_id = %agent_id, error = %e, "Sandbox cleanup error");
    }

    finish(&ctx, result, start)
}

async fn invoke_runtime(
    ctx: &AgentContext,
    request: &AgentRequest,
    agent_id: &str,
    model: &str,
    workspace: &Path,
    timeout_secs: u64,
) -> AgentResult {
    let coordination = if ctx.mode == PoolMode::Team {
        match CoordinationServer::new(&ctx.state_dir, agent_id) {
            Ok(server) => Some(Arc::new(server)),
            Err(e) => {
                error!(agent_id = %agent_id, error = %e, "Coordination server setup failed");
                return AgentResult::error(agent_id, e.to_string());
            }
        }
    } else {
        None
    };

    let mut system_prompt = request.system_prompt.clone();
    if ctx.mode == PoolMode::Team {
        let base = system_prompt.unwrap_or_default();
        system_prompt = Some(format!("{base}{TEAM_INSTRUCTIONS}"));
    }

    let timeout = Duration::from_secs(timeout_secs);
    let invocation = RuntimeRequest {
        agent_id: agent_id.to_string(),
        prompt: request.prompt.clone(),
        system_prompt,
        model: model.to_string(),
        workspace: workspace.to_path_buf(),
        coordination,
        timeout,
    };

    match tokio::time::timeout(timeout, ctx.runtime.run(invocation)).await {
        Ok(Ok(reply)) => AgentResult {
            agent_id: agent_id.to_string(),
            status: AgentStatus::Completed,
            response: reply.response,
            error: None,
            model_used: model.to_string(),
            tokens_used: reply.tokens_used,
            tool_uses: reply.tool_uses,
            duration_seconds: 0.0,
        },
        Ok(Err(e)) => {
            error!(agent_id = %agent_id, error = %e, "Agent session error");
            let mut result = AgentResult::error(agent_id, e.to_string());
            result.model_used = model.to_string();
            result
        }
        Err(_) => {
            error!(agent_id = %agent_id, timeout_secs, "Agent timed out");
            let mut result = AgentResult::timeout(agent_id, timeout_secs);
            result.model_used = model.to_string();
            result
        }
    }
}

/// Stamp the full-lifecycle duration and emit the completion event.
fn finish(ctx: &AgentContext, mut result: AgentResult, start: Instant) -> AgentResult {
    result.duration_seconds = start.elapsed().as_secs_f64();
    let serialized = serde_json::to_value(&result).unwrap_or(Value::Null);
    emit(
        ctx,
        PoolEvent::AgentComplete {
            agent_id: result.agent_id.clone(),
            result: serialized,
        },
    );
    result
}

fn emit(ctx: &AgentContext, event: PoolEvent) {
    if let Some(callback) = &ctx.event_callback {
        callback(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{RuntimeReply, ScriptedRuntime};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    fn test_config() -> AgentPoolConfig {
        AgentPoolConfig {
            timeout_secs: 10,
            ..Default::default()
        }
    }

    fn echo_pool(workspace: &Path) -> AgentPool {
        AgentPool::new(test_config())
            .unwrap()
            .with_workspace(workspace)
            .with_runtime(Arc::new(ScriptedRuntime::echo()))
    }

    #[test]
    fn test_submit_assigns_sequential_ids() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = echo_pool(dir.path());

        assert_eq!(pool.submit(AgentRequest::new("one")), "agent-1");
        assert_eq!(pool.submit(AgentRequest::new("two")), "agent-2");
        assert_eq!(
            pool.submit(AgentRequest::new("three").with_agent_id("custom")),
            "custom"
        );
        assert_eq!(pool.submit(AgentRequest::new("four")), "agent-4");
    }

    #[tokio::test]
    async fn test_run_returns_results_in_submission_order() {
        struct SlowFirst;

        #[async_trait]
        impl AgentRuntime for SlowFirst {
            async fn run(&self, request: RuntimeRequest) -> crate::error::Result<RuntimeReply> {
                if request.agent_id == "agent-1" {
                    tokio::time::sleep(Duration::from_millis(150)).await;
                }
                Ok(RuntimeReply {
                    response: request.agent_id.clone(),
                    ..Default::default()
                })
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut pool = AgentPool::new(test_config())
            .unwrap()
            .with_workspace(dir.path())
            .with_runtime(Arc::new(SlowFirst));

        pool.submit(AgentRequest::new("slow"));
        pool.submit(AgentRequest::new("fast"));
        pool.submit(AgentRequest::new("fast"));

        let results = pool.run().await;
        assert_eq!(results.len(), 3);
        // agent-1 finishes last but is still reported first.
        assert_eq!(results[0].agent_id, "agent-1");
        assert_eq!(results[1].agent_id, "agent-2");
        assert_eq!(results[2].agent_id, "agent-3");
        assert!(results.iter().all(|r| r.is_completed()));
    }

    #[tokio::test]
    async fn test_run_with_no_requests() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = echo_pool(dir.path());
        assert!(pool.run().await.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_produces_timeout_status() {
        struct NeverReturns;

        #[async_trait]
        impl AgentRuntime for NeverReturns {
            async fn run(&self, _request: RuntimeRequest) -> crate::error::Result<RuntimeReply> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(RuntimeReply::default())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut pool = AgentPool::new(test_config())
            .unwrap()
            .with_workspace(dir.path())
            .with_runtime(Arc::new(NeverReturns));

        pool.submit(AgentRequest::new("stuck").with_timeout_secs(1));
        let results = pool.run().await;
        assert_eq!(results[0].status, AgentStatus::Timeout);
        assert!(results[0].duration_seconds >= 1.0);
    }

    #[tokio::test]
    async fn test_runtime_error_captured_not_propagated() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = AgentPool::new(test_config())
            .unwrap()
            .with_workspace(dir.path())
            .with_runtime(Arc::new(ScriptedRuntime::new(|request| {
                if request.agent_id == "ok" {
                    Ok(RuntimeReply {
                        response: "fine".to_string(),
                        ..Default::default()
                    })
                } else {
                    Err(crate::error::PoolError::AgentExecution("boom".to_string()))
                }
            })));

        pool.submit(AgentRequest::new("will fail"));
        pool.submit(AgentRequest::new("unaffected").with_agent_id("ok"));

        // One failing agent does not halt the pool.
        let results = pool.run().await;
        assert_eq!(results[0].status, AgentStatus::Error);
        assert!(results[0].error.as_deref().unwrap().contains("boom"));
        assert_eq!(results[1].status, AgentStatus::Completed);
    }

    #[tokio::test]
    async fn test_workspace_rejection_surfaces_as_error_result() {
        let mut pool = echo_pool(Path::new("/etc"));
        pool.submit(AgentRequest::new("nope"));

        let results = pool.run().await;
        assert_eq!(results[0].status, AgentStatus::Error);
        assert!(results[0].error.as_deref().unwrap().contains("rejected"));
    }

    #[tokio::test]
    async fn test_request_stop_prevents_new_agents() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = echo_pool(dir.path());
        pool.request_stop();
        pool.submit(AgentRequest::new("never runs"));

        let results = pool.run().await;
        assert_eq!(results[0].status, AgentStatus::Error);
        assert!(results[0].error.as_deref().unwrap().contains("Stop requested"));
    }

    #[tokio::test]
    async fn test_event_callbacks_fire() {
        let dir = tempfile::tempdir().unwrap();
        let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);

        let mut pool = echo_pool(dir.path()).with_event_callback(Arc::new(move |event| {
            let label = match event {
                PoolEvent::AgentStarted { agent_id, .. } => format!("started:{agent_id}"),
                PoolEvent::AgentComplete { agent_id, result } => {
                    format!("complete:{agent_id}:{}", result["status"].as_str().unwrap_or("?"))
                }
            };
            sink.lock().push(label);
        }));

        pool.submit(AgentRequest::new("hello"));
        pool.run().await;

        let events = events.lock();
        assert_eq!(
            *events,
            vec!["started:agent-1", "complete:agent-1:completed"]
        );
    }

    #[tokio::test]
    async fn test_run_team_seeds_lead_and_workers() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = AgentPool::team(test_config())
            .unwrap()
            .with_workspace(dir.path())
            .with_runtime(Arc::new(ScriptedRuntime::new(|request| {
                // Team mode must hand every agent a coordination surface
                // and the coordination instructions.
                assert!(request.coordination.is_some());
                let system_prompt = request.system_prompt.as_deref().unwrap_or_default();
                assert!(system_prompt.contains("Team Coordination"));
                Ok(RuntimeReply {
                    response: request.agent_id.clone(),
                    ..Default::default()
                })
            })));

        let results = pool.run_team("plan the work", "work the plan", Some(2)).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].agent_id, "lead");
        assert_eq!(results[1].agent_id, "worker-1");
        assert_eq!(results[2].agent_id, "worker-2");
        assert!(results.iter().all(|r| r.is_completed()));
    }

    #[tokio::test]
    async fn test_add_tasks_lands_on_board() {
        let pool = AgentPool::team(test_config()).unwrap();
        let ids = pool.add_tasks(["build auth", "write tests"]).unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(pool.board().pending_count().unwrap(), 2);
    }
}
