//! TaskBoard: shared work queue for agent coordination.
//!
//! In-memory with optional file-backed persistence. Cross-process safety
//! comes from an advisory lock on a peer lock file: every mutating
//! operation acquires the exclusive lock, reloads from disk, mutates, and
//! writes back before releasing. Agents in other processes interact with
//! the board through [`crate::coordination::CoordinationServer`].

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{PoolError, Result};
use crate::fslock::FileLock;
use crate::util::{epoch_secs, truncate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// A task on the shared board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardTask {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub result: Option<String>,
    #[serde(default)]
    pub priority: i64,
    pub created_at: f64,
    pub claimed_at: Option<f64>,
    pub completed_at: Option<f64>,
}

#[derive(Serialize, Deserialize)]
struct BoardState {
    tasks: Vec<BoardTask>,
}

/// Shared task list with atomic claiming.
///
/// Multiple agents, in this process or others, can concurrently claim
/// tasks without ever observing the same task as their claim result.
pub struct TaskBoard {
    tasks: Mutex<HashMap<String, BoardTask>>,
    state_file: Option<PathBuf>,
    lock_file: Option<PathBuf>,
    stale_timeout: Option<Duration>,
}

impl TaskBoard {
    /// Single-process board: no file I/O, no locking.
    pub fn in_memory() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            state_file: None,
            lock_file: None,
            stale_timeout: None,
        }
    }

    /// File-backed board rooted at `state_dir`. Existing state is loaded.
    pub fn at_dir(state_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_dir)?;
        let board = Self {
            tasks: Mutex::new(HashMap::new()),
            state_file: Some(state_dir.join("taskboard.json")),
            lock_file: Some(state_dir.join("taskboard.lock")),
            stale_timeout: None,
        };
        board.reload()?;
        Ok(board)
    }

    /// Enable the stale sweep: an in-progress task whose claim is at least
    /// this old reverts to pending on the next claim.
    pub fn with_stale_timeout(mut self, stale_timeout: Duration) -> Self {
        self.stale_timeout = Some(stale_timeout);
        self
    }

    /// Add a pending task. Returns its 8-character id.
    pub fn add(&self, description: &str, depends_on: &[String], priority: i64) -> Result<String> {
        let id = self.mutate(|tasks| {
            let mut id = short_id();
            while tasks.contains_key(&id) {
                id = short_id();
            }
            tasks.insert(
                id.clone(),
                BoardTask {
                    id: id.clone(),
                    description: description.to_string(),
                    status: TaskStatus::Pending,
                    assigned_to: None,
                    depends_on: depends_on.to_vec(),
                    result: None,
                    priority,
                    created_at: epoch_secs(),
                    claimed_at: None,
                    completed_at: None,
                },
            );
            Ok(id)
        })?;
        info!(task_id = %id, description = %truncate(description, 60), "Task added");
        Ok(id)
    }

    /// Atomically claim the next available task.
    ///
    /// A task is available when it is pending and every dependency exists
    /// and is completed; an unknown dependency id blocks the task.
    /// Candidates are ordered by priority (highest first) then creation
    /// time (oldest first). Returns `None` when nothing is claimable.
    pub fn claim(&self, agent_id: &str) -> Result<Option<BoardTask>> {
        let stale_timeout = self.stale_timeout;
        let claimed = self.mutate(|tasks| {
            if let Some(stale_timeout) = stale_timeout {
                sweep_stale(tasks, stale_timeout);
            }

            let completed: HashSet<String> = tasks
                .values()
                .filter(|t| t.status == TaskStatus::Completed)
                .map(|t| t.id.clone())
                .collect();

            let mut candidates: Vec<&BoardTask> = tasks
                .values()
                .filter(|t| {
                    t.status == TaskStatus::Pending
                        && t.depends_on.iter().all(|dep| completed.contains(dep))
                })
                .collect();
            candidates.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.created_at.total_cmp(&b.created_at))
            });
            let chosen = candidates.first().map(|t| t.id.clone());

            match chosen {
                Some(id) => {
                    let task = tasks
                        .get_mut(&id)
                        .ok_or_else(|| PoolError::TaskNotFound(id.clone()))?;
                    task.status = TaskStatus::InProgress;
                    task.assigned_to = Some(agent_id.to_string());
                    task.claimed_at = Some(epoch_secs());
                    Ok(Some(task.clone()))
                }
                None => Ok(None),
            }
        })?;

        if let Some(task) = &claimed {
            info!(
                task_id = %task.id,
                agent_id = %agent_id,
                description = %truncate(&task.description, 60),
                "Task claimed"
            );
        }
        Ok(claimed)
    }

    /// Mark a task completed. The task must currently be in progress.
    pub fn complete(&self, task_id: &str, result: Option<String>) -> Result<()> {
        self.mutate_task(task_id, |task| {
            require_status(task, TaskStatus::InProgress)?;
            task.status = TaskStatus::Completed;
            task.result = result;
            task.assigned_to = None;
            task.completed_at = Some(epoch_secs());
            Ok(())
        })?;
        info!(task_id = %task_id, "Task completed");
        Ok(())
    }

    /// Mark a task failed, storing the error as its result.
    pub fn fail(&self, task_id: &str, error: &str) -> Result<()> {
        self.mutate_task(task_id, |task| {
            require_status(task, TaskStatus::InProgress)?;
            task.status = TaskStatus::Failed;
            task.result = Some(error.to_string());
            task.assigned_to = None;
            task.completed_at = Some(epoch_secs());
            Ok(())
        })?;
        warn!(task_id = %task_id, error = %truncate(error, 80), "Task failed");
        Ok(())
    }

    /// Release a claimed task back to pending.
    pub fn release(&self, task_id: &str) -> Result<()> {
        self.mutate_task(task_id, |task| {
            require_status(task, TaskStatus::InProgress)?;
            task.status = TaskStatus::Pending;
            task.assigned_to = None;
            task.claimed_at = None;
            Ok(())
        })?;
        info!(task_id = %task_id, "Task released back to pending");
        Ok(())
    }

    /// Release every in-progress task assigned to an agent. Used for
    /// cleanup when an agent finishes, crashes, or times out. Returns the
    /// released task ids.
    pub fn release_agent_tasks(&self, agent_id: &str) -> Result<Vec<String>> {
        let released = self.mutate(|tasks| {
            let mut released = Vec::new();
            for task in tasks.values_mut() {
                if task.status == TaskStatus::InProgress
                    && task.assigned_to.as_deref() == Some(agent_id)
                {
                    task.status = TaskStatus::Pending;
                    task.assigned_to = None;
                    task.claimed_at = None;
                    released.push(task.id.clone());
                }
            }
            Ok(released)
        })?;
        if !released.is_empty() {
            info!(agent_id = %agent_id, released = ?released, "Released agent tasks");
        }
        Ok(released)
    }

    /// Snapshot of all tasks, oldest first. Auto-reloads if file-backed.
    pub fn status(&self) -> Result<Vec<BoardTask>> {
        self.reload()?;
        let tasks = self.tasks.lock();
        let mut snapshot: Vec<BoardTask> = tasks.values().cloned().collect();
        snapshot.sort_by(|a, b| a.created_at.total_cmp(&b.created_at));
        Ok(snapshot)
    }

    pub fn pending_count(&self) -> Result<usize> {
        self.count_with(|t| t.status == TaskStatus::Pending)
    }

    pub fn completed_count(&self) -> Result<usize> {
        self.count_with(|t| t.status == TaskStatus::Completed)
    }

    /// True when no task is pending or in progress.
    pub fn all_done(&self) -> Result<bool> {
        self.reload()?;
        let tasks = self.tasks.lock();
        Ok(tasks
            .values()
            .all(|t| matches!(t.status, TaskStatus::Completed | TaskStatus::Failed)))
    }

    /// Reload state from disk. No-op for in-memory boards.
    pub fn reload(&self) -> Result<()> {
        let (Some(state_file), Some(lock_file)) = (&self.state_file, &self.lock_file) else {
            return Ok(());
        };
        let _guard = FileLock::shared(lock_file)?;
        let mut tasks = self.tasks.lock();
        Self::load_into(state_file, &mut tasks)
    }

    fn count_with(&self, predicate: impl Fn(&BoardTask) -> bool) -> Result<usize> {
        self.reload()?;
        let tasks = self.tasks.lock();
        Ok(tasks.values().filter(|t| predicate(t)).count())
    }

    /// Run a mutation with reload-mutate-persist semantics. For a
    /// file-backed board the whole sequence happens under the exclusive
    /// file lock; the persist helper is only reachable from inside this
    /// critical section, so it never re-acquires.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, BoardTask>) -> Result<T>,
    ) -> Result<T> {
        match (&self.state_file, &self.lock_file) {
            (Some(state_file), Some(lock_file)) => {
                let _guard = FileLock::exclusive(lock_file)?;
                let mut tasks = self.tasks.lock();
                Self::load_into(state_file, &mut tasks)?;
                let out = f(&mut tasks)?;
                Self::persist(state_file, &tasks)?;
                Ok(out)
            }
            _ => {
                let mut tasks = self.tasks.lock();
                f(&mut tasks)
            }
        }
    }

    fn mutate_task(&self, task_id: &str, f: impl FnOnce(&mut BoardTask) -> Result<()>) -> Result<()> {
        self.mutate(|tasks| {
            let task = tasks
                .get_mut(task_id)
                .ok_or_else(|| PoolError::TaskNotFound(task_id.to_string()))?;
            f(task)
        })
    }

    fn load_into(state_file: &Path, tasks: &mut HashMap<String, BoardTask>) -> Result<()> {
        if !state_file.exists() {
            return Ok(());
        }
        let content = std::fs::read_to_string(state_file)?;
        let state: BoardState = serde_json::from_str(&content)?;
        *tasks = state.tasks.into_iter().map(|t| (t.id.clone(), t)).collect();
        Ok(())
    }

    fn persist(state_file: &Path, tasks: &HashMap<String, BoardTask>) -> Result<()> {
        let state = BoardState {
            tasks: tasks.values().cloned().collect(),
        };
        std::fs::write(state_file, serde_json::to_string_pretty(&state)?)?;
        Ok(())
    }
}

fn sweep_stale(tasks: &mut HashMap<String, BoardTask>, stale_timeout: Duration) {
    let now = epoch_secs();
    for task in tasks.values_mut() {
        if task.status != TaskStatus::InProgress {
            continue;
        }
        let Some(claimed_at) = task.claimed_at else {
            continue;
        };
        if now - claimed_at >= stale_timeout.as_secs_f64() {
            warn!(
                task_id = %task.id,
                assigned_to = ?task.assigned_to,
                age_secs = now - claimed_at,
                "Stale claim, reverting task to pending"
            );
            task.status = TaskStatus::Pending;
            task.assigned_to = None;
            task.claimed_at = None;
        }
    }
}

fn require_status(task: &BoardTask, expected: TaskStatus) -> Result<()> {
    if task.status != expected {
        return Err(PoolError::InvalidTaskState {
            task_id: task.id.clone(),
            expected: expected.as_str().to_string(),
            actual: task.status.as_str().to_string(),
        });
    }
    Ok(())
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}
