use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::EngineCallbacks;
use crate::error::{CoreError, CoreResult};
use crate::runner::{AgentRunner, RunAgentOptions};
use crate::thread::{CreateOpts, ThreadStore};
use crate::time::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Active,
    Waiting,
    Done,
    Canceled,
}

/// `true` for a terminal status a task never transitions out of.
fn is_terminal(status: TaskStatus) -> bool {
    matches!(status, TaskStatus::Done | TaskStatus::Canceled)
}

fn validate_transition(from: TaskStatus, to: TaskStatus) -> CoreResult<()> {
    use TaskStatus::*;
    let allowed = matches!(
        (from, to),
        (Active, Waiting) | (Active, Done) | (Active, Canceled) | (Waiting, Active) | (Waiting, Done) | (Waiting, Canceled)
    );
    if allowed {
        Ok(())
    } else {
        Err(CoreError::ValidationError(format!("illegal task status transition {from:?} -> {to:?}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub title: String,
    pub done: bool,
    #[serde(default)]
    pub task_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub title: String,
    pub description: String,
    /// "user" or an agent id.
    pub owner: String,
    pub created_by: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub parent_task_id: Option<u64>,
    #[serde(default)]
    pub thread_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Live tasks in one JSON file; terminal tasks move to an append-only
/// history log, mirroring §6.3's "one shared record plus a separate
/// history log for terminal ones."
pub struct TaskStore {
    live_path: PathBuf,
    history_path: PathBuf,
    seq_path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl TaskStore {
    pub fn new(workspace_root: &std::path::Path, clock: Arc<dyn Clock>) -> Self {
        let state = crate::workspace::state_dir(workspace_root);
        Self {
            live_path: state.join("tasks.json"),
            history_path: state.join("tasks_history.jsonl"),
            seq_path: state.join("tasks_seq.txt"),
            clock,
        }
    }

    fn load_live(&self) -> CoreResult<Vec<Task>> {
        if !self.live_path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.live_path)?;
        Ok(serde_json::from_str(&content).unwrap_or_default())
    }

    fn save_live(&self, tasks: &[Task]) -> CoreResult<()> {
        if let Some(parent) = self.live_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(tasks)
            .map_err(|e| CoreError::StoreCorruption(e.to_string()))?;
        std::fs::write(&self.live_path, content)?;
        Ok(())
    }

    fn append_history(&self, task: &Task) -> CoreResult<()> {
        use std::io::Write as _;
        if let Some(parent) = self.history_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(task).map_err(|e| CoreError::StoreCorruption(e.to_string()))?;
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(&self.history_path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn find_in_history(&self, task_id: u64) -> CoreResult<Task> {
        if !self.history_path.exists() {
            return Err(CoreError::ValidationError(format!("unknown task '{task_id}'")));
        }
        let content = std::fs::read_to_string(&self.history_path)?;
        content
            .lines()
            .rev()
            .filter_map(|line| serde_json::from_str::<Task>(line).ok())
            .find(|t| t.id == task_id)
            .ok_or_else(|| CoreError::ValidationError(format!("unknown task '{task_id}'")))
    }

    /// Next monotonic task id, persisted alongside `tasks.json` so ids
    /// never repeat even once a task has moved into the history log.
    fn next_id(&self) -> CoreResult<u64> {
        let current = std::fs::read_to_string(&self.seq_path)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(0);
        let next = current + 1;
        if let Some(parent) = self.seq_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.seq_path, next.to_string())?;
        Ok(next)
    }

    pub fn list_active(&self) -> CoreResult<Vec<Task>> {
        Ok(self
            .load_live()?
            .into_iter()
            .filter(|t| matches!(t.status, TaskStatus::Active | TaskStatus::Waiting))
            .collect())
    }

    fn insert(
        &self,
        title: &str,
        description: &str,
        owner: &str,
        created_by: &str,
        parent_task_id: Option<u64>,
    ) -> CoreResult<Task> {
        let now = self.clock.now();
        let task = Task {
            id: self.next_id()?,
            title: title.to_string(),
            description: description.to_string(),
            owner: owner.to_string(),
            created_by: created_by.to_string(),
            status: TaskStatus::Active,
            steps: Vec::new(),
            resources: Vec::new(),
            parent_task_id,
            thread_id: None,
            created_at: now,
            updated_at: now,
        };
        let mut tasks = self.load_live()?;
        tasks.push(task.clone());
        self.save_live(&tasks)?;
        Ok(task)
    }

    pub fn create(&self, title: &str, description: &str, owner: &str, created_by: &str) -> CoreResult<Task> {
        self.insert(title, description, owner, created_by, None)
    }

    pub fn create_subtask(
        &self,
        parent_task_id: u64,
        title: &str,
        description: &str,
        owner: &str,
        created_by: &str,
    ) -> CoreResult<Task> {
        self.insert(title, description, owner, created_by, Some(parent_task_id))
    }

    pub fn bind_thread(&self, task_id: u64, thread_id: &str) -> CoreResult<()> {
        let mut tasks = self.load_live()?;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| CoreError::ValidationError(format!("unknown task '{task_id}'")))?;
        task.thread_id = Some(thread_id.to_string());
        task.updated_at = self.clock.now();
        self.save_live(&tasks)
    }

    /// Toggles a step's `done` flag. `active -> waiting -> done` is the
    /// task's own concern; steps never drive a status change by themselves.
    pub fn set_step_done(&self, task_id: u64, step_index: usize, done: bool) -> CoreResult<Task> {
        let mut tasks = self.load_live()?;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| CoreError::ValidationError(format!("unknown task '{task_id}'")))?;
        let step = task
            .steps
            .get_mut(step_index)
            .ok_or_else(|| CoreError::ValidationError(format!("task '{task_id}' has no step {step_index}")))?;
        step.done = done;
        task.updated_at = self.clock.now();
        let updated = task.clone();
        self.save_live(&tasks)?;
        Ok(updated)
    }

    /// Moves a task between `active`/`waiting`/`done`/`canceled` per the
    /// allowed transition matrix. `Canceled` is delegated to `cancel` so
    /// the subtask cascade always applies, no matter which entry point a
    /// caller used.
    pub fn update_status(&self, task_id: u64, new_status: TaskStatus) -> CoreResult<Task> {
        if new_status == TaskStatus::Canceled {
            self.cancel(task_id)?;
            return self.find_in_history(task_id);
        }

        let mut tasks = self.load_live()?;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| CoreError::ValidationError(format!("unknown task '{task_id}'")))?;
        validate_transition(task.status, new_status)?;
        task.status = new_status;
        task.updated_at = self.clock.now();
        let updated = task.clone();

        if is_terminal(new_status) {
            tasks.retain(|t| t.id != task_id);
            self.save_live(&tasks)?;
            self.append_history(&updated)?;
        } else {
            self.save_live(&tasks)?;
        }
        Ok(updated)
    }

    /// Cancellation cascades to linked subtasks; each terminal task moves
    /// from the live set to the history log, grown by exactly one record.
    pub fn cancel(&self, task_id: u64) -> CoreResult<()> {
        let mut tasks = self.load_live()?;
        let mut to_cancel = vec![task_id];
        let mut i = 0;
        while i < to_cancel.len() {
            let id = to_cancel[i];
            for t in &tasks {
                if t.parent_task_id == Some(id) && !to_cancel.contains(&t.id) {
                    to_cancel.push(t.id);
                }
            }
            i += 1;
        }

        let now = self.clock.now();
        let mut history_entries = Vec::new();
        tasks.retain_mut(|t| {
            if to_cancel.contains(&t.id) {
                t.status = TaskStatus::Canceled;
                t.updated_at = now;
                history_entries.push(t.clone());
                false
            } else {
                true
            }
        });
        self.save_live(&tasks)?;
        for entry in history_entries {
            self.append_history(&entry)?;
        }
        Ok(())
    }
}

/// Hourly tick over owned-by-agent tasks. The in-flight set is in-memory
/// only and resets on restart — a task is never doubly invoked across
/// overlapping hours, but also never durably leased.
pub struct TaskScheduler {
    store: Arc<TaskStore>,
    threads: Arc<ThreadStore>,
    runner: Arc<AgentRunner>,
    in_flight: Mutex<HashSet<u64>>,
}

const WORK_YOUR_TASK_PROMPT: &str = "Work your assigned task. Review its description and steps, make progress, and update its status when done.";

impl TaskScheduler {
    pub fn new(store: Arc<TaskStore>, threads: Arc<ThreadStore>, runner: Arc<AgentRunner>) -> Self {
        Self {
            store,
            threads,
            runner,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub async fn tick(&self) {
        let tasks = match self.store.list_active() {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("failed to load active tasks: {e}");
                return;
            }
        };

        for task in tasks {
            if task.owner == "user" {
                continue;
            }
            {
                let mut in_flight = self.in_flight.lock().unwrap();
                if in_flight.contains(&task.id) {
                    continue;
                }
                in_flight.insert(task.id);
            }
            self.run_one(task).await;
        }
    }

    async fn run_one(&self, task: Task) {
        let thread_id = match &task.thread_id {
            Some(id) => id.clone(),
            None => match self.threads.create(
                &task.owner,
                "internal",
                CreateOpts { task_id: Some(task.id.to_string()) },
            ) {
                Ok(id) => {
                    if let Err(e) = self.store.bind_thread(task.id, &id) {
                        tracing::warn!("failed to bind thread for task {}: {e}", task.id);
                    }
                    id
                }
                Err(e) => {
                    tracing::warn!("failed to create thread for task {}: {e}", task.id);
                    self.in_flight.lock().unwrap().remove(&task.id);
                    return;
                }
            },
        };

        let mut options = RunAgentOptions::default();
        options.background = true;
        let result = self
            .runner
            .run_agent(&task.owner, &thread_id, WORK_YOUR_TASK_PROMPT, EngineCallbacks::default(), options)
            .await;
        if let Err(e) = result {
            tracing::warn!("task {} turn failed: {e}", task.id);
        }

        self.in_flight.lock().unwrap().remove(&task.id);
    }
}
