use std::{collections::HashMap, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::lib::{
    queue::WorkQueue,
    tasks::{
        runtime::{Runtime, RuntimeError},
        types::{State, Task, TaskId},
    },
};

/// Executes tasks through a container runtime. Its task store is the source of
/// truth for what runs on this machine.
pub struct Worker {
    pub name: String,
    pub(super) queue: WorkQueue<Task>,
    pub(super) db: Mutex<HashMap<TaskId, Task>>,
    pub(super) runtime: Arc<dyn Runtime>,
    pub(super) runtime_timeout: Duration,
    /// Held for the whole of `run_task` so queued tasks drain one at a time.
    pub(super) run_lock: Mutex<()>,
    pub(super) sysinfo: Mutex<sysinfo::System>,
    pub(super) stats: Mutex<Option<Stats>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub hostname: String,
    pub system_name: String,
    pub cpu_usage: f32,
    pub total_cpus: u64,
    pub total_memory: u64,
    pub used_memory: u64,
    pub total_disk: u64,
    pub used_disk: u64,
    pub task_count: u64,
    pub queue_depth: u64,
    pub cpu_allocated: f64,
    pub memory_allocated: u64,
    pub disk_allocated: u64,
}

/// Resources requested by the tasks a worker has accepted but not finished.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Allocation {
    pub cpu: f64,
    pub memory: u64,
    pub disk: u64,
}

impl Allocation {
    pub fn add(&mut self, task: &Task) {
        self.cpu += task.cpu;
        self.memory = self.memory.saturating_add(task.memory);
        self.disk = self.disk.saturating_add(task.disk);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// The queue was empty.
    Idle,
    /// The desired state was already applied.
    Noop,
    Start,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    pub task_id: Option<TaskId>,
    pub action: Action,
    pub container_id: Option<String>,
}

impl TaskResult {
    pub fn idle() -> Self {
        TaskResult {
            task_id: None,
            action: Action::Idle,
            container_id: None,
        }
    }

    pub fn new(task: &Task, action: Action) -> Self {
        TaskResult {
            task_id: Some(task.id),
            action,
            container_id: task.container_id.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("invalid state transition for task {task_id}: {from:?} -> {to:?}")]
    InvalidStateTransition {
        task_id: TaskId,
        from: State,
        to: State,
    },
    #[error("task {task_id} reached the dispatcher in unexpected state {state:?}")]
    UnexpectedState { task_id: TaskId, state: State },
    #[error("runtime failed for task {task_id}: {source}")]
    Runtime {
        task_id: TaskId,
        #[source]
        source: RuntimeError,
    },
    #[error("task {0} not found")]
    TaskNotFound(TaskId),
}

pub type WorkerResult<T> = Result<T, WorkerError>;
