use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;

use super::client::WorkerClient;
use crate::lib::{
    node::Node,
    scheduler::types::Scheduler,
    tasks::types::{EventId, State, Task, TaskEvent, TaskId},
};

/// Accepts task events from clients, places them on workers and keeps a
/// cached view of every task, reconciled against what the workers report.
pub struct Manager {
    pub workers: Vec<String>,
    pub(super) state: Mutex<ManagerState>,
    pub(super) client: Arc<dyn WorkerClient>,
    pub(super) scheduler: Box<dyn Scheduler>,
    pub(super) max_event_history: usize,
}

/// Everything the manager knows, guarded by a single lock that is never held
/// across a call to a worker.
#[derive(Debug, Default)]
pub struct ManagerState {
    pub pending: VecDeque<TaskEvent>,
    pub task_db: HashMap<TaskId, Task>,
    pub event_db: HashMap<EventId, TaskEvent>,
    /// Insertion order of `event_db`, oldest first.
    pub event_order: VecDeque<EventId>,
    pub worker_task_map: HashMap<String, HashSet<TaskId>>,
    pub task_worker_map: HashMap<TaskId, String>,
    /// Last known capacity of each worker, keyed by address.
    pub nodes: HashMap<String, Node>,
}

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("no eligible worker for task {0}")]
    NoEligibleWorker(TaskId),
    #[error("worker {worker} communication failed: {message}")]
    WorkerCommunication { worker: String, message: String },
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("task {0} not found")]
    TaskNotFound(TaskId),
    #[error("task {0} has not been placed on any worker")]
    TaskNotPlaced(TaskId),
    #[error("invalid state transition for task {task_id}: {from:?} -> {to:?}")]
    InvalidStateTransition {
        task_id: TaskId,
        from: State,
        to: State,
    },
}

pub type ManagerResult<T> = Result<T, ManagerError>;
