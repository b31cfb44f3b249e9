use std::{sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{
    client::WorkerClient,
    types::{Manager, ManagerError, ManagerResult, ManagerState},
};
use crate::lib::{
    node::Node,
    scheduler::types::Scheduler,
    tasks::{
        state::valid_state_transition,
        types::{State, Task, TaskEvent, TaskId},
    },
};

const DEFAULT_MAX_EVENT_HISTORY: usize = 1000;

impl ManagerState {
    /// Upserts `event`, evicting the oldest events beyond `max_events`.
    pub fn record_event(&mut self, event: TaskEvent, max_events: usize) {
        let event_id = event.id;
        if self.event_db.insert(event_id, event).is_none() {
            self.event_order.push_back(event_id);
        }

        while self.event_order.len() > max_events {
            if let Some(oldest) = self.event_order.pop_front() {
                self.event_db.remove(&oldest);
            }
        }
    }

    /// Records that `task_id` lives on `worker`, moving it off any other worker.
    pub fn place(&mut self, task_id: TaskId, worker: &str) {
        if let Some(previous) = self.task_worker_map.get(&task_id) {
            if previous == worker {
                return;
            }
            warn!(%task_id, %previous, %worker, "task placement moved");
            if let Some(tasks) = self.worker_task_map.get_mut(previous) {
                tasks.remove(&task_id);
            }
        }

        self.task_worker_map.insert(task_id, worker.to_string());
        self.worker_task_map
            .entry(worker.to_string())
            .or_default()
            .insert(task_id);
    }

    /// Checks that the cached copy of the event's task may move to the
    /// event's state. Tasks the manager has not seen yet always may.
    pub fn check_transition(&self, event: &TaskEvent) -> ManagerResult<()> {
        match self.task_db.get(&event.task.id) {
            Some(cached) if !valid_state_transition(&cached.state, &event.state) => {
                Err(ManagerError::InvalidStateTransition {
                    task_id: cached.id,
                    from: cached.state,
                    to: event.state,
                })
            }
            _ => Ok(()),
        }
    }

    /// Stores a task a worker accepted, unless the cached copy cannot move
    /// to its state.
    fn record_dispatched(&mut self, task: Task) {
        match self.task_db.get(&task.id) {
            Some(cached) if !valid_state_transition(&cached.state, &task.state) => {
                debug!(task_id = %task.id, cached = ?cached.state, dispatched = ?task.state, "keeping cached task");
            }
            _ => {
                self.task_db.insert(task.id, task);
            }
        }
    }

    /// Merges a task reported by `worker`, the authority for it. Only a
    /// finished cached copy wins over the report.
    pub fn reconcile(&mut self, worker: &str, task: Task) {
        self.place(task.id, worker);
        match self.task_db.get(&task.id) {
            Some(cached) if cached.state.is_terminal() => {
                debug!(task_id = %task.id, cached = ?cached.state, reported = ?task.state, "keeping terminal task");
            }
            _ => {
                self.task_db.insert(task.id, task);
            }
        }
    }
}

impl Manager {
    pub fn new(workers: Vec<String>, client: Arc<dyn WorkerClient>, scheduler: Box<dyn Scheduler>) -> Self {
        Manager {
            workers,
            state: Mutex::new(ManagerState::default()),
            client,
            scheduler,
            max_event_history: DEFAULT_MAX_EVENT_HISTORY,
        }
    }

    pub fn with_max_event_history(mut self, max_event_history: usize) -> Self {
        self.max_event_history = max_event_history;
        self
    }

    #[tracing::instrument(name = "Manager::add_task", skip_all, fields(
        event_id = %event.id,
        task_id = %event.task.id,
        state = ?event.state
    ))]
    pub async fn add_task(&self, event: TaskEvent) {
        let mut state = self.state.lock().await;
        state.pending.push_back(event.clone());
        state.record_event(event, self.max_event_history);
        info!(pending = state.pending.len(), "task event queued");
    }

    /// Queues a Completed event for a task the manager knows about, as long
    /// as its cached state allows it.
    pub async fn request_stop(&self, task_id: TaskId) -> ManagerResult<TaskEvent> {
        let event = {
            let state = self.state.lock().await;
            let mut task = state
                .task_db
                .get(&task_id)
                .cloned()
                .ok_or(ManagerError::TaskNotFound(task_id))?;

            task.state = State::Completed;
            let event = TaskEvent::new(State::Completed, task);
            state.check_transition(&event)?;
            event
        };
        self.add_task(event.clone()).await;

        Ok(event)
    }

    pub async fn get_tasks(&self) -> Vec<Task> {
        self.state.lock().await.task_db.values().cloned().collect()
    }

    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Refreshes the capacity of every worker from its stats. Unreachable
    /// workers are dropped from scheduling until they report again.
    #[tracing::instrument(name = "Manager::update_nodes", skip_all)]
    pub async fn update_nodes(&self) {
        for worker in &self.workers {
            match self.client.get_stats(worker).await {
                Ok(stats) => {
                    let node = Node::from_stats(worker, &stats);
                    self.state.lock().await.nodes.insert(worker.clone(), node);
                }
                Err(error) => {
                    warn!(%worker, %error, "unable to fetch worker stats");
                    self.state.lock().await.nodes.remove(worker);
                }
            }
        }
    }

    #[tracing::instrument(name = "Manager::select_worker", skip_all, fields(task_id = %task.id))]
    pub async fn select_worker(&self, task: &Task) -> ManagerResult<String> {
        let missing_nodes = {
            let state = self.state.lock().await;
            self.workers
                .iter()
                .any(|worker| !state.nodes.contains_key(worker))
        };
        if missing_nodes {
            self.update_nodes().await;
        }

        let candidates: Vec<Node> = {
            let state = self.state.lock().await;
            self.workers
                .iter()
                .filter_map(|worker| state.nodes.get(worker).cloned())
                .collect()
        };

        let worker = self
            .scheduler
            .choose_worker(&candidates, task)
            .ok_or(ManagerError::NoEligibleWorker(task.id))?;
        info!(%worker, "worker selected");

        Ok(worker)
    }

    async fn requeue_front(&self, event: TaskEvent) {
        self.state.lock().await.pending.push_front(event);
    }

    /// Dispatches the oldest pending event. Returns the id of the task that was
    /// sent, or `None` when nothing was pending. Events that could not be
    /// delivered go back to the front of the queue.
    #[tracing::instrument(name = "Manager::send_work", skip_all)]
    pub async fn send_work(&self) -> ManagerResult<Option<TaskId>> {
        let (event, placement) = {
            let mut state = self.state.lock().await;
            let Some(event) = state.pending.pop_front() else {
                debug!("no pending tasks to send");
                return Ok(None);
            };
            if let Err(error) = state.check_transition(&event) {
                warn!(event_id = %event.id, %error, "dropping task event");
                return Err(error);
            }
            let placement = state.task_worker_map.get(&event.task.id).cloned();
            (event, placement)
        };
        let task_id = event.task.id;

        let worker = match placement {
            Some(worker) => worker,
            None if event.state == State::Completed => {
                warn!(%task_id, "dropping stop event for a task that was never placed");
                return Err(ManagerError::TaskNotPlaced(task_id));
            }
            None => match self.select_worker(&event.desired_task()).await {
                Ok(worker) => worker,
                Err(error) => {
                    warn!(%task_id, %error, "task stays pending");
                    self.requeue_front(event).await;
                    return Err(error);
                }
            },
        };

        let accepted = match self.client.send_task(&worker, &event).await {
            Ok(task) => task,
            Err(error) => {
                error!(%task_id, %worker, %error, "unable to send task to worker");
                self.requeue_front(event).await;
                return Err(error);
            }
        };
        info!(%task_id, %worker, state = ?event.state, "task sent to worker");

        let mut state = self.state.lock().await;
        let newly_placed = !state.task_worker_map.contains_key(&task_id);
        state.place(task_id, &worker);
        if newly_placed {
            if let Some(node) = state.nodes.get_mut(&worker) {
                node.allocate(&accepted);
            }
        }
        if event.state != State::Completed {
            state.record_dispatched(accepted);
        }
        state.record_event(event, self.max_event_history);

        Ok(Some(task_id))
    }

    /// Pulls every worker's task list and merges it into the task db.
    #[tracing::instrument(name = "Manager::update_tasks", skip_all)]
    pub async fn update_tasks(&self) {
        for worker in &self.workers {
            debug!(%worker, "checking worker");

            let tasks = match self.client.get_tasks(worker).await {
                Ok(tasks) => tasks,
                Err(error) => {
                    warn!(%worker, %error, "unable to fetch tasks from worker");
                    continue;
                }
            };

            let mut state = self.state.lock().await;
            for task in tasks {
                debug!(task_id = %task.id, state = ?task.state, "reconciling task");
                state.reconcile(worker, task);
            }
        }
    }
}

/// Sends pending work back to back, sleeping `interval` once the queue is
/// empty or a dispatch fails. Dropped events do not count as failures.
pub async fn process_tasks(manager: Arc<Manager>, interval: Duration) {
    loop {
        match manager.send_work().await {
            Ok(Some(task_id)) => {
                let pending = manager.pending_len().await;
                debug!(%task_id, pending, "task dispatched");
                continue;
            }
            Ok(None) => debug!(?interval, "no work to send, sleeping"),
            Err(
                ManagerError::InvalidStateTransition { .. } | ManagerError::TaskNotPlaced(_),
            ) => continue,
            Err(error) => warn!(%error, "dispatch pass failed"),
        }
        tokio::time::sleep(interval).await;
    }
}

pub async fn update_tasks(manager: Arc<Manager>, interval: Duration) {
    loop {
        manager.update_tasks().await;
        manager.update_nodes().await;
        tokio::time::sleep(interval).await;
    }
}
