use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{
    stats::get_stats,
    types::{Action, Allocation, Stats, TaskResult, Worker, WorkerError, WorkerResult},
};
use crate::lib::{
    queue::WorkQueue,
    tasks::{
        runtime::{Runtime, RuntimeError},
        state::valid_state_transition,
        types::{ContainerConfig, State, Task, TaskId},
    },
};

const DEFAULT_RUNTIME_TIMEOUT: Duration = Duration::from_secs(300);

impl Worker {
    pub fn new(name: &str, runtime: Arc<dyn Runtime>) -> Self {
        Worker {
            name: name.to_string(),
            queue: WorkQueue::new(),
            db: Mutex::new(HashMap::new()),
            runtime,
            runtime_timeout: DEFAULT_RUNTIME_TIMEOUT,
            run_lock: Mutex::new(()),
            sysinfo: Mutex::new(sysinfo::System::new_all()),
            stats: Mutex::new(None),
        }
    }

    pub fn with_runtime_timeout(mut self, timeout: Duration) -> Self {
        self.runtime_timeout = timeout;
        self
    }

    /// Queues `task` for processing. The desired state is validated when the
    /// task is dequeued, against whatever is persisted at that point.
    pub async fn add_task(&self, task: Task) {
        self.queue.enqueue(task).await;
    }

    pub async fn queue_depth(&self) -> usize {
        self.queue.len().await
    }

    #[tracing::instrument(name = "Worker::run_task", skip_all, fields(worker = %self.name))]
    pub async fn run_task(&self) -> WorkerResult<TaskResult> {
        let _running = self.run_lock.lock().await;

        let Some(task_queued) = self.queue.dequeue().await else {
            debug!("no tasks in queue");
            return Ok(TaskResult::idle());
        };

        let task_persisted = {
            let mut db = self.db.lock().await;
            let persisted = db.get(&task_queued.id).cloned();
            if persisted.is_none() {
                db.insert(task_queued.id, task_queued.clone());
            }
            persisted
        };

        if let Some(persisted) = task_persisted {
            if !valid_state_transition(&persisted.state, &task_queued.state) {
                warn!(
                    task_id = %persisted.id,
                    from = ?persisted.state,
                    to = ?task_queued.state,
                    "invalid state transition"
                );
                return Err(WorkerError::InvalidStateTransition {
                    task_id: persisted.id,
                    from: persisted.state,
                    to: task_queued.state,
                });
            }

            if persisted.state == task_queued.state {
                info!(task_id = %persisted.id, state = ?persisted.state, "desired state already applied");
                return Ok(TaskResult::new(&persisted, Action::Noop));
            }
        }

        match task_queued.state {
            State::Scheduled => self.start_task(task_queued).await,
            State::Completed => self.stop_task(task_queued).await,
            state => {
                error!(task_id = %task_queued.id, ?state, "task reached dispatcher in unexpected state");
                Err(WorkerError::UnexpectedState {
                    task_id: task_queued.id,
                    state,
                })
            }
        }
    }

    #[tracing::instrument(name = "Worker::start_task", skip_all, fields(task_id = %task.id, image = %task.image))]
    pub async fn start_task(&self, mut task: Task) -> WorkerResult<TaskResult> {
        task.start_time = Some(Utc::now());
        let config = ContainerConfig::from(&task);

        let result = tokio::time::timeout(self.runtime_timeout, self.runtime.run(&config))
            .await
            .unwrap_or(Err(RuntimeError::Timeout(self.runtime_timeout)));

        match result {
            Err(error) => {
                error!(?error, "unable to start task");
                task.state = State::Failed;
                let task_id = task.id;
                self.persist(task).await;
                Err(WorkerError::Runtime {
                    task_id,
                    source: error,
                })
            }
            Ok(container_id) => {
                info!(%container_id, "task started");
                task.container_id = Some(container_id);
                task.state = State::Running;
                let result = TaskResult::new(&task, Action::Start);
                self.persist(task).await;
                Ok(result)
            }
        }
    }

    /// Stops the container behind `task` and marks it Completed. A runtime
    /// failure is logged only: the task is finished either way.
    #[tracing::instrument(name = "Worker::stop_task", skip_all, fields(task_id = %task.id))]
    pub async fn stop_task(&self, task: Task) -> WorkerResult<TaskResult> {
        let mut record = self.db.lock().await.get(&task.id).cloned().unwrap_or(task);

        if record.state.is_terminal() {
            debug!(state = ?record.state, "task already finished");
            return Ok(TaskResult::new(&record, Action::Noop));
        }

        let result = match record.container_id.as_deref() {
            Some(container_id) => {
                tokio::time::timeout(self.runtime_timeout, self.runtime.stop(container_id))
                    .await
                    .unwrap_or(Err(RuntimeError::Timeout(self.runtime_timeout)))
            }
            None => Err(RuntimeError::MissingContainer),
        };

        if let Err(error) = result {
            warn!(?error, container_id = ?record.container_id, "unable to stop container");
        }

        record.finish_time = Some(Utc::now());
        record.state = State::Completed;
        info!(container_id = ?record.container_id, "task stopped");

        let result = TaskResult::new(&record, Action::Stop);
        self.persist(record).await;
        Ok(result)
    }

    /// Queues a Completed copy of a known task. Tasks that cannot move to
    /// Completed from their current state queue nothing.
    pub async fn request_stop(&self, task_id: TaskId) -> WorkerResult<Task> {
        let mut task = self
            .get_task(task_id)
            .await
            .ok_or(WorkerError::TaskNotFound(task_id))?;

        if !valid_state_transition(&task.state, &State::Completed) {
            warn!(%task_id, state = ?task.state, "task cannot be stopped from its current state");
            return Err(WorkerError::InvalidStateTransition {
                task_id,
                from: task.state,
                to: State::Completed,
            });
        }

        task.state = State::Completed;
        self.add_task(task.clone()).await;
        info!(%task_id, container_id = ?task.container_id, "queued task stop");

        Ok(task)
    }

    pub async fn get_task(&self, task_id: TaskId) -> Option<Task> {
        self.db.lock().await.get(&task_id).cloned()
    }

    pub async fn get_tasks(&self) -> Vec<Task> {
        self.db.lock().await.values().cloned().collect()
    }

    async fn persist(&self, task: Task) {
        self.db.lock().await.insert(task.id, task);
    }

    #[tracing::instrument(name = "Worker::collect_stats", skip_all, fields(worker = %self.name))]
    pub async fn collect_stats(&self) -> Stats {
        let (task_count, allocation) = {
            let db = self.db.lock().await;
            let mut allocation = Allocation::default();
            for task in db
                .values()
                .filter(|task| matches!(task.state, State::Scheduled | State::Running))
            {
                allocation.add(task);
            }
            (db.len() as u64, allocation)
        };
        let queue_depth = self.queue.len().await as u64;

        let stats = {
            let mut sysinfo = self.sysinfo.lock().await;
            sysinfo.refresh_cpu_usage();
            sysinfo.refresh_memory();
            get_stats(&sysinfo, task_count, queue_depth, allocation)
        };

        *self.stats.lock().await = Some(stats.clone());
        stats
    }

    /// Last collected stats, collecting them now if none exist yet.
    pub async fn stats(&self) -> Stats {
        let cached = self.stats.lock().await.clone();
        match cached {
            Some(stats) => stats,
            None => self.collect_stats().await,
        }
    }
}

/// Drains the queue one task at a time, sleeping `interval` whenever it is empty.
pub async fn run_tasks(worker: Arc<Worker>, interval: Duration) {
    loop {
        if worker.queue.is_empty().await {
            debug!(?interval, "no tasks to process, sleeping");
            tokio::time::sleep(interval).await;
            continue;
        }

        match worker.run_task().await {
            Ok(result) => {
                let queue_depth = worker.queue_depth().await;
                info!(?result, queue_depth, "task processed")
            }
            Err(error) => {
                let queue_depth = worker.queue_depth().await;
                error!(%error, queue_depth, "error running task")
            }
        }
    }
}

pub async fn collect_stats(worker: Arc<Worker>, interval: Duration) {
    loop {
        let stats = worker.collect_stats().await;
        debug!(
            task_count = stats.task_count,
            queue_depth = stats.queue_depth,
            cpu_usage = stats.cpu_usage,
            "collected stats"
        );
        tokio::time::sleep(interval).await;
    }
}
