//! In-memory stand-ins for the container runtime and the worker ingress.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;

use crate::lib::{
    manager::{
        client::WorkerClient,
        types::{ManagerError, ManagerResult},
    },
    node::{Node, Role},
    tasks::{
        runtime::{Runtime, RuntimeError},
        types::{ContainerConfig, State, Task, TaskEvent},
    },
    worker::types::{Stats, Worker},
};

#[derive(Default)]
pub struct FakeRuntime {
    pub fail_run: AtomicBool,
    pub fail_stop: AtomicBool,
    next_container: AtomicUsize,
    pub started: Mutex<Vec<String>>,
    pub stopped: Mutex<Vec<String>>,
}

impl FakeRuntime {
    pub fn failing() -> Self {
        let runtime = Self::default();
        runtime.fail_run.store(true, Ordering::SeqCst);
        runtime
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }
}

#[async_trait]
impl Runtime for FakeRuntime {
    async fn run(&self, config: &ContainerConfig) -> Result<String, RuntimeError> {
        if self.fail_run.load(Ordering::SeqCst) {
            return Err(RuntimeError::Other(format!("unable to pull {}", config.image)));
        }

        let n = self.next_container.fetch_add(1, Ordering::SeqCst);
        self.started.lock().unwrap().push(config.name.clone());
        Ok(format!("container-{n}"))
    }

    async fn stop(&self, container_id: &str) -> Result<String, RuntimeError> {
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(RuntimeError::Other(format!("no such container: {container_id}")));
        }

        self.stopped.lock().unwrap().push(container_id.to_string());
        Ok(container_id.to_string())
    }
}

/// Routes manager calls straight to in-process workers.
#[derive(Default)]
pub struct LocalWorkerClient {
    pub workers: HashMap<String, Arc<Worker>>,
    pub unreachable: Mutex<HashSet<String>>,
    pub stats: Mutex<HashMap<String, Stats>>,
}

impl LocalWorkerClient {
    pub fn with_worker(mut self, address: &str, worker: Arc<Worker>) -> Self {
        self.workers.insert(address.to_string(), worker);
        self
    }

    pub fn set_unreachable(&self, address: &str, unreachable: bool) {
        let mut set = self.unreachable.lock().unwrap();
        if unreachable {
            set.insert(address.to_string());
        } else {
            set.remove(address);
        }
    }

    /// Overrides what `address` reports from its stats endpoint.
    pub fn set_stats(&self, address: &str, stats: Stats) {
        self.stats.lock().unwrap().insert(address.to_string(), stats);
    }

    fn worker(&self, address: &str) -> ManagerResult<Arc<Worker>> {
        if self.unreachable.lock().unwrap().contains(address) {
            return Err(ManagerError::WorkerCommunication {
                worker: address.to_string(),
                message: "connection refused".to_string(),
            });
        }

        self.workers
            .get(address)
            .cloned()
            .ok_or_else(|| ManagerError::WorkerCommunication {
                worker: address.to_string(),
                message: "unknown worker".to_string(),
            })
    }
}

#[async_trait]
impl WorkerClient for LocalWorkerClient {
    async fn send_task(&self, worker: &str, event: &TaskEvent) -> ManagerResult<Task> {
        let task = event.desired_task();
        self.worker(worker)?.add_task(task.clone()).await;
        Ok(task)
    }

    async fn get_tasks(&self, worker: &str) -> ManagerResult<Vec<Task>> {
        Ok(self.worker(worker)?.get_tasks().await)
    }

    async fn get_stats(&self, worker: &str) -> ManagerResult<Stats> {
        let handle = self.worker(worker)?;
        let reported = self.stats.lock().unwrap().get(worker).cloned();
        match reported {
            Some(stats) => Ok(stats),
            None => Ok(handle.collect_stats().await),
        }
    }
}

pub fn task(name: &str, state: State) -> Task {
    let mut task = Task::new(name, "postgres:13");
    task.state = state;
    task
}

pub fn node(address: &str, cores: f64, memory: u64, disk: u64) -> Node {
    Node {
        name: address.to_string(),
        address: address.to_string(),
        cores,
        cores_allocated: 0.0,
        memory,
        memory_allocated: 0,
        disk,
        disk_allocated: 0,
        role: Role::Worker,
        task_count: 0,
    }
}

pub fn stats(memory: u64, memory_allocated: u64, task_count: u64) -> Stats {
    Stats {
        hostname: "test-host".to_string(),
        total_cpus: 4,
        total_memory: memory,
        memory_allocated,
        total_disk: 1 << 40,
        task_count,
        ..Default::default()
    }
}
