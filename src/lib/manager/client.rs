use std::time::Duration;

use async_trait::async_trait;
use reqwest::Response;

use super::types::{ManagerError, ManagerResult};
use crate::lib::{
    tasks::types::{Task, TaskEvent},
    worker::types::Stats,
};

/// The manager's side of a worker's ingress.
#[async_trait]
pub trait WorkerClient: Send + Sync {
    /// Hands `event` to `worker` and returns the task the worker accepted.
    async fn send_task(&self, worker: &str, event: &TaskEvent) -> ManagerResult<Task>;

    async fn get_tasks(&self, worker: &str) -> ManagerResult<Vec<Task>>;

    async fn get_stats(&self, worker: &str) -> ManagerResult<Stats>;
}

pub struct HttpWorkerClient {
    client: reqwest::Client,
}

impl HttpWorkerClient {
    pub fn new(timeout: Duration) -> ManagerResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { client })
    }
}

fn ensure_success(worker: &str, response: Response) -> ManagerResult<Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(ManagerError::WorkerCommunication {
            worker: worker.to_string(),
            message: format!("unexpected status {}", response.status()),
        })
    }
}

#[async_trait]
impl WorkerClient for HttpWorkerClient {
    #[tracing::instrument(name = "HttpWorkerClient::send_task", skip_all, fields(
        worker = %worker,
        task_id = %event.task.id
    ))]
    async fn send_task(&self, worker: &str, event: &TaskEvent) -> ManagerResult<Task> {
        let url = format!("http://{worker}/tasks");

        let response = self.client.post(&url).json(event).send().await?;
        let task = ensure_success(worker, response)?.json().await?;

        Ok(task)
    }

    #[tracing::instrument(name = "HttpWorkerClient::get_tasks", skip_all, fields(worker = %worker))]
    async fn get_tasks(&self, worker: &str) -> ManagerResult<Vec<Task>> {
        let url = format!("http://{worker}/tasks");

        let response = self.client.get(&url).send().await?;
        let tasks = ensure_success(worker, response)?.json().await?;

        Ok(tasks)
    }

    #[tracing::instrument(name = "HttpWorkerClient::get_stats", skip_all, fields(worker = %worker))]
    async fn get_stats(&self, worker: &str) -> ManagerResult<Stats> {
        let url = format!("http://{worker}/stats");

        let response = self.client.get(&url).send().await?;
        let stats = ensure_success(worker, response)?.json().await?;

        Ok(stats)
    }
}
