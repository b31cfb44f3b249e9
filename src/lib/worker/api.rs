use std::{future::Future, sync::Arc};

use anyhow::Result;
use axum::{
    Json, Router,
    extract::{Path, State as AxumState, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
};
use tokio::net::TcpListener;
use tracing::info;

use super::types::{Stats, Worker, WorkerError};
use crate::lib::{
    api::{error_response, parse_task_event, parse_task_id, task_not_found},
    tasks::types::{Task, TaskEvent},
};

/// HTTP ingress of a worker.
pub struct TaskServer {
    pub worker: Arc<Worker>,
    pub address: String,
    pub port: u16,
}

impl TaskServer {
    pub fn new(worker: Arc<Worker>, address: &str, port: u16) -> Self {
        Self {
            worker,
            address: address.to_string(),
            port,
        }
    }

    async fn get_tasks(AxumState(worker): AxumState<Arc<Worker>>) -> Json<Vec<Task>> {
        Json(worker.get_tasks().await)
    }

    async fn start_task(
        AxumState(worker): AxumState<Arc<Worker>>,
        payload: Result<Json<TaskEvent>, JsonRejection>,
    ) -> Response {
        let task_event = match parse_task_event(payload) {
            Ok(task_event) => task_event,
            Err(response) => return response,
        };

        let task = task_event.desired_task();
        worker.add_task(task.clone()).await;
        info!(task_id = %task.id, event_id = %task_event.id, state = ?task.state, "added task");

        (StatusCode::CREATED, Json(task)).into_response()
    }

    async fn stop_task(
        AxumState(worker): AxumState<Arc<Worker>>,
        Path(id): Path<String>,
    ) -> Response {
        let task_id = match parse_task_id(&id) {
            Ok(task_id) => task_id,
            Err(response) => return response,
        };

        match worker.request_stop(task_id).await {
            Ok(_) => StatusCode::NO_CONTENT.into_response(),
            Err(WorkerError::TaskNotFound(task_id)) => task_not_found(task_id),
            Err(error @ WorkerError::InvalidStateTransition { .. }) => {
                error_response(StatusCode::CONFLICT, error.to_string())
            }
            Err(error) => (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response(),
        }
    }

    async fn get_stats(AxumState(worker): AxumState<Arc<Worker>>) -> Json<Stats> {
        Json(worker.stats().await)
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/tasks", get(TaskServer::get_tasks).post(TaskServer::start_task))
            .route("/tasks/{id}", delete(TaskServer::stop_task))
            .route("/stats", get(TaskServer::get_stats))
            .with_state(self.worker.clone())
    }

    pub async fn start_server(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let app = self.router();
        let listener = TcpListener::bind(format!("{}:{}", self.address, self.port)).await?;
        info!(address = %self.address, port = self.port, worker = %self.worker.name, "worker listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
