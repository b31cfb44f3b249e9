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

use super::types::{Manager, ManagerError};
use crate::lib::{
    api::{error_response, parse_task_event, parse_task_id, task_not_found},
    tasks::types::{Task, TaskEvent},
};

/// HTTP ingress of the manager. Same shape as the worker's.
pub struct ManagerServer {
    pub manager: Arc<Manager>,
    pub address: String,
    pub port: u16,
}

impl ManagerServer {
    pub fn new(manager: Arc<Manager>, address: &str, port: u16) -> Self {
        Self {
            manager,
            address: address.to_string(),
            port,
        }
    }

    async fn get_tasks(AxumState(manager): AxumState<Arc<Manager>>) -> Json<Vec<Task>> {
        Json(manager.get_tasks().await)
    }

    async fn start_task(
        AxumState(manager): AxumState<Arc<Manager>>,
        payload: Result<Json<TaskEvent>, JsonRejection>,
    ) -> Response {
        let task_event = match parse_task_event(payload) {
            Ok(task_event) => task_event,
            Err(response) => return response,
        };

        let task = task_event.desired_task();
        manager.add_task(task_event).await;

        (StatusCode::CREATED, Json(task)).into_response()
    }

    async fn stop_task(
        AxumState(manager): AxumState<Arc<Manager>>,
        Path(id): Path<String>,
    ) -> Response {
        let task_id = match parse_task_id(&id) {
            Ok(task_id) => task_id,
            Err(response) => return response,
        };

        match manager.request_stop(task_id).await {
            Ok(event) => {
                info!(%task_id, event_id = %event.id, "added task event to stop task");
                StatusCode::NO_CONTENT.into_response()
            }
            Err(ManagerError::TaskNotFound(task_id)) => task_not_found(task_id),
            Err(error @ ManagerError::InvalidStateTransition { .. }) => {
                error_response(StatusCode::CONFLICT, error.to_string())
            }
            Err(error) => (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response(),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/tasks", get(ManagerServer::get_tasks).post(ManagerServer::start_task))
            .route("/tasks/{id}", delete(ManagerServer::stop_task))
            .with_state(self.manager.clone())
    }

    pub async fn start_server(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let app = self.router();
        let listener = TcpListener::bind(format!("{}:{}", self.address, self.port)).await?;
        info!(address = %self.address, port = self.port, workers = ?self.manager.workers, "manager listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
