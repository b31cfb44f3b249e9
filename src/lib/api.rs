use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::lib::tasks::types::{TaskEvent, TaskId};

/// Body of every 4xx the ingress returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrResponse {
    pub message: String,
}

pub fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(ErrResponse { message })).into_response()
}

pub fn parse_task_event(
    payload: Result<Json<TaskEvent>, JsonRejection>,
) -> Result<TaskEvent, Response> {
    match payload {
        Ok(Json(task_event)) => Ok(task_event),
        Err(rejection) => {
            let message = format!("error unmarshalling body: {}", rejection.body_text());
            warn!(%message, "rejected task event");
            Err(error_response(StatusCode::BAD_REQUEST, message))
        }
    }
}

pub fn parse_task_id(raw: &str) -> Result<TaskId, Response> {
    raw.parse().map_err(|error| {
        warn!(%raw, ?error, "malformed task id");
        error_response(
            StatusCode::BAD_REQUEST,
            format!("malformed task id {raw}: {error}"),
        )
    })
}

pub fn task_not_found(task_id: TaskId) -> Response {
    warn!(%task_id, "no task with this id");
    error_response(
        StatusCode::NOT_FOUND,
        format!("task with id {task_id} not found"),
    )
}
