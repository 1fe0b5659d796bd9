//! HTTP ingress for the local engine.
//!
//! - `GET  /health`
//! - `GET  /queues/{queue}/handlers`
//! - `POST /queues/{queue}/tasks` with `{"handler": "...", "input": ...}`

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::trace::TraceLayer;

use crate::{EngineError, HandlerInfo, WorkerHandle};

/// Task queues served by this process.
pub type QueueTable = Arc<RwLock<HashMap<String, WorkerHandle>>>;

#[derive(Clone)]
pub struct IngressState {
    pub queues: QueueTable,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub queues: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskRequest {
    pub handler: String,
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskResponse {
    pub output: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

/// Ingress error with its HTTP mapping.
pub struct IngressError(EngineError);

impl From<EngineError> for IngressError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            EngineError::UnknownHandler { .. } | EngineError::UnknownQueue(_) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            EngineError::Handler { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "handler_failed"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        let message = self.0.to_string();
        if status.is_server_error() {
            tracing::error!(status = %status, code, error = %message, "Task dispatch error");
        } else {
            tracing::warn!(status = %status, code, error = %message, "Task rejected");
        }
        let body = ErrorResponse {
            code: code.to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: IngressState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/queues/{queue}/handlers", get(list_handlers))
        .route("/queues/{queue}/tasks", post(submit_task))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<IngressState>) -> Json<HealthResponse> {
    let mut queues: Vec<String> = state.queues.read().keys().cloned().collect();
    queues.sort();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        queues,
    })
}

fn worker_for(state: &IngressState, queue: &str) -> Result<WorkerHandle, IngressError> {
    state
        .queues
        .read()
        .get(queue)
        .cloned()
        .ok_or_else(|| EngineError::UnknownQueue(queue.to_string()).into())
}

async fn list_handlers(
    State(state): State<IngressState>,
    Path(queue): Path<String>,
) -> Result<Json<Vec<HandlerInfo>>, IngressError> {
    let worker = worker_for(&state, &queue)?;
    Ok(Json(worker.handlers()))
}

async fn submit_task(
    State(state): State<IngressState>,
    Path(queue): Path<String>,
    Json(request): Json<TaskRequest>,
) -> Result<Json<TaskResponse>, IngressError> {
    let worker = worker_for(&state, &queue)?;
    tracing::debug!(task_queue = %queue, handler = %request.handler, "Dispatching task");
    let output = worker.dispatch(&request.handler, request.input).await?;
    Ok(Json(TaskResponse { output }))
}
