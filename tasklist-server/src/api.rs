use crate::errors::{ApiError, ApiResult};
use crate::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tasklist_core::models::{Task, TaskId};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub tasks: usize,
    pub connections: usize,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        tasks: state.store.len(),
        connections: state.connection_count(),
    })
}

pub async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<Vec<Task>> {
    Json(state.store.list())
}

pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TaskId>,
) -> ApiResult<Json<Task>> {
    state
        .store
        .get(id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Task {} not found", id)))
}
