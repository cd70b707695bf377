use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use crate::api::models::{CreateTaskRequest, CreateTaskResponse, TaskDetail};
use crate::api::AppState;
use crate::errors::OrchestraError;
use crate::models::TaskPriority;

pub async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<CreateTaskResponse>), OrchestraError> {
    let priority = match req.priority.as_deref() {
        None => TaskPriority::default(),
        Some(raw) => TaskPriority::parse(raw)
            .ok_or_else(|| OrchestraError::Validation(format!("unknown priority '{}'", raw)))?,
    };

    let id = state.orchestrator.enqueue(&req.command, &req.repository_path, priority).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateTaskResponse {
            id,
            status: "pending".to_string(),
            priority: priority.to_string(),
        }),
    ))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskDetail>, OrchestraError> {
    let orchestrator = &state.orchestrator;
    let task = match orchestrator.get_task(&id) {
        Some(task) => task,
        None => orchestrator
            .store()
            .get_task(&id)
            .await?
            .ok_or_else(|| OrchestraError::NotFound(format!("task {}", id)))?,
    };
    let latest_result = orchestrator.store().latest_result(&id).await?;
    let jobs = orchestrator.scheduler().jobs_for_task(&id);

    Ok(Json(TaskDetail { task, latest_result, jobs }))
}

pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, OrchestraError> {
    let cancelled = state.orchestrator.cancel_task(&id).await?;
    Ok(Json(json!({"id": id, "cancelled": cancelled})))
}
