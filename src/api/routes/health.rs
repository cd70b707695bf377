use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::api::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let stats = state.orchestrator.queue().stats();
    Json(json!({
        "status": "healthy",
        "service": "orchestra",
        "version": env!("CARGO_PKG_VERSION"),
        "agents": state.orchestrator.directory().len(),
        "pending_tasks": stats.pending,
    }))
}
