use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::api::AppState;

pub async fn list_processes(State(state): State<AppState>) -> Json<Value> {
    let Some(discovery) = state.orchestrator.discovery() else {
        return Json(json!({ "processes": [], "total": 0, "enabled": false }));
    };
    let timeout = discovery.settings().connection_timeout_secs;
    let processes: Vec<Value> = discovery
        .discover_agent_processes()
        .await
        .into_iter()
        .map(|p| {
            let connection = p.connection(timeout);
            json!({ "process": p, "connection": connection })
        })
        .collect();
    Json(json!({ "total": processes.len(), "processes": processes, "enabled": true }))
}
