use axum::{extract::State, Json};

use crate::api::AppState;
use crate::pipeline::OrchestratorState;

pub async fn get_state(State(state): State<AppState>) -> Json<OrchestratorState> {
    Json(state.orchestrator.get_state())
}
