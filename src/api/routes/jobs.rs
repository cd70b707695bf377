use axum::{
    extract::{Path, State},
    Json,
};

use crate::api::models::ProgressResponse;
use crate::api::AppState;
use crate::errors::OrchestraError;

pub async fn get_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProgressResponse>, OrchestraError> {
    let progress = state.orchestrator.progress();
    let events = progress.events(&id);
    if events.is_empty() && state.orchestrator.scheduler().get(&id).is_none() {
        return Err(OrchestraError::NotFound(format!("job {}", id)));
    }
    Ok(Json(ProgressResponse {
        job_id: id.clone(),
        latest: progress.latest(&id),
        events,
    }))
}
