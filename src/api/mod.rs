pub mod errors;
pub mod models;
pub mod routes;

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::pipeline::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(routes::health::health_check))
        .route("/api/state", get(routes::state::get_state))
        .route("/api/tasks", post(routes::tasks::create_task))
        .route("/api/tasks/:id", get(routes::tasks::get_task))
        .route("/api/tasks/:id/cancel", post(routes::tasks::cancel_task))
        .route("/api/agents", post(routes::agents::register_agent).get(routes::agents::list_agents))
        .route("/api/agents/:id/status", put(routes::agents::update_status))
        .route("/api/agents/:id/heartbeat", post(routes::agents::heartbeat))
        .route("/api/jobs/:id/progress", get(routes::jobs::get_progress))
        .route("/api/processes", get(routes::processes::list_processes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
