use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use crate::api::models::{AgentView, RegisterAgentRequest, UpdateAgentStatusRequest};
use crate::api::AppState;
use crate::errors::OrchestraError;
use crate::models::{Agent, AgentStatus};

const DEFAULT_AGENT_TYPE: &str = "claude-code";

pub async fn register_agent(
    State(state): State<AppState>,
    Json(req): Json<RegisterAgentRequest>,
) -> Result<(StatusCode, Json<AgentView>), OrchestraError> {
    if req.id.trim().is_empty() {
        return Err(OrchestraError::Validation("agent id must not be empty".into()));
    }
    if req.repository_path.trim().is_empty() {
        return Err(OrchestraError::Validation("repository path must not be empty".into()));
    }

    let mut agent = Agent::new(
        &req.id,
        req.name.as_deref().unwrap_or(&req.id),
        req.agent_type.as_deref().unwrap_or(DEFAULT_AGENT_TYPE),
        &req.repository_path,
    );
    if let Some(session) = req.session_id {
        agent = agent.with_session(session);
    }
    state.orchestrator.register_agent(agent).await;

    let agent = state
        .orchestrator
        .directory()
        .get(&req.id)
        .ok_or_else(|| OrchestraError::Unexpected(format!("agent {} vanished after registration", req.id)))?;
    Ok((StatusCode::CREATED, Json(AgentView { agent })))
}

pub async fn list_agents(State(state): State<AppState>) -> Json<Value> {
    let agents = state.orchestrator.directory().list();
    Json(json!({ "agents": agents, "total": agents.len() }))
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateAgentStatusRequest>,
) -> Result<Json<AgentView>, OrchestraError> {
    let status = AgentStatus::parse(&req.status)
        .ok_or_else(|| OrchestraError::Validation(format!("unknown agent status '{}'", req.status)))?;
    if status == AgentStatus::Busy {
        return Err(OrchestraError::Validation("agents become busy only through task assignment".into()));
    }
    if state.orchestrator.directory().get(&id).is_none() {
        return Err(OrchestraError::NotFound(format!("agent {}", id)));
    }

    state.orchestrator.update_agent_status(&id, status).await;
    let agent = state
        .orchestrator
        .directory()
        .get(&id)
        .ok_or_else(|| OrchestraError::NotFound(format!("agent {}", id)))?;
    Ok(Json(AgentView { agent }))
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, OrchestraError> {
    if !state.orchestrator.heartbeat(&id) {
        return Err(OrchestraError::NotFound(format!("agent {}", id)));
    }
    Ok(Json(json!({"id": id, "ok": true})))
}
