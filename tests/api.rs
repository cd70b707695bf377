use axum::body::Body;
use axum::http::StatusCode;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use async_trait::async_trait;
use orchestra::agents::{AgentConnector, AgentResponse};
use orchestra::api::{build_router, AppState};
use orchestra::config::Settings;
use orchestra::db::Database;
use orchestra::errors::OrchestraError;
use orchestra::notifications::{LogNotifier, ProgressTracker};
use orchestra::pipeline::{Collaborators, Orchestrator};
use orchestra::resilience::LogChannel;

struct EchoConnector;

#[async_trait]
impl AgentConnector for EchoConnector {
    async fn execute_command(
        &self,
        command: &str,
        _working_dir: &Path,
        _cancel: CancellationToken,
    ) -> Result<AgentResponse, OrchestraError> {
        Ok(AgentResponse { success: true, output: command.to_string(), duration: Duration::ZERO })
    }
}

fn create_test_state() -> AppState {
    let orchestrator = Orchestrator::new(
        &Settings::default(),
        Collaborators {
            store: Arc::new(Database::in_memory().unwrap()),
            connector: Arc::new(EchoConnector),
            notifier: Arc::new(LogNotifier),
            escalation: Arc::new(LogChannel),
            progress: Arc::new(ProgressTracker::new()),
            discovery: None,
        },
    );
    AppState::new(Arc::new(orchestrator))
}

fn app(state: &AppState) -> axum::Router {
    build_router(state.clone())
}

fn make_request(method: &str, uri: &str, body: Option<Value>) -> axum::http::Request<Body> {
    let builder = axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");

    match body {
        Some(b) => builder.body(Body::from(serde_json::to_string(&b).unwrap())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn response_json(response: axum::http::Response<Body>) -> Value {
    let (parts, body) = response.into_parts();
    let bytes = body.collect().await.unwrap().to_bytes();
    if bytes.is_empty() {
        panic!("Empty response body. Status: {}, Headers: {:?}", parts.status, parts.headers);
    }
    serde_json::from_slice(&bytes)
        .unwrap_or_else(|e| panic!("JSON parse error: {}. Body: {:?}", e, String::from_utf8_lossy(&bytes)))
}

async fn create_task(state: &AppState, command: &str, priority: Option<&str>) -> String {
    let mut body = json!({"command": command, "repository_path": "/tmp"});
    if let Some(p) = priority {
        body["priority"] = json!(p);
    }
    let response = app(state).oneshot(make_request("POST", "/api/tasks", Some(body))).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    response_json(response).await["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_endpoint() {
    let state = create_test_state();
    let response = app(&state).oneshot(make_request("GET", "/api/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "orchestra");
    assert_eq!(body["agents"], 0);
}

#[tokio::test]
async fn test_create_and_get_task() {
    let state = create_test_state();
    let id = create_task(&state, "add logging to the parser", Some("high")).await;

    let response = app(&state)
        .oneshot(make_request("GET", &format!("/api/tasks/{}", id), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["id"], id);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["priority"], "high");
    assert_eq!(body["command"], "add logging to the parser");
    assert!(body["latest_result"].is_null());
    assert_eq!(body["jobs"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_create_task_validation() {
    let state = create_test_state();

    let blank = make_request("POST", "/api/tasks", Some(json!({"command": "  ", "repository_path": "/tmp"})));
    let response = app(&state).oneshot(blank).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["error_type"], "ValidationError");

    let long = "x".repeat(2001);
    let too_long = make_request("POST", "/api/tasks", Some(json!({"command": long, "repository_path": "/tmp"})));
    let response = app(&state).oneshot(too_long).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let bad_priority = make_request(
        "POST",
        "/api/tasks",
        Some(json!({"command": "ok", "repository_path": "/tmp", "priority": "urgent"})),
    );
    let response = app(&state).oneshot(bad_priority).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_task_not_found() {
    let state = create_test_state();
    let response = app(&state)
        .oneshot(make_request("GET", "/api/tasks/nonexistent", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = response_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("nonexistent"));
}

#[tokio::test]
async fn test_cancel_task() {
    let state = create_test_state();
    let id = create_task(&state, "rename module", None).await;

    let uri = format!("/api/tasks/{}/cancel", id);
    let response = app(&state).oneshot(make_request("POST", &uri, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["cancelled"], true);

    let response = app(&state).oneshot(make_request("POST", &uri, None)).await.unwrap();
    assert_eq!(response_json(response).await["cancelled"], false);

    let response = app(&state)
        .oneshot(make_request("POST", "/api/tasks/missing/cancel", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_register_agent_and_update_status() {
    let state = create_test_state();

    let req = make_request(
        "POST",
        "/api/agents",
        Some(json!({"id": "agent-1", "name": "Backend agent", "repository_path": "/srv/backend"})),
    );
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    assert_eq!(body["id"], "agent-1");
    assert_eq!(body["status"], "idle");
    assert_eq!(body["type"], "claude-code");

    let req = make_request("PUT", "/api/agents/agent-1/status", Some(json!({"status": "offline"})));
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["status"], "offline");

    let req = make_request("PUT", "/api/agents/agent-1/status", Some(json!({"status": "busy"})));
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let req = make_request("PUT", "/api/agents/ghost/status", Some(json!({"status": "idle"})));
    let response = app(&state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app(&state).oneshot(make_request("GET", "/api/agents", None)).await.unwrap();
    assert_eq!(response_json(response).await["total"], 1);
}

#[tokio::test]
async fn test_heartbeat_unknown_agent() {
    let state = create_test_state();
    let response = app(&state)
        .oneshot(make_request("POST", "/api/agents/ghost/heartbeat", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_state_snapshot() {
    let state = create_test_state();
    create_task(&state, "first", Some("low")).await;
    create_task(&state, "second", Some("critical")).await;

    let response = app(&state).oneshot(make_request("GET", "/api/state", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["stats"]["pending"], 2);
    assert_eq!(body["queue"].as_array().unwrap().len(), 2);
    assert_eq!(body["agents"].as_array().unwrap().len(), 0);
    assert_eq!(body["agent_circuit"]["state"], "closed");
}

#[tokio::test]
async fn test_job_progress_not_found() {
    let state = create_test_state();
    let response = app(&state)
        .oneshot(make_request("GET", "/api/jobs/unknown/progress", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_job_progress_after_run() {
    let state = create_test_state();
    let repo = tempfile::tempdir().unwrap();
    let repo_path = repo.path().to_string_lossy().to_string();
    let orchestrator = &state.orchestrator;

    orchestrator
        .register_agent(orchestra::models::Agent::new("a1", "a1", "claude-code", &repo_path))
        .await;
    orchestrator
        .enqueue("summarize", &repo_path, orchestra::models::TaskPriority::Normal)
        .await
        .unwrap();
    let task = orchestrator.assign_next("a1").await.unwrap();
    let record = orchestrator.scheduler().run_inline(&task.id, "a1").await.unwrap();

    let uri = format!("/api/jobs/{}/progress", record.job_id);
    let response = app(&state).oneshot(make_request("GET", &uri, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["latest"]["percentage"], 100);
    assert_eq!(body["events"].as_array().unwrap().len(), 8);

    let response = app(&state)
        .oneshot(make_request("GET", &format!("/api/tasks/{}", task.id), None))
        .await
        .unwrap();
    let body = response_json(response).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["latest_result"]["output"], "summarize");
}

#[tokio::test]
async fn test_processes_without_discovery() {
    let state = create_test_state();
    let response = app(&state).oneshot(make_request("GET", "/api/processes", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["enabled"], false);
    assert_eq!(body["total"], 0);
}
