use serde::{Deserialize, Serialize};

use crate::models::{Agent, JobRecord, ProgressEvent, Task, TaskResult};

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub command: String,
    pub repository_path: String,
    /// low, normal, high or critical. Defaults to normal.
    pub priority: Option<String>,
}

#[derive(Serialize)]
pub struct CreateTaskResponse {
    pub id: String,
    pub status: String,
    pub priority: String,
}

#[derive(Serialize)]
pub struct TaskDetail {
    #[serde(flatten)]
    pub task: Task,
    pub latest_result: Option<TaskResult>,
    pub jobs: Vec<JobRecord>,
}

#[derive(Deserialize)]
pub struct RegisterAgentRequest {
    pub id: String,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub agent_type: Option<String>,
    pub repository_path: String,
    pub session_id: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateAgentStatusRequest {
    pub status: String,
}

#[derive(Serialize)]
pub struct AgentView {
    #[serde(flatten)]
    pub agent: Agent,
}

#[derive(Serialize)]
pub struct ProgressResponse {
    pub job_id: String,
    pub latest: Option<ProgressEvent>,
    pub events: Vec<ProgressEvent>,
}
