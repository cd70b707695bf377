use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Observability checkpoint from a running pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: String,
    pub task_id: String,
    pub percentage: u8,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Retrying,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// Scheduler bookkeeping for one enqueued pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub task_id: String,
    pub agent_id: String,
    pub state: JobState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(job_id: &str, task_id: &str, agent_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            task_id: task_id.to_string(),
            agent_id: agent_id.to_string(),
            state: JobState::Queued,
            attempts: 0,
            last_error: None,
            enqueued_at: Utc::now(),
            finished_at: None,
        }
    }
}
