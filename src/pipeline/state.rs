use serde::{Deserialize, Serialize};

use crate::models::{Agent, JobRecord, Task};
use crate::queue::QueueStats;
use crate::resilience::BreakerSnapshot;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionStage {
    Validate,
    AcquireLock,
    InitTracking,
    PrepareEnvironment,
    Execute,
    ProcessResult,
    UpdateStatus,
    Cleanup,
}

impl std::fmt::Display for ExecutionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validate => write!(f, "validate"),
            Self::AcquireLock => write!(f, "acquire-lock"),
            Self::InitTracking => write!(f, "init-tracking"),
            Self::PrepareEnvironment => write!(f, "prepare-environment"),
            Self::Execute => write!(f, "execute"),
            Self::ProcessResult => write!(f, "process-result"),
            Self::UpdateStatus => write!(f, "update-status"),
            Self::Cleanup => write!(f, "cleanup"),
        }
    }
}

/// Payload the scheduler hands to the pipeline for one attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_id: String,
    pub task_id: String,
    pub agent_id: String,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// Point-in-time view for dashboards and the HTTP surface.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorState {
    pub agents: Vec<Agent>,
    pub queue: Vec<Task>,
    pub stats: QueueStats,
    pub active_jobs: Vec<JobRecord>,
    pub agent_circuit: BreakerSnapshot,
}
