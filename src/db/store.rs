use async_trait::async_trait;

use crate::errors::OrchestraError;
use crate::models::{Agent, Task, TaskResult, TaskStatus};
use super::Database;

/// Persistence seam used by the orchestrator and the execution pipeline.
/// Failures surface as `OrchestraError::Database`.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn save_task(&self, task: &Task) -> Result<(), OrchestraError>;
    async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        agent_id: Option<&str>,
    ) -> Result<(), OrchestraError>;
    async fn get_task(&self, task_id: &str) -> Result<Option<Task>, OrchestraError>;
    async fn unfinished_tasks(&self) -> Result<Vec<Task>, OrchestraError>;
    async fn record_result(&self, result: &TaskResult) -> Result<(), OrchestraError>;
    async fn latest_result(&self, task_id: &str) -> Result<Option<TaskResult>, OrchestraError>;
    async fn save_agent(&self, agent: &Agent) -> Result<(), OrchestraError>;
    async fn load_agents(&self) -> Result<Vec<Agent>, OrchestraError>;
}

#[async_trait]
impl TaskStore for Database {
    async fn save_task(&self, task: &Task) -> Result<(), OrchestraError> {
        self.insert_task(task)
    }

    async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        agent_id: Option<&str>,
    ) -> Result<(), OrchestraError> {
        Database::update_task_status(self, task_id, status, agent_id)
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>, OrchestraError> {
        Database::get_task(self, task_id)
    }

    async fn unfinished_tasks(&self) -> Result<Vec<Task>, OrchestraError> {
        Database::unfinished_tasks(self)
    }

    async fn record_result(&self, result: &TaskResult) -> Result<(), OrchestraError> {
        self.insert_result(result)
    }

    async fn latest_result(&self, task_id: &str) -> Result<Option<TaskResult>, OrchestraError> {
        Ok(self.results_for_task(task_id)?.pop())
    }

    async fn save_agent(&self, agent: &Agent) -> Result<(), OrchestraError> {
        self.upsert_agent(agent)
    }

    async fn load_agents(&self) -> Result<Vec<Agent>, OrchestraError> {
        self.list_agents()
    }
}
