use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestraError {
    #[error("Agent unavailable: {0}")]
    AgentUnavailable(String),

    #[error("Task timed out after {timeout:?}: {task_id}")]
    TaskTimeout { task_id: String, timeout: Duration },

    #[error("Command execution failed: {0}")]
    CommandExecution(String),

    #[error("Repository access error: {0}")]
    RepositoryAccess(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),

    #[error("Circuit breaker '{0}' is open")]
    CircuitBreakerOpen(String),

    #[error("Agent connection error: {0}")]
    AgentConnection(String),

    #[error("Task cancelled: {0}")]
    Cancelled(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl From<rusqlite::Error> for OrchestraError {
    fn from(e: rusqlite::Error) -> Self {
        OrchestraError::Database(e.to_string())
    }
}
