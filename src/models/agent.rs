use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Busy,
    Error,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Error => "error",
            Self::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "idle" => Some(Self::Idle),
            "busy" => Some(Self::Busy),
            "error" => Some(Self::Error),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered coding-assistant agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    /// Kind of assistant, e.g. "claude-code".
    #[serde(rename = "type")]
    pub agent_type: String,
    pub status: AgentStatus,
    pub repository_path: String,
    pub current_task_id: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub session_id: Option<String>,
    pub status_changed_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(id: &str, name: &str, agent_type: &str, repository_path: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            name: name.to_string(),
            agent_type: agent_type.to_string(),
            status: AgentStatus::Idle,
            repository_path: repository_path.to_string(),
            current_task_id: None,
            last_heartbeat: now,
            session_id: None,
            status_changed_at: now,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Busy exactly when a task is held.
    pub fn is_consistent(&self) -> bool {
        (self.status == AgentStatus::Busy) == self.current_task_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_agent_is_idle() {
        let agent = Agent::new("a1", "Agent One", "claude-code", "/repo");
        assert_eq!(agent.status, AgentStatus::Idle);
        assert!(agent.current_task_id.is_none());
        assert!(agent.is_consistent());
    }

    #[test]
    fn test_busy_without_task_is_inconsistent() {
        let mut agent = Agent::new("a1", "Agent One", "claude-code", "/repo");
        agent.status = AgentStatus::Busy;
        assert!(!agent.is_consistent());
        agent.current_task_id = Some("t1".into());
        assert!(agent.is_consistent());
    }

    #[test]
    fn test_error_agent_holding_task_is_inconsistent() {
        let mut agent = Agent::new("a1", "Agent One", "claude-code", "/repo");
        agent.status = AgentStatus::Error;
        agent.current_task_id = Some("t1".into());
        assert!(!agent.is_consistent());
        agent.current_task_id = None;
        assert!(agent.is_consistent());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(AgentStatus::parse("Offline"), Some(AgentStatus::Offline));
        assert_eq!(AgentStatus::parse("sleeping"), None);
    }

    #[test]
    fn test_agent_type_serializes_as_type() {
        let agent = Agent::new("a1", "Agent One", "claude-code", "/repo");
        let json = serde_json::to_value(&agent).unwrap();
        assert_eq!(json["type"], "claude-code");
        assert_eq!(json["status"], "idle");
    }
}
