use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::errors::OrchestraError;
use crate::models::{Agent, AgentStatus};

/// In-memory registry of agents and the only place their scheduling state
/// changes. Every transition happens under the map's per-entry lock, so two
/// pipelines can never both believe they hold the same agent.
#[derive(Debug, Default)]
pub struct AgentDirectory {
    agents: DashMap<String, Agent>,
}

impl AgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an agent record. Replacing a busy agent keeps its
    /// current lock.
    pub fn register(&self, agent: Agent) {
        info!(agent_id = %agent.id, name = %agent.name, repo = %agent.repository_path, "Agent registered");
        self.agents
            .entry(agent.id.clone())
            .and_modify(|existing| {
                existing.name = agent.name.clone();
                existing.agent_type = agent.agent_type.clone();
                existing.repository_path = agent.repository_path.clone();
                existing.session_id = agent.session_id.clone().or(existing.session_id.take());
                existing.last_heartbeat = agent.last_heartbeat;
            })
            .or_insert(agent);
    }

    pub fn get(&self, agent_id: &str) -> Option<Agent> {
        self.agents.get(agent_id).map(|a| a.clone())
    }

    pub fn find_by_session(&self, session_id: &str) -> Option<Agent> {
        self.agents
            .iter()
            .find(|a| a.session_id.as_deref() == Some(session_id))
            .map(|a| a.clone())
    }

    /// Snapshot sorted by id.
    pub fn list(&self) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self.agents.iter().map(|a| a.clone()).collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    pub fn idle_agents(&self) -> Vec<Agent> {
        self.list()
            .into_iter()
            .filter(|a| a.status == AgentStatus::Idle)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Idle -> Busy for `task_id`. Fails with `AgentUnavailable` when the
    /// agent is unknown or not idle. Re-locking for the task it already
    /// holds succeeds, which keeps redelivered jobs idempotent.
    pub fn try_lock(&self, agent_id: &str, task_id: &str) -> Result<Agent, OrchestraError> {
        let mut entry = self.agents.get_mut(agent_id).ok_or_else(|| {
            OrchestraError::AgentUnavailable(format!("agent {} is not registered", agent_id))
        })?;

        if entry.status == AgentStatus::Busy && entry.current_task_id.as_deref() == Some(task_id) {
            return Ok(entry.clone());
        }
        if entry.status != AgentStatus::Idle {
            return Err(OrchestraError::AgentUnavailable(format!(
                "agent {} is {} (task {})",
                agent_id,
                entry.status,
                entry.current_task_id.as_deref().unwrap_or("-")
            )));
        }

        let now = Utc::now();
        entry.status = AgentStatus::Busy;
        entry.current_task_id = Some(task_id.to_string());
        entry.last_heartbeat = now;
        entry.status_changed_at = now;
        debug!(agent_id, task_id, "Agent locked");
        Ok(entry.clone())
    }

    /// Busy -> Idle, but only if the agent still holds `task_id`. Returns
    /// whether a lock was released.
    pub fn release(&self, agent_id: &str, task_id: &str) -> bool {
        let Some(mut entry) = self.agents.get_mut(agent_id) else {
            warn!(agent_id, task_id, "Release for unknown agent ignored");
            return false;
        };
        if entry.current_task_id.as_deref() != Some(task_id) {
            debug!(agent_id, task_id, holder = ?entry.current_task_id, "Agent no longer holds task, nothing to release");
            return false;
        }

        let now = Utc::now();
        entry.current_task_id = None;
        entry.last_heartbeat = now;
        if entry.status == AgentStatus::Busy {
            entry.status = AgentStatus::Idle;
            entry.status_changed_at = now;
        }
        debug!(agent_id, task_id, status = %entry.status, "Agent released");
        true
    }

    /// Operator or monitor driven status change. Leaving Busy drops any
    /// held task; moving to Busy is only possible through
    /// `try_lock`. Unknown ids are a logged no-op.
    pub fn set_status(&self, agent_id: &str, status: AgentStatus) -> bool {
        let Some(mut entry) = self.agents.get_mut(agent_id) else {
            warn!(agent_id, status = %status, "Status update for unknown agent ignored");
            return false;
        };
        if status == AgentStatus::Busy && entry.current_task_id.is_none() {
            warn!(agent_id, "Refusing to mark agent busy without a task");
            return false;
        }
        if entry.status == status {
            return true;
        }
        if status != AgentStatus::Busy {
            if let Some(stale) = entry.current_task_id.take() {
                warn!(agent_id, stale_task = %stale, to = %status, "Dropping task held by agent");
            }
        }
        info!(agent_id, from = %entry.status, to = %status, "Agent status changed");
        entry.status = status;
        entry.status_changed_at = Utc::now();
        true
    }

    pub fn heartbeat(&self, agent_id: &str) -> bool {
        self.heartbeat_at(agent_id, Utc::now())
    }

    pub fn heartbeat_at(&self, agent_id: &str, at: DateTime<Utc>) -> bool {
        match self.agents.get_mut(agent_id) {
            Some(mut entry) => {
                entry.last_heartbeat = at;
                true
            }
            None => {
                warn!(agent_id, "Heartbeat for unknown agent ignored");
                false
            }
        }
    }

    /// Compare-and-swap used by the health monitor: apply `status` only if
    /// the agent is still in `expected` and `still_applies` holds for the
    /// current record. Any non-Busy target drops the held task.
    pub fn transition_if<F>(&self, agent_id: &str, expected: &[AgentStatus], status: AgentStatus, still_applies: F) -> bool
    where
        F: FnOnce(&Agent) -> bool,
    {
        let Some(mut entry) = self.agents.get_mut(agent_id) else {
            return false;
        };
        if !expected.contains(&entry.status) || !still_applies(&entry) {
            return false;
        }
        if status != AgentStatus::Busy {
            if let Some(stale) = entry.current_task_id.take() {
                warn!(agent_id, stale_task = %stale, from = %entry.status, to = %status, "Dropping task held by agent");
            }
        }
        entry.status = status;
        entry.status_changed_at = Utc::now();
        true
    }

    pub fn remove(&self, agent_id: &str) -> Option<Agent> {
        self.agents.remove(agent_id).map(|(_, a)| a)
    }
}
