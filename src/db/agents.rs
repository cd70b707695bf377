use crate::errors::OrchestraError;
use crate::models::{Agent, AgentStatus};
use super::tasks::parse_time;
use super::Database;

impl Database {
    pub fn upsert_agent(&self, agent: &Agent) -> Result<(), OrchestraError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO agents (id, name, agent_type, status, repository_path, current_task_id, session_id, last_heartbeat, status_changed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET name = ?2, agent_type = ?3, status = ?4, repository_path = ?5,
                current_task_id = ?6, session_id = ?7, last_heartbeat = ?8, status_changed_at = ?9",
            rusqlite::params![
                agent.id,
                agent.name,
                agent.agent_type,
                agent.status.as_str(),
                agent.repository_path,
                agent.current_task_id,
                agent.session_id,
                agent.last_heartbeat.to_rfc3339(),
                agent.status_changed_at.to_rfc3339(),
            ],
        ).map_err(|e| OrchestraError::Database(format!("Failed to save agent: {}", e)))?;
        Ok(())
    }

    pub fn list_agents(&self) -> Result<Vec<Agent>, OrchestraError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, agent_type, status, repository_path, current_task_id, session_id, last_heartbeat, status_changed_at FROM agents ORDER BY id"
        ).map_err(|e| OrchestraError::Database(format!("Query failed: {}", e)))?;

        let rows = stmt.query_map([], |row: &rusqlite::Row| {
            let status: String = row.get(3)?;
            let heartbeat: String = row.get(7)?;
            let changed: String = row.get(8)?;
            Ok(Agent {
                id: row.get(0)?,
                name: row.get(1)?,
                agent_type: row.get(2)?,
                status: AgentStatus::parse(&status).unwrap_or(AgentStatus::Offline),
                repository_path: row.get(4)?,
                current_task_id: row.get(5)?,
                session_id: row.get(6)?,
                last_heartbeat: parse_time(&heartbeat),
                status_changed_at: parse_time(&changed),
            })
        }).map_err(|e| OrchestraError::Database(format!("Query failed: {}", e)))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| OrchestraError::Database(format!("Row decode failed: {}", e)))
    }
}
