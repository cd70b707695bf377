use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use tracing::debug;

use crate::errors::OrchestraError;
use crate::models::{Task, TaskPriority, TaskResult, TaskStatus};
use super::Database;

const TASK_COLUMNS: &str = "id, command, repository_path, priority, status, assigned_agent_id, sequence, created_at";

pub(crate) fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn task_from_row(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    let priority: String = row.get(3)?;
    let status: String = row.get(4)?;
    let created_at: String = row.get(7)?;
    Ok(Task {
        id: row.get(0)?,
        command: row.get(1)?,
        repository_path: row.get(2)?,
        priority: TaskPriority::parse(&priority).unwrap_or_default(),
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Pending),
        assigned_agent_id: row.get(5)?,
        sequence: row.get::<_, i64>(6)? as u64,
        created_at: parse_time(&created_at),
    })
}

impl Database {
    pub fn insert_task(&self, task: &Task) -> Result<(), OrchestraError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO tasks (id, command, repository_path, priority, status, assigned_agent_id, sequence, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                task.id,
                task.command,
                task.repository_path,
                task.priority.as_str(),
                task.status.as_str(),
                task.assigned_agent_id,
                task.sequence as i64,
                task.created_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ],
        ).map_err(|e| OrchestraError::Database(format!("Failed to insert task: {}", e)))?;
        Ok(())
    }

    pub fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        assigned_agent_id: Option<&str>,
    ) -> Result<(), OrchestraError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE tasks SET status = ?2, assigned_agent_id = ?3, updated_at = ?4
             WHERE id = ?1 AND status NOT IN ('completed', 'failed', 'cancelled')",
            rusqlite::params![id, status.as_str(), assigned_agent_id, Utc::now().to_rfc3339()],
        ).map_err(|e| OrchestraError::Database(format!("Update failed: {}", e)))?;
        if changed > 0 {
            return Ok(());
        }

        // Terminal rows are left as they are; only a missing row is an error.
        let current: Option<String> = conn
            .query_row("SELECT status FROM tasks WHERE id = ?1", rusqlite::params![id], |row| row.get(0))
            .optional()
            .map_err(|e| OrchestraError::Database(format!("Query failed: {}", e)))?;
        match current {
            Some(current) => {
                debug!(task_id = id, current = %current, requested = %status, "Terminal task status left unchanged");
                Ok(())
            }
            None => Err(OrchestraError::NotFound(format!("task {}", id))),
        }
    }

    pub fn get_task(&self, id: &str) -> Result<Option<Task>, OrchestraError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
            rusqlite::params![id],
            task_from_row,
        )
        .optional()
        .map_err(|e| OrchestraError::Database(format!("Query failed: {}", e)))
    }

    pub fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, OrchestraError> {
        let conn = self.lock()?;
        let (sql, filter) = match status {
            Some(s) => (
                format!("SELECT {} FROM tasks WHERE status = ?1 ORDER BY sequence", TASK_COLUMNS),
                Some(s.as_str()),
            ),
            None => (format!("SELECT {} FROM tasks ORDER BY sequence", TASK_COLUMNS), None),
        };
        let mut stmt = conn.prepare(&sql)
            .map_err(|e| OrchestraError::Database(format!("Query failed: {}", e)))?;
        let rows = match filter {
            Some(f) => stmt.query_map(rusqlite::params![f], task_from_row),
            None => stmt.query_map([], task_from_row),
        }
        .map_err(|e| OrchestraError::Database(format!("Query failed: {}", e)))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| OrchestraError::Database(format!("Row decode failed: {}", e)))
    }

    pub fn unfinished_tasks(&self) -> Result<Vec<Task>, OrchestraError> {
        Ok(self
            .list_tasks(None)?
            .into_iter()
            .filter(|t| !t.status.is_terminal())
            .collect())
    }

    pub fn insert_result(&self, result: &TaskResult) -> Result<(), OrchestraError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO task_results (task_id, agent_id, status, output, success, duration_ms, attempt, completed_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                result.task_id,
                result.agent_id,
                result.status.as_str(),
                result.output,
                result.success,
                result.duration_ms as i64,
                result.attempt,
                result.completed_at.to_rfc3339(),
            ],
        ).map_err(|e| OrchestraError::Database(format!("Failed to insert result: {}", e)))?;
        Ok(())
    }

    pub fn results_for_task(&self, task_id: &str) -> Result<Vec<TaskResult>, OrchestraError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT task_id, agent_id, status, output, success, duration_ms, attempt, completed_at FROM task_results WHERE task_id = ?1 ORDER BY id"
        ).map_err(|e| OrchestraError::Database(format!("Query failed: {}", e)))?;

        let rows = stmt.query_map(rusqlite::params![task_id], |row: &rusqlite::Row| {
            let status: String = row.get(2)?;
            let completed_at: String = row.get(7)?;
            Ok(TaskResult {
                task_id: row.get(0)?,
                agent_id: row.get(1)?,
                status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Failed),
                output: row.get(3)?,
                success: row.get(4)?,
                duration_ms: row.get::<_, i64>(5)? as u64,
                attempt: row.get(6)?,
                completed_at: parse_time(&completed_at),
            })
        }).map_err(|e| OrchestraError::Database(format!("Query failed: {}", e)))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| OrchestraError::Database(format!("Row decode failed: {}", e)))
    }
}
