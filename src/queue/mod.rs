//! Pending-work queue. One mutex guards all queue state; every transition,
//! assignment included, is a compare-and-swap on the task's status under it.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, warn};

use crate::models::{Agent, Task, TaskPriority, TaskStatus};

/// Outcome of a status write.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Applied(Task),
    /// Already in the requested status.
    Unchanged,
    /// The task is terminal and stays that way.
    Refused,
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub assigned: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: Mutex<HashMap<String, Task>>,
    sequence: AtomicU64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Task>> {
        self.tasks.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Build a new Pending task with the next submission sequence number.
    /// It is not visible to assignment until [`insert`](Self::insert).
    pub fn create(&self, command: &str, repository_path: &str, priority: TaskPriority) -> Task {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        Task::new(command, repository_path, priority, seq)
    }

    pub fn insert(&self, task: Task) {
        self.sequence.fetch_max(task.sequence, Ordering::SeqCst);
        self.lock().insert(task.id.clone(), task);
    }

    /// Reload tasks that were in flight when the process stopped. Anything
    /// Assigned or InProgress goes back to Pending.
    pub fn restore(&self, tasks: Vec<Task>) -> usize {
        let mut restored = 0;
        let mut guard = self.lock();
        for mut task in tasks {
            if task.status.is_terminal() {
                continue;
            }
            if task.status != TaskStatus::Pending {
                task.status = TaskStatus::Pending;
                task.assigned_agent_id = None;
            }
            self.sequence.fetch_max(task.sequence, Ordering::SeqCst);
            guard.insert(task.id.clone(), task);
            restored += 1;
        }
        restored
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.lock().get(task_id).cloned()
    }

    /// Pick and claim the best Pending task for `agent`: highest priority
    /// first, then tasks for the agent's repository, then submission order.
    pub fn assign_next(&self, agent: &Agent) -> Option<Task> {
        let mut guard = self.lock();
        let chosen = guard
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .min_by_key(|t| {
                (
                    Reverse(t.priority),
                    t.repository_path != agent.repository_path,
                    t.sequence,
                )
            })
            .map(|t| t.id.clone())?;

        let task = guard.get_mut(&chosen)?;
        if task.status != TaskStatus::Pending {
            return None;
        }
        task.status = TaskStatus::Assigned;
        task.assigned_agent_id = Some(agent.id.clone());
        debug!(
            task_id = %task.id,
            agent_id = %agent.id,
            priority = %task.priority,
            affinity = task.repository_path == agent.repository_path,
            "Task assigned"
        );
        Some(task.clone())
    }

    /// Terminal states are final; Pending clears the assignment.
    pub fn transition(&self, task_id: &str, status: TaskStatus) -> Transition {
        let mut guard = self.lock();
        let Some(task) = guard.get_mut(task_id) else {
            warn!(task_id, status = %status, "Status update for unknown task ignored");
            return Transition::Unknown;
        };
        if task.status == status {
            return Transition::Unchanged;
        }
        if task.status.is_terminal() {
            warn!(task_id, from = %task.status, to = %status, "Refusing to leave terminal state");
            return Transition::Refused;
        }
        if status == TaskStatus::Pending {
            task.assigned_agent_id = None;
        }
        task.status = status;
        Transition::Applied(task.clone())
    }

    /// Every task in submission order.
    pub fn snapshot(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.lock().values().cloned().collect();
        tasks.sort_by_key(|t| t.sequence);
        tasks
    }

    pub fn pending(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .lock()
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (Reverse(t.priority), t.sequence));
        tasks
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats::default();
        for task in self.lock().values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Assigned => stats.assigned += 1,
                TaskStatus::InProgress => stats.in_progress += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn queue_with(entries: &[(&str, &str, TaskPriority)]) -> (TaskQueue, Vec<String>) {
        let queue = TaskQueue::new();
        let ids = entries
            .iter()
            .map(|(cmd, repo, prio)| {
                let task = queue.create(cmd, repo, *prio);
                let id = task.id.clone();
                queue.insert(task);
                id
            })
            .collect();
        (queue, ids)
    }

    #[test]
    fn test_priority_then_fifo() {
        let (queue, _) = queue_with(&[
            ("normal", "/r", TaskPriority::Normal),
            ("high-1", "/r", TaskPriority::High),
            ("critical", "/r", TaskPriority::Critical),
            ("high-2", "/r", TaskPriority::High),
        ]);
        let agent = Agent::new("a1", "a1", "claude-code", "/r");
        let order: Vec<String> = std::iter::from_fn(|| queue.assign_next(&agent))
            .map(|t| t.command)
            .collect();
        assert_eq!(order, vec!["critical", "high-1", "high-2", "normal"]);
    }

    #[test]
    fn test_repository_affinity_with_fallback() {
        let (queue, _) = queue_with(&[
            ("other", "/other", TaskPriority::Normal),
            ("mine", "/mine", TaskPriority::Normal),
        ]);
        let agent = Agent::new("a1", "a1", "claude-code", "/mine");
        assert_eq!(queue.assign_next(&agent).unwrap().command, "mine");
        assert_eq!(queue.assign_next(&agent).unwrap().command, "other");
        assert!(queue.assign_next(&agent).is_none());
    }

    #[test]
    fn test_priority_beats_affinity() {
        let (queue, _) = queue_with(&[
            ("mine", "/mine", TaskPriority::Low),
            ("urgent", "/other", TaskPriority::Critical),
        ]);
        let agent = Agent::new("a1", "a1", "claude-code", "/mine");
        assert_eq!(queue.assign_next(&agent).unwrap().command, "urgent");
    }

    #[test]
    fn test_assignment_records_agent() {
        let (queue, ids) = queue_with(&[("cmd", "/r", TaskPriority::Normal)]);
        let agent = Agent::new("a1", "a1", "claude-code", "/r");
        queue.assign_next(&agent).unwrap();
        let task = queue.get(&ids[0]).unwrap();
        assert_eq!(task.status, TaskStatus::Assigned);
        assert_eq!(task.assigned_agent_id.as_deref(), Some("a1"));
    }

    #[test]
    fn test_concurrent_assignment_never_doubles() {
        let queue = Arc::new(TaskQueue::new());
        for i in 0..20 {
            queue.insert(queue.create(&format!("cmd-{}", i), "/r", TaskPriority::Normal));
        }
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    let agent = Agent::new(&format!("a{}", n), "a", "claude-code", "/r");
                    std::iter::from_fn(|| queue.assign_next(&agent)).map(|t| t.id).collect::<Vec<_>>()
                })
            })
            .collect();
        let mut claimed: Vec<String> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        let total = claimed.len();
        claimed.sort();
        claimed.dedup();
        assert_eq!(total, 20);
        assert_eq!(claimed.len(), 20);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let (queue, ids) = queue_with(&[("cmd", "/r", TaskPriority::Normal)]);
        assert!(matches!(queue.transition(&ids[0], TaskStatus::Completed), Transition::Applied(_)));
        assert_eq!(queue.transition(&ids[0], TaskStatus::Pending), Transition::Refused);
        assert_eq!(queue.transition(&ids[0], TaskStatus::Completed), Transition::Unchanged);
        assert_eq!(queue.transition("missing", TaskStatus::Failed), Transition::Unknown);
    }

    #[test]
    fn test_back_to_pending_clears_assignment() {
        let (queue, ids) = queue_with(&[("cmd", "/r", TaskPriority::Normal)]);
        queue.assign_next(&Agent::new("a1", "a1", "claude-code", "/r")).unwrap();
        queue.transition(&ids[0], TaskStatus::Pending);
        assert!(queue.get(&ids[0]).unwrap().assigned_agent_id.is_none());
        assert_eq!(queue.stats().pending, 1);
    }

    #[test]
    fn test_restore_requeues_in_flight_tasks() {
        let queue = TaskQueue::new();
        let mut running = Task::new("running", "/r", TaskPriority::Normal, 7);
        running.status = TaskStatus::InProgress;
        running.assigned_agent_id = Some("a1".into());
        let mut done = Task::new("done", "/r", TaskPriority::Normal, 8);
        done.status = TaskStatus::Completed;

        assert_eq!(queue.restore(vec![running.clone(), done]), 1);
        let restored = queue.get(&running.id).unwrap();
        assert_eq!(restored.status, TaskStatus::Pending);
        assert!(restored.assigned_agent_id.is_none());
        assert_eq!(queue.create("next", "/r", TaskPriority::Normal).sequence, 9);
    }
}
