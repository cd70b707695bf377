//! Periodic liveness sweep over the agent directory.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agents::AgentDirectory;
use crate::db::TaskStore;
use crate::models::AgentStatus;

pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_RECOVERY_WINDOW_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct HealthSettings {
    pub check_interval: Duration,
    /// Heartbeat silence after which a Busy/Idle agent is marked Error.
    pub agent_timeout: Duration,
    /// Time in Error before an optimistic return to Idle.
    pub recovery_window: Duration,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS),
            agent_timeout: Duration::from_secs(DEFAULT_AGENT_TIMEOUT_SECS),
            recovery_window: Duration::from_secs(DEFAULT_RECOVERY_WINDOW_SECS),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthReport {
    pub marked_error: Vec<String>,
    pub recovered: Vec<String>,
}

impl HealthReport {
    pub fn is_empty(&self) -> bool {
        self.marked_error.is_empty() && self.recovered.is_empty()
    }
}

pub struct AgentHealthMonitor {
    directory: Arc<AgentDirectory>,
    settings: HealthSettings,
    store: Option<Arc<dyn TaskStore>>,
}

fn elapsed_since(now: DateTime<Utc>, then: DateTime<Utc>) -> Duration {
    (now - then).to_std().unwrap_or(Duration::ZERO)
}

impl AgentHealthMonitor {
    pub fn new(directory: Arc<AgentDirectory>, settings: HealthSettings) -> Self {
        Self { directory, settings, store: None }
    }

    /// Write every agent a sweep changes through `store`.
    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// One pass over every agent as of `now`. Each transition re-checks its
    /// condition under the entry lock, so a heartbeat or release racing the
    /// sweep wins.
    pub fn sweep(&self, now: DateTime<Utc>) -> HealthReport {
        let mut report = HealthReport::default();
        let timeout = self.settings.agent_timeout;
        let window = self.settings.recovery_window;

        for agent in self.directory.list() {
            match agent.status {
                AgentStatus::Busy | AgentStatus::Idle => {
                    let silent = elapsed_since(now, agent.last_heartbeat);
                    if silent <= timeout {
                        continue;
                    }
                    let applied = self.directory.transition_if(
                        &agent.id,
                        &[AgentStatus::Busy, AgentStatus::Idle],
                        AgentStatus::Error,
                        |current| elapsed_since(now, current.last_heartbeat) > timeout,
                    );
                    if applied {
                        warn!(
                            agent_id = %agent.id,
                            silent_secs = silent.as_secs(),
                            task_id = agent.current_task_id.as_deref().unwrap_or("-"),
                            "Agent unresponsive, marked error"
                        );
                        report.marked_error.push(agent.id);
                    }
                }
                AgentStatus::Error => {
                    if elapsed_since(now, agent.status_changed_at) <= window {
                        continue;
                    }
                    let applied = self.directory.transition_if(
                        &agent.id,
                        &[AgentStatus::Error],
                        AgentStatus::Idle,
                        |current| elapsed_since(now, current.status_changed_at) > window,
                    );
                    if applied {
                        info!(agent_id = %agent.id, "Agent recovered to idle");
                        report.recovered.push(agent.id);
                    }
                }
                AgentStatus::Offline => {}
            }
        }

        if !report.is_empty() {
            debug!(marked_error = report.marked_error.len(), recovered = report.recovered.len(), "Health sweep finished");
        }
        report
    }

    /// Sweep as of `now` and persist the agents that changed.
    pub async fn check(&self, now: DateTime<Utc>) -> HealthReport {
        let report = self.sweep(now);
        if let Some(store) = &self.store {
            for agent_id in report.marked_error.iter().chain(&report.recovered) {
                let Some(agent) = self.directory.get(agent_id) else {
                    continue;
                };
                if let Err(e) = store.save_agent(&agent).await {
                    warn!(agent_id = %agent_id, error = %e, "Could not persist agent health change");
                }
            }
        }
        report
    }

    /// Sweep every `check_interval` until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(interval_secs = self.settings.check_interval.as_secs(), "Health monitor started");
        let mut ticker = tokio::time::interval(self.settings.check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.check(Utc::now()).await;
                }
            }
        }
        info!("Health monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::Agent;
    use chrono::Duration as ChronoDuration;

    fn monitor() -> (Arc<AgentDirectory>, AgentHealthMonitor) {
        let directory = Arc::new(AgentDirectory::new());
        let monitor = AgentHealthMonitor::new(directory.clone(), HealthSettings::default());
        (directory, monitor)
    }

    #[test]
    fn test_stale_busy_agent_marked_error() {
        let (dir, monitor) = monitor();
        dir.register(Agent::new("a1", "a1", "claude-code", "/r"));
        dir.try_lock("a1", "t1").unwrap();

        let later = Utc::now() + ChronoDuration::minutes(6);
        let report = monitor.sweep(later);
        assert_eq!(report.marked_error, vec!["a1".to_string()]);
        let agent = dir.get("a1").unwrap();
        assert_eq!(agent.status, AgentStatus::Error);
        assert_eq!(agent.status == AgentStatus::Busy, agent.current_task_id.is_some());
        assert!(agent.current_task_id.is_none());
    }

    #[test]
    fn test_fresh_agents_untouched() {
        let (dir, monitor) = monitor();
        dir.register(Agent::new("a1", "a1", "claude-code", "/r"));
        let report = monitor.sweep(Utc::now() + ChronoDuration::minutes(4));
        assert!(report.is_empty());
        assert_eq!(dir.get("a1").unwrap().status, AgentStatus::Idle);
    }

    #[test]
    fn test_error_agent_recovers_after_window_and_clears_task() {
        let (dir, monitor) = monitor();
        dir.register(Agent::new("a1", "a1", "claude-code", "/r"));
        dir.try_lock("a1", "t1").unwrap();
        let marked_at = Utc::now() + ChronoDuration::minutes(6);
        monitor.sweep(marked_at);

        // within the window nothing happens
        assert!(monitor.sweep(Utc::now() + ChronoDuration::minutes(1)).recovered.is_empty());

        let report = monitor.sweep(Utc::now() + ChronoDuration::minutes(3));
        assert_eq!(report.recovered, vec!["a1".to_string()]);
        let agent = dir.get("a1").unwrap();
        assert_eq!(agent.status, AgentStatus::Idle);
        assert!(agent.current_task_id.is_none());
        assert!(agent.is_consistent());
    }

    #[test]
    fn test_offline_agents_ignored() {
        let (dir, monitor) = monitor();
        dir.register(Agent::new("a1", "a1", "claude-code", "/r"));
        dir.set_status("a1", AgentStatus::Offline);
        let report = monitor.sweep(Utc::now() + ChronoDuration::hours(2));
        assert!(report.is_empty());
        assert_eq!(dir.get("a1").unwrap().status, AgentStatus::Offline);
    }

    #[tokio::test]
    async fn test_check_persists_swept_agents() {
        let store = Arc::new(Database::in_memory().unwrap());
        let dir = Arc::new(AgentDirectory::new());
        let monitor = AgentHealthMonitor::new(dir.clone(), HealthSettings::default()).with_store(store.clone());
        dir.register(Agent::new("a1", "a1", "claude-code", "/r"));
        dir.register(Agent::new("a2", "a2", "claude-code", "/r"));
        dir.try_lock("a1", "t1").unwrap();
        dir.heartbeat_at("a2", Utc::now() + ChronoDuration::minutes(10));

        let report = monitor.check(Utc::now() + ChronoDuration::minutes(6)).await;
        assert_eq!(report.marked_error, vec!["a1".to_string()]);

        let saved = store.list_agents().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].id, "a1");
        assert_eq!(saved[0].status, AgentStatus::Error);
        assert!(saved[0].current_task_id.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let (_dir, monitor) = monitor();
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let handle = tokio::spawn(async move { monitor.run(cancel).await });
        tokio::time::advance(Duration::from_secs(120)).await;
        stop.cancel();
        handle.await.unwrap();
    }
}
