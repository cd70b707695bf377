use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agents::{AgentConnector, AgentDirectory};
use crate::config::Settings;
use crate::db::TaskStore;
use crate::discovery::ProcessDiscovery;
use crate::errors::OrchestraError;
use crate::models::{Agent, AgentStatus, Task, TaskPriority, TaskStatus, MAX_COMMAND_LENGTH};
use crate::notifications::{NotificationChannel, ProgressTracker};
use crate::queue::{TaskQueue, Transition};
use crate::resilience::{EscalationChannel, EscalationNotifier, ResiliencePolicy};
use super::execution::{ExecutionPipeline, PipelineDeps};
use super::scheduler::JobScheduler;
use super::state::OrchestratorState;

/// External collaborators the orchestrator is wired to.
pub struct Collaborators {
    pub store: Arc<dyn TaskStore>,
    pub connector: Arc<dyn AgentConnector>,
    pub notifier: Arc<dyn NotificationChannel>,
    pub escalation: Arc<dyn EscalationChannel>,
    pub progress: Arc<ProgressTracker>,
    pub discovery: Option<Arc<ProcessDiscovery>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub refreshed: Vec<String>,
    pub registered: Vec<String>,
}

pub struct Orchestrator {
    directory: Arc<AgentDirectory>,
    queue: Arc<TaskQueue>,
    store: Arc<dyn TaskStore>,
    scheduler: Arc<JobScheduler>,
    progress: Arc<ProgressTracker>,
    discovery: Option<Arc<ProcessDiscovery>>,
    poll_interval: Duration,
    cancel_token: CancellationToken,
}

impl Orchestrator {
    pub fn new(settings: &Settings, deps: Collaborators) -> Self {
        let directory = Arc::new(AgentDirectory::new());
        let queue = Arc::new(TaskQueue::new());
        let cancel_token = CancellationToken::new();

        let agent_policy = ResiliencePolicy::new("agent", settings.circuit_breaker.clone(), settings.retry.clone());
        let escalation_policy = ResiliencePolicy::new("escalation", settings.circuit_breaker.clone(), settings.retry.clone());
        let escalation = Arc::new(EscalationNotifier::new(deps.escalation, escalation_policy));

        let pipeline = Arc::new(ExecutionPipeline::new(PipelineDeps {
            directory: directory.clone(),
            queue: queue.clone(),
            store: deps.store.clone(),
            connector: deps.connector,
            notifier: deps.notifier,
            progress: deps.progress.clone(),
            agent_policy,
            escalation,
            settings: settings.execution.clone(),
        }));
        let scheduler = Arc::new(JobScheduler::new(pipeline, settings.scheduler.clone(), cancel_token.child_token()));

        Self {
            directory,
            queue,
            store: deps.store,
            scheduler,
            progress: deps.progress,
            discovery: deps.discovery,
            poll_interval: settings.poll_interval,
            cancel_token,
        }
    }

    pub fn directory(&self) -> &Arc<AgentDirectory> {
        &self.directory
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.scheduler
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    pub fn discovery(&self) -> Option<&Arc<ProcessDiscovery>> {
        self.discovery.as_ref()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Reload unfinished tasks and known agents after a restart. Agent locks
    /// from the previous run are dropped.
    pub async fn restore(&self) -> Result<(usize, usize), OrchestraError> {
        let tasks = self.store.unfinished_tasks().await?;
        let restored_tasks = self.queue.restore(tasks);
        for task in self.queue.pending() {
            if let Err(e) = self.store.update_task_status(&task.id, TaskStatus::Pending, None).await {
                warn!(task_id = %task.id, error = %e, "Could not persist requeued task");
            }
        }

        let agents = self.store.load_agents().await?;
        let restored_agents = agents.len();
        for mut agent in agents {
            if agent.status == AgentStatus::Busy {
                agent.status = AgentStatus::Idle;
            }
            agent.current_task_id = None;
            self.directory.register(agent);
        }
        info!(tasks = restored_tasks, agents = restored_agents, "State restored");
        Ok((restored_tasks, restored_agents))
    }

    /// Validate, persist and queue a new task.
    pub async fn enqueue(&self, command: &str, repository_path: &str, priority: TaskPriority) -> Result<String, OrchestraError> {
        if command.trim().is_empty() {
            return Err(OrchestraError::Validation("command must not be empty".into()));
        }
        if command.chars().count() > MAX_COMMAND_LENGTH {
            return Err(OrchestraError::Validation(format!(
                "command must be at most {} characters",
                MAX_COMMAND_LENGTH
            )));
        }
        if repository_path.trim().is_empty() {
            return Err(OrchestraError::Validation("repository path must not be empty".into()));
        }

        let task = self.queue.create(command, repository_path, priority);
        self.store.save_task(&task).await?;
        let task_id = task.id.clone();
        self.queue.insert(task);
        info!(task_id = %task_id, priority = %priority, repo = repository_path, "Task enqueued");
        Ok(task_id)
    }

    /// Claim the best Pending task for an Idle agent.
    pub async fn assign_next(&self, agent_id: &str) -> Option<Task> {
        let agent = self.directory.get(agent_id)?;
        if agent.status != AgentStatus::Idle {
            debug!(agent_id, status = %agent.status, "Agent not idle, nothing assigned");
            return None;
        }
        let task = self.queue.assign_next(&agent)?;
        if let Err(e) = self.store.update_task_status(&task.id, TaskStatus::Assigned, Some(agent_id)).await {
            warn!(task_id = %task.id, error = %e, "Could not persist assignment");
        }
        Some(task)
    }

    /// Returns false when the task is unknown or already terminal.
    pub async fn update_status(&self, task_id: &str, status: TaskStatus) -> bool {
        match self.queue.transition(task_id, status) {
            Transition::Applied(task) => {
                if let Err(e) = self.store.update_task_status(task_id, status, task.assigned_agent_id.as_deref()).await {
                    warn!(task_id, error = %e, "Could not persist status change");
                }
                true
            }
            Transition::Unchanged => true,
            Transition::Refused | Transition::Unknown => false,
        }
    }

    pub fn get_state(&self) -> OrchestratorState {
        OrchestratorState {
            agents: self.directory.list(),
            queue: self.queue.snapshot(),
            stats: self.queue.stats(),
            active_jobs: self.scheduler.active_jobs(),
            agent_circuit: self.scheduler.pipeline().deps().agent_policy.breaker().snapshot(),
        }
    }

    pub fn get_task(&self, task_id: &str) -> Option<Task> {
        self.queue.get(task_id)
    }

    pub async fn register_agent(&self, agent: Agent) {
        let id = agent.id.clone();
        self.directory.register(agent);
        self.persist_agent(&id).await;
    }

    pub async fn update_agent_status(&self, agent_id: &str, status: AgentStatus) -> bool {
        let changed = self.directory.set_status(agent_id, status);
        if changed {
            self.persist_agent(agent_id).await;
        }
        changed
    }

    pub fn heartbeat(&self, agent_id: &str) -> bool {
        self.directory.heartbeat(agent_id)
    }

    async fn persist_agent(&self, agent_id: &str) {
        if let Some(agent) = self.directory.get(agent_id) {
            if let Err(e) = self.store.save_agent(&agent).await {
                warn!(agent_id, error = %e, "Could not persist agent");
            }
        }
    }

    /// Cancel a task that has not finished yet. Returns false when it was
    /// already terminal.
    pub async fn cancel_task(&self, task_id: &str) -> Result<bool, OrchestraError> {
        match self.queue.transition(task_id, TaskStatus::Cancelled) {
            Transition::Applied(task) => {
                self.store.update_task_status(task_id, TaskStatus::Cancelled, task.assigned_agent_id.as_deref()).await?;
                let signalled = self.scheduler.cancel_task(task_id);
                info!(task_id, jobs = signalled, "Task cancelled");
                Ok(true)
            }
            Transition::Unchanged | Transition::Refused => Ok(false),
            Transition::Unknown => Err(OrchestraError::NotFound(format!("task {}", task_id))),
        }
    }

    /// Pair each Idle agent without a running job with its next task.
    pub async fn dispatch_pending(&self) -> Vec<String> {
        let mut jobs = Vec::new();
        for agent in self.directory.idle_agents() {
            if self.scheduler.has_active_job_for_agent(&agent.id) {
                continue;
            }
            if let Some(task) = self.assign_next(&agent.id).await {
                jobs.push(self.scheduler.enqueue(&task.id, &agent.id));
            }
        }
        if !jobs.is_empty() {
            debug!(dispatched = jobs.len(), "Dispatched pending tasks");
        }
        jobs
    }

    /// Dispatch every poll interval until shutdown.
    pub async fn run_dispatcher(&self) {
        info!(interval_secs = self.poll_interval.as_secs(), "Dispatcher started");
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    self.dispatch_pending().await;
                    let purged = self.scheduler.purge_expired(Utc::now());
                    if purged > 0 {
                        debug!(purged, "Expired job records removed");
                    }
                }
            }
        }
        info!("Dispatcher stopped");
    }

    /// Match live agent processes against the directory: known sessions get
    /// a heartbeat, unknown ones are registered as new Idle agents.
    pub async fn sync_discovered_agents(&self) -> SyncReport {
        let mut report = SyncReport::default();
        let Some(discovery) = &self.discovery else {
            return report;
        };

        for process in discovery.discover_agent_processes().await {
            let Some(session) = process.session_id.as_deref() else {
                debug!(pid = process.pid, "Process without session id skipped");
                continue;
            };
            if let Some(agent) = self.directory.find_by_session(session) {
                self.directory.heartbeat(&agent.id);
                report.refreshed.push(agent.id);
                continue;
            }

            let short: String = session.chars().take(8).collect();
            let executable = &discovery.settings().executable;
            let agent = Agent::new(
                &format!("{}-{}", executable, short),
                &format!("{} (pid {})", executable, process.pid),
                executable,
                &process.working_directory.to_string_lossy(),
            )
            .with_session(session);
            info!(agent_id = %agent.id, pid = process.pid, session, "Registering discovered agent");
            report.registered.push(agent.id.clone());
            self.register_agent(agent).await;
        }
        report
    }

    pub async fn run_discovery_sync(&self) {
        let Some(discovery) = &self.discovery else {
            return;
        };
        let interval = discovery.settings().sync_interval;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.sync_discovered_agents().await;
                    debug!(refreshed = report.refreshed.len(), registered = report.registered.len(), "Discovery sync");
                }
            }
        }
    }

    pub fn shutdown(&self) {
        info!("Orchestrator shutting down");
        self.scheduler.shutdown();
        self.cancel_token.cancel();
    }
}
