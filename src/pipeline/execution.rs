//! One attempt at running one task on one agent, end to end.
//!
//! Stages run strictly in order: Validate, AcquireLock, InitTracking,
//! PrepareEnvironment, Execute, ProcessResult, UpdateStatus, Cleanup. The
//! agent lock is released on every exit path, panics included.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agents::{AgentConnector, AgentDirectory};
use crate::db::TaskStore;
use crate::errors::OrchestraError;
use crate::models::{Task, TaskResult, TaskStatus, MAX_COMMAND_LENGTH};
use crate::notifications::{ChannelMessage, NotificationChannel, ProgressTracker};
use crate::queue::{TaskQueue, Transition};
use crate::resilience::{EscalationAlert, EscalationNotifier, ResiliencePolicy};
use super::phase;
use super::state::{ExecutionStage, JobRequest};

pub const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 25 * 60;
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;
const OUTPUT_SUMMARY_CHARS: usize = 2000;

#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    /// Hard wall-clock limit for the agent call.
    pub timeout: Duration,
    /// How often the agent's heartbeat is refreshed while its call runs.
    /// Must stay below the health monitor's agent timeout.
    pub heartbeat_interval: Duration,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_EXECUTION_TIMEOUT_SECS),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
        }
    }
}

/// Everything a pipeline attempt touches.
pub struct PipelineDeps {
    pub directory: Arc<AgentDirectory>,
    pub queue: Arc<TaskQueue>,
    pub store: Arc<dyn TaskStore>,
    pub connector: Arc<dyn AgentConnector>,
    pub notifier: Arc<dyn NotificationChannel>,
    pub progress: Arc<ProgressTracker>,
    /// Breaker + retry around the outbound agent call.
    pub agent_policy: ResiliencePolicy,
    pub escalation: Arc<EscalationNotifier>,
    pub settings: ExecutionSettings,
}

enum StageOutcome {
    /// Ran to completion in this attempt.
    Finished(TaskResult),
    /// The task was already terminal; nothing was executed or written.
    AlreadyFinished(TaskResult),
}

pub struct ExecutionPipeline {
    deps: PipelineDeps,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Keep the tail of long agent output; that is where errors usually are.
fn summarize(output: &str) -> String {
    let count = output.chars().count();
    if count <= OUTPUT_SUMMARY_CHARS {
        return output.to_string();
    }
    let tail: String = output.chars().skip(count - OUTPUT_SUMMARY_CHARS).collect();
    format!("...{}", tail)
}

impl ExecutionPipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    pub fn deps(&self) -> &PipelineDeps {
        &self.deps
    }

    fn checkpoint(&self, req: &JobRequest, stage: ExecutionStage) {
        let def = phase::definition(stage);
        self.deps.progress.report(&req.job_id, &req.task_id, def.progress, def.display_name);
    }

    /// Run one attempt. `Ok` carries the result of a finished task (this
    /// attempt's, or the stored one on idempotent re-entry). `Err` carries
    /// the classified failure after task and agent state were updated.
    pub async fn run(&self, req: &JobRequest, cancel: CancellationToken) -> Result<TaskResult, OrchestraError> {
        let started = Instant::now();
        info!(job_id = %req.job_id, task_id = %req.task_id, agent_id = %req.agent_id, attempt = req.attempt, "Pipeline attempt started");

        let outcome = AssertUnwindSafe(self.run_stages(req, &cancel, started))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(OrchestraError::Unexpected(format!("pipeline panicked: {}", panic_message(payload.as_ref()))))
            });

        let result = match outcome {
            Ok(StageOutcome::Finished(result)) => Ok(result),
            Ok(StageOutcome::AlreadyFinished(result)) => {
                debug!(task_id = %req.task_id, status = %result.status, "Task already terminal, nothing to do");
                Ok(result)
            }
            Err(e) => Err(self.handle_failure(req, e, started).await),
        };

        // Cleanup
        self.deps.directory.release(&req.agent_id, &req.task_id);
        self.checkpoint(req, ExecutionStage::Cleanup);
        info!(
            job_id = %req.job_id,
            task_id = %req.task_id,
            duration_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Pipeline attempt finished"
        );
        result
    }

    async fn run_stages(
        &self,
        req: &JobRequest,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<StageOutcome, OrchestraError> {
        let deps = &self.deps;

        // Validate
        let task = self.load_task(&req.task_id).await?;
        if task.status.is_terminal() {
            return Ok(StageOutcome::AlreadyFinished(self.stored_result(&task, req).await?));
        }
        validate_command(&task)?;
        if cancel.is_cancelled() {
            return Err(OrchestraError::Cancelled(format!("task {} cancelled before start", task.id)));
        }
        self.checkpoint(req, ExecutionStage::Validate);

        // AcquireLock
        deps.directory.try_lock(&req.agent_id, &task.id)?;
        self.checkpoint(req, ExecutionStage::AcquireLock);

        // InitTracking
        if let Transition::Refused = deps.queue.transition(&task.id, TaskStatus::InProgress) {
            return self.superseded(req).await;
        }
        deps.store.update_task_status(&task.id, TaskStatus::InProgress, Some(&req.agent_id)).await?;
        let started_msg = ChannelMessage::started(&task.id, &req.agent_id);
        deps.notifier.send_to_group(&task.id, &started_msg).await;
        deps.notifier.send_to_client(&req.agent_id, &started_msg).await;
        self.checkpoint(req, ExecutionStage::InitTracking);

        // PrepareEnvironment
        let repo = Path::new(&task.repository_path);
        check_repository(repo)?;
        self.checkpoint(req, ExecutionStage::PrepareEnvironment);

        // Execute
        let response = self.execute(req, &task, repo, cancel).await?;
        self.checkpoint(req, ExecutionStage::Execute);
        if !response.success {
            return Err(OrchestraError::CommandExecution(format!(
                "agent reported failure: {}",
                summarize(&response.output)
            )));
        }

        // ProcessResult
        let result = TaskResult {
            task_id: task.id.clone(),
            agent_id: req.agent_id.clone(),
            status: TaskStatus::Completed,
            output: response.output,
            success: true,
            completed_at: Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
            attempt: req.attempt,
        };
        deps.store.record_result(&result).await?;
        self.checkpoint(req, ExecutionStage::ProcessResult);

        // UpdateStatus
        if let Transition::Refused = deps.queue.transition(&task.id, TaskStatus::Completed) {
            return self.superseded(req).await;
        }
        deps.store.update_task_status(&task.id, TaskStatus::Completed, Some(&req.agent_id)).await?;
        let done = ChannelMessage::success(&task.id, &summarize(&result.output));
        deps.notifier.send_to_group(&task.id, &done).await;
        deps.notifier.send_to_client(&req.agent_id, &done).await;
        self.checkpoint(req, ExecutionStage::UpdateStatus);

        info!(task_id = %task.id, agent_id = %req.agent_id, duration_ms = result.duration_ms, "Task completed");
        Ok(StageOutcome::Finished(result))
    }

    async fn load_task(&self, task_id: &str) -> Result<Task, OrchestraError> {
        let stored = self.deps.store.get_task(task_id).await?;
        let live = self.deps.queue.get(task_id);
        match (stored, live) {
            // a terminal status on either side wins
            (Some(mut s), Some(l)) => {
                if l.status.is_terminal() && !s.status.is_terminal() {
                    s.status = l.status;
                }
                Ok(s)
            }
            (Some(s), None) => Ok(s),
            (None, Some(l)) => Ok(l),
            (None, None) => Err(OrchestraError::NotFound(format!("task {}", task_id))),
        }
    }

    /// The result already on record for a terminal task, or one rebuilt
    /// from its status when none was stored.
    async fn stored_result(&self, task: &Task, req: &JobRequest) -> Result<TaskResult, OrchestraError> {
        let stored = self.deps.store.latest_result(&task.id).await?;
        Ok(stored.unwrap_or_else(|| TaskResult {
            task_id: task.id.clone(),
            agent_id: task.assigned_agent_id.clone().unwrap_or_else(|| req.agent_id.clone()),
            status: task.status,
            output: String::new(),
            success: task.status == TaskStatus::Completed,
            completed_at: Utc::now(),
            duration_ms: 0,
            attempt: 0,
        }))
    }

    /// The task went terminal behind this attempt's back. A cancellation
    /// ends the attempt as cancelled; any other terminal status stands.
    async fn superseded(&self, req: &JobRequest) -> Result<StageOutcome, OrchestraError> {
        let task = self.load_task(&req.task_id).await?;
        info!(task_id = %task.id, agent_id = %req.agent_id, status = %task.status, "Task finished elsewhere, attempt abandoned");
        if task.status == TaskStatus::Cancelled {
            return Err(OrchestraError::Cancelled(format!("task {} cancelled while running", task.id)));
        }
        Ok(StageOutcome::AlreadyFinished(self.stored_result(&task, req).await?))
    }

    /// The agent call under caller cancellation and the hard timeout. The
    /// agent's heartbeat is refreshed every `heartbeat_interval` while the
    /// call is pending.
    async fn execute(
        &self,
        req: &JobRequest,
        task: &Task,
        repo: &Path,
        cancel: &CancellationToken,
    ) -> Result<crate::agents::AgentResponse, OrchestraError> {
        let timeout = self.deps.settings.timeout;
        let period = self.deps.settings.heartbeat_interval;
        let call_token = cancel.child_token();
        let connector = self.deps.connector.as_ref();
        let command = task.command.as_str();
        let token = &call_token;

        debug!(task_id = %task.id, agent_id = %req.agent_id, timeout_secs = timeout.as_secs(), "Executing command");
        let call = self.deps.agent_policy.execute("agent-command", move || {
            connector.execute_command(command, repo, token.clone())
        });
        tokio::pin!(call);
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let outcome = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Err(OrchestraError::Cancelled(format!("task {} cancelled", task.id))),
                _ = &mut deadline => break Err(OrchestraError::TaskTimeout {
                    task_id: task.id.clone(),
                    timeout,
                }),
                res = &mut call => break res,
                _ = heartbeat.tick() => {
                    self.deps.directory.heartbeat(&req.agent_id);
                }
            }
        };
        call_token.cancel();
        outcome
    }

    /// Bring task and agent state in line with `error`, persist and relay
    /// the outcome, escalate if needed. Returns the error for the scheduler.
    async fn handle_failure(&self, req: &JobRequest, error: OrchestraError, started: Instant) -> OrchestraError {
        let deps = &self.deps;
        let class = error.classify();

        if class.retryable() {
            // stays with this agent; the scheduler will come back
            if let Transition::Applied(_) = deps.queue.transition(&req.task_id, TaskStatus::Assigned) {
                if let Err(e) = deps.store.update_task_status(&req.task_id, TaskStatus::Assigned, Some(&req.agent_id)).await {
                    warn!(task_id = %req.task_id, error = %e, "Could not persist retry state");
                }
            }
            warn!(
                task_id = %req.task_id,
                agent_id = %req.agent_id,
                attempt = req.attempt,
                error_type = class.error_type,
                error = %error,
                "Attempt failed, eligible for retry"
            );
            return error;
        }

        if matches!(error, OrchestraError::NotFound(_)) {
            error!(task_id = %req.task_id, "Task vanished before execution");
            return error;
        }

        let status = if matches!(error, OrchestraError::Cancelled(_)) {
            TaskStatus::Cancelled
        } else {
            TaskStatus::Failed
        };
        match &error {
            OrchestraError::Unexpected(_) => error!(
                job_id = %req.job_id,
                task_id = %req.task_id,
                agent_id = %req.agent_id,
                attempt = req.attempt,
                elapsed_ms = started.elapsed().as_millis() as u64,
                error = %error,
                "Unexpected pipeline failure"
            ),
            _ => warn!(
                task_id = %req.task_id,
                agent_id = %req.agent_id,
                error_type = class.error_type,
                error = %error,
                "Task ended as {}", status
            ),
        }

        // a status recorded concurrently (a cancel, usually) is the one reported
        let status = match deps.queue.transition(&req.task_id, status) {
            Transition::Refused => deps.queue.get(&req.task_id).map(|t| t.status).unwrap_or(status),
            _ => status,
        };
        if let Err(e) = deps.store.update_task_status(&req.task_id, status, Some(&req.agent_id)).await {
            error!(task_id = %req.task_id, error = %e, "Could not persist final task status");
        }

        let summary = format!("{}: {}", class.error_type, error);
        let result = TaskResult {
            task_id: req.task_id.clone(),
            agent_id: req.agent_id.clone(),
            status,
            output: summary.clone(),
            success: false,
            completed_at: Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
            attempt: req.attempt,
        };
        if let Err(e) = deps.store.record_result(&result).await {
            error!(task_id = %req.task_id, error = %e, "Could not persist task result");
        }

        let msg = ChannelMessage::error(&req.task_id, &summary);
        deps.notifier.send_to_group(&req.task_id, &msg).await;
        deps.notifier.send_to_client(&req.agent_id, &msg).await;

        if error.needs_escalation() {
            deps.escalation
                .escalate(EscalationAlert::for_error(Some(&req.task_id), Some(&req.agent_id), &error))
                .await;
        }
        error
    }

    /// Called by the scheduler once a retry-eligible failure has used up all
    /// attempts.
    pub async fn give_up(&self, req: &JobRequest, error: &OrchestraError) {
        let deps = &self.deps;
        match error {
            OrchestraError::AgentUnavailable(_) => {
                if let Transition::Applied(_) = deps.queue.transition(&req.task_id, TaskStatus::Pending) {
                    if let Err(e) = deps.store.update_task_status(&req.task_id, TaskStatus::Pending, None).await {
                        warn!(task_id = %req.task_id, error = %e, "Could not persist requeue");
                    }
                    info!(task_id = %req.task_id, agent_id = %req.agent_id, "Agent never became available, task requeued");
                }
            }
            _ => {
                if let Transition::Refused = deps.queue.transition(&req.task_id, TaskStatus::Failed) {
                    debug!(task_id = %req.task_id, "Task already terminal, give-up skipped");
                    return;
                }
                if let Err(e) = deps.store.update_task_status(&req.task_id, TaskStatus::Failed, Some(&req.agent_id)).await {
                    error!(task_id = %req.task_id, error = %e, "Could not persist failure after retries");
                }
                let msg = ChannelMessage::error(&req.task_id, &format!("{}: {}", error.classify().error_type, error));
                deps.notifier.send_to_group(&req.task_id, &msg).await;
            }
        }
    }
}

fn validate_command(task: &Task) -> Result<(), OrchestraError> {
    if task.command.trim().is_empty() {
        return Err(OrchestraError::Validation("command is empty".into()));
    }
    if task.command.chars().count() > MAX_COMMAND_LENGTH {
        return Err(OrchestraError::Validation(format!(
            "command exceeds {} characters",
            MAX_COMMAND_LENGTH
        )));
    }
    if task.repository_path.trim().is_empty() {
        return Err(OrchestraError::Validation("repository path is empty".into()));
    }
    Ok(())
}

fn check_repository(path: &Path) -> Result<(), OrchestraError> {
    let meta = std::fs::metadata(path).map_err(|e| {
        OrchestraError::RepositoryAccess(format!("{}: {}", path.display(), e))
    })?;
    if !meta.is_dir() {
        return Err(OrchestraError::RepositoryAccess(format!("{} is not a directory", path.display())));
    }
    if meta.permissions().readonly() {
        return Err(OrchestraError::RepositoryAccess(format!("{} is read-only", path.display())));
    }
    Ok(())
}
