use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{OrchestraError, RetryDisposition};
use crate::models::{JobRecord, JobState};
use super::execution::ExecutionPipeline;
use super::state::JobRequest;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_AGENT_RETRY_DELAY_SECS: u64 = 30;
pub const DEFAULT_BACKOFF_BASE_SECS: u64 = 2;
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;
pub const DEFAULT_JOB_EXPIRATION_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Attempts per job, the first one included.
    pub max_attempts: u32,
    /// Fixed wait before retrying an unavailable agent.
    pub agent_retry_delay: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// How long finished job records are kept.
    pub job_expiration: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            agent_retry_delay: Duration::from_secs(DEFAULT_AGENT_RETRY_DELAY_SECS),
            backoff_base: Duration::from_secs(DEFAULT_BACKOFF_BASE_SECS),
            backoff_max: Duration::from_secs(DEFAULT_BACKOFF_MAX_SECS),
            job_expiration: Duration::from_secs(DEFAULT_JOB_EXPIRATION_SECS),
        }
    }
}

/// In-process at-least-once job runner for the execution pipeline.
///
/// Each job runs on its own tokio task with a token derived from the
/// scheduler's shutdown token. Retry-eligible failures are retried with the
/// delay their classification asks for.
pub struct JobScheduler {
    pipeline: Arc<ExecutionPipeline>,
    settings: SchedulerSettings,
    jobs: DashMap<String, JobRecord>,
    tokens: DashMap<String, CancellationToken>,
    shutdown: CancellationToken,
}

impl JobScheduler {
    pub fn new(pipeline: Arc<ExecutionPipeline>, settings: SchedulerSettings, shutdown: CancellationToken) -> Self {
        Self {
            pipeline,
            settings,
            jobs: DashMap::new(),
            tokens: DashMap::new(),
            shutdown,
        }
    }

    pub fn pipeline(&self) -> &Arc<ExecutionPipeline> {
        &self.pipeline
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn register(&self, task_id: &str, agent_id: &str) -> (String, CancellationToken) {
        let job_id = uuid::Uuid::new_v4().to_string();
        let token = self.shutdown.child_token();
        self.jobs.insert(job_id.clone(), JobRecord::new(&job_id, task_id, agent_id));
        self.tokens.insert(job_id.clone(), token.clone());
        info!(job_id = %job_id, task_id, agent_id, "Job enqueued");
        (job_id, token)
    }

    /// Queue a pipeline run for `task_id` on `agent_id` and return its job id.
    pub fn enqueue(self: &Arc<Self>, task_id: &str, agent_id: &str) -> String {
        let (job_id, token) = self.register(task_id, agent_id);
        let scheduler = Arc::clone(self);
        let id = job_id.clone();
        tokio::spawn(async move {
            scheduler.run_job(&id, token).await;
        });
        job_id
    }

    /// Run a job on the current task and wait for its final record.
    pub async fn run_inline(&self, task_id: &str, agent_id: &str) -> Option<JobRecord> {
        let (job_id, token) = self.register(task_id, agent_id);
        self.run_job(&job_id, token).await;
        self.get(&job_id)
    }

    async fn run_job(&self, job_id: &str, token: CancellationToken) {
        let Some(record) = self.get(job_id) else {
            warn!(job_id, "Unknown job");
            return;
        };
        let max_attempts = self.settings.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            self.update(job_id, |r| {
                r.state = JobState::Running;
                r.attempts = attempt;
            });
            let req = JobRequest {
                job_id: job_id.to_string(),
                task_id: record.task_id.clone(),
                agent_id: record.agent_id.clone(),
                attempt,
            };

            let error = match self.pipeline.run(&req, token.clone()).await {
                Ok(_) => {
                    self.finish(job_id, JobState::Succeeded, None);
                    return;
                }
                Err(e) => e,
            };

            if matches!(error, OrchestraError::Cancelled(_)) {
                self.finish(job_id, JobState::Cancelled, Some(&error));
                return;
            }
            let class = error.classify();
            if !class.retryable() {
                self.finish(job_id, JobState::Failed, Some(&error));
                return;
            }
            if attempt == max_attempts {
                warn!(job_id, attempts = attempt, error = %error, "Job retries exhausted");
                self.pipeline.give_up(&req, &error).await;
                self.finish(job_id, JobState::Failed, Some(&error));
                return;
            }

            let delay = match class.disposition {
                RetryDisposition::Retry => class.retry_delay(attempt - 1, self.settings.agent_retry_delay, self.settings.backoff_max),
                _ => class.retry_delay(attempt - 1, self.settings.backoff_base, self.settings.backoff_max),
            };
            self.update(job_id, |r| {
                r.state = JobState::Retrying;
                r.last_error = Some(error.to_string());
            });
            info!(
                job_id,
                attempt,
                error_type = class.error_type,
                delay_ms = delay.as_millis() as u64,
                "Job will retry"
            );

            tokio::select! {
                _ = token.cancelled() => {
                    self.finish(job_id, JobState::Cancelled, Some(&error));
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn update<F: FnOnce(&mut JobRecord)>(&self, job_id: &str, f: F) {
        if let Some(mut record) = self.jobs.get_mut(job_id) {
            f(&mut record);
        }
    }

    fn finish(&self, job_id: &str, state: JobState, error: Option<&OrchestraError>) {
        self.update(job_id, |r| {
            r.state = state;
            r.finished_at = Some(Utc::now());
            if let Some(e) = error {
                r.last_error = Some(e.to_string());
            }
        });
        self.tokens.remove(job_id);
        debug!(job_id, state = ?state, "Job finished");
    }

    pub fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.jobs.get(job_id).map(|r| r.clone())
    }

    pub fn jobs_for_task(&self, task_id: &str) -> Vec<JobRecord> {
        let mut jobs: Vec<JobRecord> = self
            .jobs
            .iter()
            .filter(|r| r.task_id == task_id)
            .map(|r| r.clone())
            .collect();
        jobs.sort_by_key(|r| r.enqueued_at);
        jobs
    }

    pub fn active_jobs(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<JobRecord> = self
            .jobs
            .iter()
            .filter(|r| !r.state.is_finished())
            .map(|r| r.clone())
            .collect();
        jobs.sort_by_key(|r| r.enqueued_at);
        jobs
    }

    pub fn has_active_job_for_agent(&self, agent_id: &str) -> bool {
        self.jobs.iter().any(|r| r.agent_id == agent_id && !r.state.is_finished())
    }

    /// Cancel every unfinished job for `task_id`. Returns how many were signalled.
    pub fn cancel_task(&self, task_id: &str) -> usize {
        let mut cancelled = 0;
        for record in self.jobs.iter().filter(|r| r.task_id == task_id && !r.state.is_finished()) {
            if let Some(token) = self.tokens.get(&record.job_id) {
                token.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Drop finished records older than the expiration window, together
    /// with their progress history.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let Ok(window) = chrono::Duration::from_std(self.settings.job_expiration) else {
            return 0;
        };
        let expired: Vec<String> = self
            .jobs
            .iter()
            .filter(|r| r.finished_at.is_some_and(|done| now - done >= window))
            .map(|r| r.job_id.clone())
            .collect();

        let progress = &self.pipeline.deps().progress;
        let mut purged = 0;
        for job_id in expired {
            if self.jobs.remove(&job_id).is_some() {
                progress.forget(&job_id);
                purged += 1;
            }
        }
        purged
    }

    pub fn shutdown(&self) {
        info!(active = self.active_jobs().len(), "Scheduler shutting down");
        self.shutdown.cancel();
    }
}
