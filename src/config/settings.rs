use std::path::PathBuf;
use std::time::Duration;

use crate::agents::CliConnectorSettings;
use crate::discovery::DiscoverySettings;
use crate::health::HealthSettings;
use crate::pipeline::execution::ExecutionSettings;
use crate::pipeline::scheduler::SchedulerSettings;
use crate::resilience::{CircuitBreakerSettings, RetryPolicy};
use super::types::OrchestraConfig;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;

/// Fully resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub poll_interval: Duration,
    pub scheduler: SchedulerSettings,
    pub health: HealthSettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub retry: RetryPolicy,
    pub execution: ExecutionSettings,
    pub connector: CliConnectorSettings,
    pub discovery: DiscoverySettings,
    pub escalation_webhook: Option<String>,
    pub database_path: PathBuf,
    pub server_host: String,
    pub server_port: u16,
}

pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("orchestra")
        .join("orchestra.db")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            scheduler: SchedulerSettings::default(),
            health: HealthSettings::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            retry: RetryPolicy::default(),
            execution: ExecutionSettings::default(),
            connector: CliConnectorSettings::default(),
            discovery: DiscoverySettings::default(),
            escalation_webhook: None,
            database_path: default_database_path(),
            server_host: DEFAULT_HOST.to_string(),
            server_port: DEFAULT_PORT,
        }
    }
}

impl Settings {
    /// Overlay every value present in `config` on the defaults.
    pub fn from_config(config: &OrchestraConfig) -> Self {
        let mut s = Self::default();
        let secs = Duration::from_secs;

        if let Some(q) = &config.queue {
            if let Some(v) = q.poll_interval_secs { s.poll_interval = secs(v); }
            if let Some(v) = q.job_expiration_secs { s.scheduler.job_expiration = secs(v); }
            if let Some(v) = q.max_attempts { s.scheduler.max_attempts = v; }
            if let Some(v) = q.agent_retry_delay_secs { s.scheduler.agent_retry_delay = secs(v); }
            if let Some(v) = q.backoff_base_secs { s.scheduler.backoff_base = secs(v); }
            if let Some(v) = q.backoff_max_secs { s.scheduler.backoff_max = secs(v); }
        }

        if let Some(h) = &config.health {
            if let Some(v) = h.check_interval_secs { s.health.check_interval = secs(v); }
            if let Some(v) = h.agent_timeout_secs { s.health.agent_timeout = secs(v); }
            if let Some(v) = h.recovery_window_secs { s.health.recovery_window = secs(v); }
        }

        if let Some(cb) = &config.circuit_breaker {
            if let Some(v) = cb.failure_threshold { s.circuit_breaker.failure_threshold = v; }
            if let Some(v) = cb.failure_rate_threshold { s.circuit_breaker.failure_rate_threshold = v; }
            if let Some(v) = cb.minimum_throughput { s.circuit_breaker.minimum_throughput = v; }
            if let Some(v) = cb.sampling_window_secs { s.circuit_breaker.sampling_window = secs(v); }
            if let Some(v) = cb.break_duration_secs { s.circuit_breaker.break_duration = secs(v); }
        }

        if let Some(r) = &config.retry {
            if let Some(v) = r.max_retries { s.retry.max_retries = v; }
            if let Some(v) = r.base_delay_ms { s.retry.base_delay = Duration::from_millis(v); }
            if let Some(v) = r.max_delay_ms { s.retry.max_delay = Duration::from_millis(v); }
            if let Some(v) = r.jitter { s.retry.jitter = v; }
            if let Some(v) = &r.retry_on { s.retry.retry_on = v.clone(); }
        }

        if let Some(e) = &config.execution {
            if let Some(v) = e.timeout_secs { s.execution.timeout = secs(v); }
            if let Some(v) = e.heartbeat_interval_secs { s.execution.heartbeat_interval = secs(v); }
            if let Some(v) = &e.agent_executable { s.connector.executable = v.clone(); }
            if let Some(v) = &e.agent_args { s.connector.args = v.clone(); }
        }

        if let Some(d) = &config.discovery {
            if let Some(v) = &d.executable { s.discovery.executable = v.clone(); }
            if let Some(v) = &d.projects_dir { s.discovery.projects_dir = expand_home(v); }
            if let Some(v) = &d.runtime_dir { s.discovery.runtime_dir = expand_home(v); }
            if let Some(v) = d.cache_ttl_secs { s.discovery.cache_ttl = secs(v); }
            if let Some(v) = d.connection_timeout_secs { s.discovery.connection_timeout_secs = v; }
            if let Some(v) = d.sync_interval_secs { s.discovery.sync_interval = secs(v); }
        }

        if let Some(esc) = &config.escalation {
            s.escalation_webhook = esc.webhook_url.clone().filter(|u| !u.trim().is_empty());
        }
        if let Some(db) = &config.database {
            if let Some(v) = &db.path { s.database_path = expand_home(v); }
        }
        if let Some(srv) = &config.server {
            if let Some(v) = &srv.host { s.server_host = v.clone(); }
            if let Some(v) = srv.port { s.server_port = v; }
        }

        s
    }
}

/// `~/x` -> `$HOME/x`.
fn expand_home(raw: &str) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => dirs::home_dir().map(|h| h.join(rest)).unwrap_or_else(|| PathBuf::from(raw)),
        None => PathBuf::from(raw),
    }
}
