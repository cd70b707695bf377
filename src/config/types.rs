use serde::{Deserialize, Serialize};

/// On-disk configuration. Every section and field is optional; missing
/// values fall back to the defaults in [`super::Settings`].
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct OrchestraConfig {
    pub queue: Option<QueueConfig>,
    pub health: Option<HealthConfig>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    pub retry: Option<RetryConfig>,
    pub execution: Option<ExecutionConfig>,
    pub discovery: Option<DiscoveryConfig>,
    pub escalation: Option<EscalationConfig>,
    pub database: Option<DatabaseConfig>,
    pub server: Option<ServerConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct QueueConfig {
    pub poll_interval_secs: Option<u64>,
    pub job_expiration_secs: Option<u64>,
    pub max_attempts: Option<u32>,
    pub agent_retry_delay_secs: Option<u64>,
    pub backoff_base_secs: Option<u64>,
    pub backoff_max_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct HealthConfig {
    pub check_interval_secs: Option<u64>,
    pub agent_timeout_secs: Option<u64>,
    pub recovery_window_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: Option<u32>,
    pub failure_rate_threshold: Option<f64>,
    pub minimum_throughput: Option<u32>,
    pub sampling_window_secs: Option<u64>,
    pub break_duration_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RetryConfig {
    pub max_retries: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub jitter: Option<bool>,
    pub retry_on: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ExecutionConfig {
    pub timeout_secs: Option<u64>,
    pub heartbeat_interval_secs: Option<u64>,
    pub agent_executable: Option<String>,
    pub agent_args: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct DiscoveryConfig {
    pub executable: Option<String>,
    pub projects_dir: Option<String>,
    pub runtime_dir: Option<String>,
    pub cache_ttl_secs: Option<u64>,
    pub connection_timeout_secs: Option<u64>,
    pub sync_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct EscalationConfig {
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct DatabaseConfig {
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orchestra_config_default() {
        let config = OrchestraConfig::default();
        assert!(config.queue.is_none());
        assert!(config.circuit_breaker.is_none());
        assert!(config.server.is_none());
    }

    #[test]
    fn test_partial_yaml_deserializes() {
        let yaml = "
circuit_breaker:
  failure_threshold: 3
health:
  agent_timeout_secs: 120
";
        let config: OrchestraConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.circuit_breaker.unwrap().failure_threshold, Some(3));
        let health = config.health.unwrap();
        assert_eq!(health.agent_timeout_secs, Some(120));
        assert!(health.recovery_window_secs.is_none());
    }
}
