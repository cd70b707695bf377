use std::path::Path;
use crate::errors::OrchestraError;
use super::types::OrchestraConfig;
use super::schema::CONFIG_SCHEMA;
use tracing::warn;

pub async fn parse_config(path: &Path) -> Result<OrchestraConfig, OrchestraError> {
    if !path.exists() {
        return Err(OrchestraError::Config(format!("Config file not found: {}", path.display())));
    }

    let metadata = tokio::fs::metadata(path).await?;
    if metadata.len() > 1_048_576 {
        return Err(OrchestraError::Config("Config file exceeds 1MB limit".into()));
    }

    let content = tokio::fs::read_to_string(path).await?;
    parse_config_str(&content)
}

pub fn parse_config_str(content: &str) -> Result<OrchestraConfig, OrchestraError> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(content)?;

    // An empty file is a valid, all-defaults config
    if yaml.is_null() {
        return Ok(OrchestraConfig::default());
    }

    validate_schema(&yaml)?;

    let config: OrchestraConfig = serde_yaml::from_value(yaml)?;

    validate_semantics(&config)?;

    Ok(config)
}

/// Validate config against the JSON schema for structural correctness.
fn validate_schema(yaml: &serde_yaml::Value) -> Result<(), OrchestraError> {
    let json_value = serde_json::to_value(yaml)
        .map_err(|e| OrchestraError::Config(format!("Config conversion error: {}", e)))?;

    let compiled = jsonschema::JSONSchema::compile(&CONFIG_SCHEMA)
        .map_err(|e| OrchestraError::Config(format!("Schema compilation error: {}", e)))?;

    let result = compiled.validate(&json_value);
    if let Err(errors) = result {
        // Advisory only: serde and the semantic checks below are authoritative
        for e in errors {
            warn!(validation_error = %e, path = %e.instance_path, "Config schema warning");
        }
    }

    Ok(())
}

/// Reject values that deserialize fine but make no sense at runtime.
fn validate_semantics(config: &OrchestraConfig) -> Result<(), OrchestraError> {
    if let Some(cb) = &config.circuit_breaker {
        if let Some(rate) = cb.failure_rate_threshold {
            if !(rate > 0.0 && rate <= 1.0) {
                return Err(OrchestraError::Config(format!(
                    "circuit_breaker.failure_rate_threshold must be in (0, 1], got {}",
                    rate
                )));
            }
        }
        if cb.failure_threshold == Some(0) {
            return Err(OrchestraError::Config("circuit_breaker.failure_threshold must be at least 1".into()));
        }
        if cb.break_duration_secs == Some(0) {
            return Err(OrchestraError::Config("circuit_breaker.break_duration_secs must be positive".into()));
        }
    }

    if let Some(retry) = &config.retry {
        if let (Some(base), Some(max)) = (retry.base_delay_ms, retry.max_delay_ms) {
            if max < base {
                return Err(OrchestraError::Config(format!(
                    "retry.max_delay_ms ({}) is below retry.base_delay_ms ({})",
                    max, base
                )));
            }
        }
    }

    if let Some(queue) = &config.queue {
        if queue.max_attempts == Some(0) {
            return Err(OrchestraError::Config("queue.max_attempts must be at least 1".into()));
        }
        if queue.poll_interval_secs == Some(0) {
            return Err(OrchestraError::Config("queue.poll_interval_secs must be positive".into()));
        }
    }

    if let Some(health) = &config.health {
        if health.check_interval_secs == Some(0) {
            return Err(OrchestraError::Config("health.check_interval_secs must be positive".into()));
        }
    }

    if let Some(exec) = &config.execution {
        if exec.timeout_secs == Some(0) {
            return Err(OrchestraError::Config("execution.timeout_secs must be positive".into()));
        }
        if exec.heartbeat_interval_secs == Some(0) {
            return Err(OrchestraError::Config("execution.heartbeat_interval_secs must be positive".into()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{CircuitBreakerConfig, RetryConfig};

    #[test]
    fn test_empty_config_is_valid() {
        let config = parse_config_str("").unwrap();
        assert!(config.queue.is_none());
    }

    #[test]
    fn test_rate_threshold_out_of_range() {
        let config = OrchestraConfig {
            circuit_breaker: Some(CircuitBreakerConfig {
                failure_rate_threshold: Some(1.5),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(validate_semantics(&config).is_err());
    }

    #[test]
    fn test_retry_bounds_inverted() {
        let config = OrchestraConfig {
            retry: Some(RetryConfig {
                base_delay_ms: Some(5000),
                max_delay_ms: Some(100),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(validate_semantics(&config).is_err());
    }

    #[test]
    fn test_full_yaml_parses() {
        let yaml = "
queue:
  poll_interval_secs: 5
circuit_breaker:
  failure_threshold: 4
  failure_rate_threshold: 0.25
retry:
  max_retries: 2
  jitter: false
execution:
  timeout_secs: 600
";
        let config = parse_config_str(yaml).unwrap();
        assert_eq!(config.queue.unwrap().poll_interval_secs, Some(5));
        assert_eq!(config.retry.unwrap().jitter, Some(false));
    }

    #[test]
    fn test_malformed_yaml_is_error() {
        assert!(matches!(parse_config_str("queue: [unclosed"), Err(OrchestraError::Yaml(_))));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let result = parse_config(Path::new("/definitely/not/here.yaml")).await;
        assert!(matches!(result, Err(OrchestraError::Config(_))));
    }
}
