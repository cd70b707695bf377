use serde_json::{json, Value};
use std::sync::LazyLock;

pub static CONFIG_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "properties": {
            "queue": {
                "type": "object",
                "properties": {
                    "poll_interval_secs": { "type": "integer", "minimum": 1 },
                    "job_expiration_secs": { "type": "integer", "minimum": 1 },
                    "max_attempts": { "type": "integer", "minimum": 1 },
                    "agent_retry_delay_secs": { "type": "integer", "minimum": 0 },
                    "backoff_base_secs": { "type": "integer", "minimum": 0 },
                    "backoff_max_secs": { "type": "integer", "minimum": 0 }
                },
                "additionalProperties": false
            },
            "health": {
                "type": "object",
                "properties": {
                    "check_interval_secs": { "type": "integer", "minimum": 1 },
                    "agent_timeout_secs": { "type": "integer", "minimum": 1 },
                    "recovery_window_secs": { "type": "integer", "minimum": 0 }
                },
                "additionalProperties": false
            },
            "circuit_breaker": {
                "type": "object",
                "properties": {
                    "failure_threshold": { "type": "integer", "minimum": 1 },
                    "failure_rate_threshold": { "type": "number", "exclusiveMinimum": 0, "maximum": 1 },
                    "minimum_throughput": { "type": "integer", "minimum": 1 },
                    "sampling_window_secs": { "type": "integer", "minimum": 1 },
                    "break_duration_secs": { "type": "integer", "minimum": 1 }
                },
                "additionalProperties": false
            },
            "retry": {
                "type": "object",
                "properties": {
                    "max_retries": { "type": "integer", "minimum": 0 },
                    "base_delay_ms": { "type": "integer", "minimum": 0 },
                    "max_delay_ms": { "type": "integer", "minimum": 0 },
                    "jitter": { "type": "boolean" },
                    "retry_on": { "type": "array", "items": { "type": "string" } }
                },
                "additionalProperties": false
            },
            "execution": {
                "type": "object",
                "properties": {
                    "timeout_secs": { "type": "integer", "minimum": 1 },
                    "heartbeat_interval_secs": { "type": "integer", "minimum": 1 },
                    "agent_executable": { "type": "string" },
                    "agent_args": { "type": "array", "items": { "type": "string" } }
                }
            },
            "discovery": {
                "type": "object",
                "properties": {
                    "executable": { "type": "string" },
                    "projects_dir": { "type": "string" },
                    "runtime_dir": { "type": "string" },
                    "cache_ttl_secs": { "type": "integer", "minimum": 0 },
                    "connection_timeout_secs": { "type": "integer", "minimum": 1 },
                    "sync_interval_secs": { "type": "integer", "minimum": 1 }
                }
            },
            "escalation": {
                "type": "object",
                "properties": {
                    "webhook_url": { "type": "string", "format": "uri" }
                }
            },
            "database": {
                "type": "object",
                "properties": {
                    "path": { "type": "string" }
                }
            },
            "server": {
                "type": "object",
                "properties": {
                    "host": { "type": "string" },
                    "port": { "type": "integer", "minimum": 1, "maximum": 65535 }
                }
            }
        }
    })
});
