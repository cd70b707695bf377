//! Human-facing alerts for failures automation could not recover from.
//!
//! Escalation goes through its own breaker+retry policy and never returns an
//! error to the caller: when the channel is down the alert is written to the
//! local log instead.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::errors::OrchestraError;
use super::ResiliencePolicy;

#[derive(Debug, Clone, Serialize)]
pub struct EscalationAlert {
    pub task_id: Option<String>,
    pub agent_id: Option<String>,
    pub error_type: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl EscalationAlert {
    pub fn for_error(task_id: Option<&str>, agent_id: Option<&str>, error: &OrchestraError) -> Self {
        Self {
            task_id: task_id.map(String::from),
            agent_id: agent_id.map(String::from),
            error_type: error.classify().error_type.to_string(),
            message: error.to_string(),
            occurred_at: Utc::now(),
        }
    }

    pub fn render(&self) -> String {
        format!(
            "[orchestra] {} on task {} (agent {}): {}",
            self.error_type,
            self.task_id.as_deref().unwrap_or("-"),
            self.agent_id.as_deref().unwrap_or("-"),
            self.message,
        )
    }
}

#[async_trait]
pub trait EscalationChannel: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, alert: &EscalationAlert) -> Result<(), OrchestraError>;
}

/// Posts the alert as JSON to an operator webhook (chat bridge, pager, ...).
pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl EscalationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, alert: &EscalationAlert) -> Result<(), OrchestraError> {
        let body = serde_json::json!({
            "text": alert.render(),
            "alert": alert,
        });
        let response = self.client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| OrchestraError::Notification(format!("Webhook request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(OrchestraError::Notification(format!(
                "Webhook returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Used when no operator channel is configured.
pub struct LogChannel;

#[async_trait]
impl EscalationChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, alert: &EscalationAlert) -> Result<(), OrchestraError> {
        error!(
            task_id = alert.task_id.as_deref().unwrap_or("-"),
            agent_id = alert.agent_id.as_deref().unwrap_or("-"),
            error_type = %alert.error_type,
            "ESCALATION: {}",
            alert.message
        );
        Ok(())
    }
}

pub struct EscalationNotifier {
    channel: Arc<dyn EscalationChannel>,
    policy: ResiliencePolicy,
    delivered: AtomicU64,
    fallbacks: AtomicU64,
}

impl EscalationNotifier {
    pub fn new(channel: Arc<dyn EscalationChannel>, policy: ResiliencePolicy) -> Self {
        Self {
            channel,
            policy,
            delivered: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
        }
    }

    pub async fn escalate(&self, alert: EscalationAlert) {
        let channel = self.channel.as_ref();
        let pending = &alert;
        let result = self.policy
            .execute("escalation", move || channel.send(pending))
            .await;

        match result {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                info!(channel = self.channel.name(), error_type = %alert.error_type, "Escalation delivered");
            }
            Err(e) => {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                error!(
                    channel = self.channel.name(),
                    channel_error = %e,
                    task_id = alert.task_id.as_deref().unwrap_or("-"),
                    agent_id = alert.agent_id.as_deref().unwrap_or("-"),
                    error_type = %alert.error_type,
                    occurred_at = %alert.occurred_at.to_rfc3339(),
                    "Escalation channel failed, alert logged locally: {}",
                    alert.message
                );
            }
        }
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    pub fn policy(&self) -> &ResiliencePolicy {
        &self.policy
    }
}
