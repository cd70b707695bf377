use std::time::Duration;

use super::types::OrchestraError;

/// What the job scheduler should do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    /// Expected to clear on its own; retry after a fixed delay.
    Retry,
    /// Infrastructure hiccup; retry with exponential backoff.
    RetryWithBackoff,
    /// Never retried.
    Terminal,
}

#[derive(Debug, Clone)]
pub struct ErrorClassification {
    pub error_type: &'static str,
    pub disposition: RetryDisposition,
}

impl ErrorClassification {
    pub fn retryable(&self) -> bool {
        self.disposition != RetryDisposition::Terminal
    }

    /// Delay before the next scheduler attempt (0-indexed).
    ///
    /// - Retry: the fixed `base` delay
    /// - RetryWithBackoff: `base * 2^attempt` plus up to 1s jitter, capped at `max`
    /// - Terminal: zero
    pub fn retry_delay(&self, attempt: u32, base: Duration, max: Duration) -> Duration {
        match self.disposition {
            RetryDisposition::Retry => base.min(max),
            RetryDisposition::RetryWithBackoff => {
                let factor = 2f64.powi(attempt.min(16) as i32);
                let jitter: f64 = rand::random::<f64>();
                let secs = (base.as_secs_f64() * factor + jitter).min(max.as_secs_f64());
                Duration::from_secs_f64(secs)
            }
            RetryDisposition::Terminal => Duration::ZERO,
        }
    }
}

impl OrchestraError {
    /// Classify this error to determine its type and how the scheduler treats it.
    pub fn classify(&self) -> ErrorClassification {
        use RetryDisposition::*;
        let (error_type, disposition) = match self {
            OrchestraError::AgentUnavailable(_) => ("AgentUnavailableError", Retry),
            OrchestraError::Database(_) => ("DatabaseError", RetryWithBackoff),

            OrchestraError::TaskTimeout { .. } => ("TaskTimeoutError", Terminal),
            OrchestraError::CommandExecution(_) => ("CommandExecutionError", Terminal),
            OrchestraError::RepositoryAccess(_) => ("RepositoryAccessError", Terminal),
            OrchestraError::Unexpected(_) => ("UnexpectedError", Terminal),
            OrchestraError::CircuitBreakerOpen(_) => ("CircuitBreakerOpenError", Terminal),
            // Transient for call-site retry policies, but by the time it reaches
            // the scheduler those retries are already spent.
            OrchestraError::AgentConnection(_) => ("AgentConnectionError", Terminal),
            OrchestraError::Notification(_) => ("NotificationError", Terminal),
            OrchestraError::Cancelled(_) => ("CancelledError", Terminal),
            OrchestraError::Validation(_) => ("ValidationError", Terminal),
            OrchestraError::NotFound(_) => ("NotFoundError", Terminal),
            OrchestraError::Config(_) => ("ConfigError", Terminal),
            OrchestraError::Io(_) => ("IoError", Terminal),
            OrchestraError::Json(_) => ("JsonError", Terminal),
            OrchestraError::Yaml(_) => ("YamlError", Terminal),
        };
        ErrorClassification { error_type, disposition }
    }

    /// True for outcomes the pipeline reports as a failed task rather than
    /// handing back to the scheduler.
    pub fn is_terminal(&self) -> bool {
        !self.classify().retryable()
    }

    /// Errors that mean automated recovery has run out and a human should look.
    pub fn needs_escalation(&self) -> bool {
        matches!(
            self,
            OrchestraError::TaskTimeout { .. }
                | OrchestraError::CircuitBreakerOpen(_)
                | OrchestraError::AgentConnection(_)
                | OrchestraError::Unexpected(_)
        )
    }
}
