pub mod circuit_breaker;
pub mod retry;
pub mod escalation;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerSettings, CircuitState};
pub use escalation::{EscalationAlert, EscalationChannel, EscalationNotifier, LogChannel, WebhookChannel};
pub use retry::{with_retry, RetryPolicy};

use std::future::Future;
use std::sync::Arc;

use crate::errors::OrchestraError;

/// Retry outside, breaker inside: every attempt passes through the breaker,
/// so a circuit that opens mid-loop ends the retries.
#[derive(Debug, Clone)]
pub struct ResiliencePolicy {
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl ResiliencePolicy {
    pub fn new(name: &str, breaker: CircuitBreakerSettings, retry: RetryPolicy) -> Self {
        Self {
            breaker: Arc::new(CircuitBreaker::new(name, breaker)),
            retry,
        }
    }

    pub async fn execute<F, Fut, T>(&self, operation_name: &str, mut factory: F) -> Result<T, OrchestraError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OrchestraError>>,
    {
        let breaker = self.breaker.as_ref();
        with_retry(operation_name, &self.retry, move || breaker.call(factory())).await
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }
}
