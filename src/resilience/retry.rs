use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::errors::OrchestraError;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;

/// Call-site retry behaviour for outbound calls to agents and humans.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
    /// Error types (as reported by `classify`) worth another attempt.
    pub retry_on: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            jitter: true,
            retry_on: default_retry_on(),
        }
    }
}

pub fn default_retry_on() -> Vec<String> {
    vec!["AgentConnectionError".to_string(), "NotificationError".to_string()]
}

impl RetryPolicy {
    pub fn no_retries() -> Self {
        Self { max_retries: 0, ..Default::default() }
    }

    /// An open circuit is never retried, whatever the allow-list says.
    pub fn should_retry(&self, error: &OrchestraError) -> bool {
        if matches!(error, OrchestraError::CircuitBreakerOpen(_)) {
            return false;
        }
        let error_type = error.classify().error_type;
        self.retry_on.iter().any(|t| t == error_type)
    }

    /// `base * 2^attempt`, optionally stretched by up to 50% jitter, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(2u32.saturating_pow(attempt.min(16)));
        let delay = if self.jitter {
            exp.mul_f64(1.0 + rand::random::<f64>() * 0.5)
        } else {
            exp
        };
        delay.min(self.max_delay)
    }
}

/// Execute an async operation with retry logic.
///
/// Retries only errors on the policy's allow-list, up to `max_retries`
/// additional attempts.
pub async fn with_retry<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut factory: F,
) -> Result<T, OrchestraError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OrchestraError>>,
{
    let max_attempts = policy.max_retries + 1;
    let mut attempt = 0u32;

    loop {
        match factory().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                attempt += 1;
                if !policy.should_retry(&e) {
                    warn!(
                        operation = operation_name,
                        error_type = e.classify().error_type,
                        error = %e,
                        "Non-retryable error, failing immediately"
                    );
                    return Err(e);
                }
                if attempt >= max_attempts {
                    warn!(
                        operation = operation_name,
                        attempt,
                        max = max_attempts,
                        error = %e,
                        "Max retries exhausted"
                    );
                    return Err(e);
                }

                let delay = policy.delay_for(attempt - 1);
                warn!(
                    operation = operation_name,
                    attempt,
                    max = max_attempts,
                    error_type = e.classify().error_type,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after error"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter: false,
            retry_on: default_retry_on(),
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let p = policy(3);
        assert_eq!(p.delay_for(0), Duration::from_millis(100));
        assert_eq!(p.delay_for(1), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(800));
        assert_eq!(p.delay_for(4), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let p = RetryPolicy { jitter: true, ..policy(3) };
        for _ in 0..50 {
            let d = p.delay_for(1);
            assert!(d >= Duration::from_millis(200) && d <= Duration::from_millis(300));
        }
    }

    #[test]
    fn test_allow_list() {
        let p = policy(3);
        assert!(p.should_retry(&OrchestraError::AgentConnection("reset".into())));
        assert!(!p.should_retry(&OrchestraError::Validation("bad".into())));
        assert!(!p.should_retry(&OrchestraError::CommandExecution("exit 1".into())));
        assert!(!p.should_retry(&OrchestraError::CircuitBreakerOpen("agent".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flaky_operation_succeeds_after_m_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let m = 2;
        let result = with_retry("flaky", &policy(3), || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < m {
                    Err(OrchestraError::AgentConnection("refused".into()))
                } else {
                    Ok(n)
                }
            }
        }).await;
        assert_eq!(result.unwrap(), m);
        assert_eq!(calls.load(Ordering::SeqCst), m + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_makes_max_plus_one_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = with_retry("down", &policy(3), || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(OrchestraError::AgentConnection("refused".into()))
            }
        }).await;
        assert!(matches!(result, Err(OrchestraError::AgentConnection(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = with_retry("validate", &policy(3), || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(OrchestraError::Validation("empty command".into()))
            }
        }).await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retries_policy() {
        let calls = Arc::new(AtomicU32::new(0));
        let _ = with_retry("once", &RetryPolicy::no_retries(), || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(OrchestraError::AgentConnection("refused".into()))
            }
        }).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
