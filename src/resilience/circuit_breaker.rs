use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::errors::OrchestraError;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_FAILURE_RATE_THRESHOLD: f64 = 0.5;
pub const DEFAULT_MINIMUM_THROUGHPUT: u32 = 10;
pub const DEFAULT_SAMPLING_WINDOW_SECS: u64 = 60;
pub const DEFAULT_BREAK_DURATION_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Failure ratio within the sampling window that opens the circuit.
    pub failure_rate_threshold: f64,
    /// Calls required in the window before the ratio is considered.
    pub minimum_throughput: u32,
    pub sampling_window: Duration,
    pub break_duration: Duration,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            failure_rate_threshold: DEFAULT_FAILURE_RATE_THRESHOLD,
            minimum_throughput: DEFAULT_MINIMUM_THROUGHPUT,
            sampling_window: Duration::from_secs(DEFAULT_SAMPLING_WINDOW_SECS),
            break_duration: Duration::from_secs(DEFAULT_BREAK_DURATION_SECS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
    /// Forced open by an operator; only `reset` leaves this state.
    Isolated,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub window_calls: usize,
    pub window_failure_rate: f64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    /// (when, failed) for calls inside the sampling window.
    samples: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

enum Permit {
    Normal,
    Trial,
}

/// Protects one call-site. State lives behind a std mutex that is never held
/// across an await, so concurrent callers see atomic transitions.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: CircuitBreakerSettings,
    inner: Mutex<BreakerInner>,
}

/// Releases a half-open trial slot if the trial future is dropped before it
/// reports an outcome.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = self.breaker.lock();
            inner.trial_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: &str, settings: CircuitBreakerSettings) -> Self {
        Self {
            name: name.to_string(),
            settings,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                samples: VecDeque::new(),
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        // A poisoned breaker still holds consistent counters.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Run `operation` under the breaker. While open the future is dropped
    /// without being polled.
    pub async fn call<Fut, T>(&self, operation: Fut) -> Result<T, OrchestraError>
    where
        Fut: Future<Output = Result<T, OrchestraError>>,
    {
        let permit = self.try_acquire()?;
        let mut guard = TrialGuard {
            breaker: self,
            armed: matches!(permit, Permit::Trial),
        };

        let result = operation.await;
        guard.armed = false;

        match &result {
            Err(e) if counts_as_failure(e) => self.on_failure(permit, e),
            _ => self.on_success(permit),
        }
        result
    }

    fn try_acquire(&self) -> Result<Permit, OrchestraError> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(Permit::Normal),
            CircuitState::Isolated => Err(OrchestraError::CircuitBreakerOpen(self.name.clone())),
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or(Duration::MAX);
                if elapsed >= self.settings.break_duration {
                    info!(breaker = %self.name, "Circuit half-open, allowing trial call");
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    Ok(Permit::Trial)
                } else {
                    Err(OrchestraError::CircuitBreakerOpen(self.name.clone()))
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(OrchestraError::CircuitBreakerOpen(self.name.clone()))
                } else {
                    inner.trial_in_flight = true;
                    Ok(Permit::Trial)
                }
            }
        }
    }

    fn on_success(&self, permit: Permit) {
        let mut inner = self.lock();
        match permit {
            Permit::Trial => {
                inner.trial_in_flight = false;
                if inner.state == CircuitState::HalfOpen {
                    info!(breaker = %self.name, "Trial call succeeded, circuit closed");
                    Self::close(&mut inner);
                }
            }
            Permit::Normal => {
                inner.consecutive_failures = 0;
                self.record_sample(&mut inner, false);
            }
        }
    }

    fn on_failure(&self, permit: Permit, error: &OrchestraError) {
        let mut inner = self.lock();
        match permit {
            Permit::Trial => {
                inner.trial_in_flight = false;
                if inner.state == CircuitState::HalfOpen {
                    warn!(breaker = %self.name, error = %error, "Trial call failed, circuit re-opened");
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            Permit::Normal => {
                inner.consecutive_failures += 1;
                self.record_sample(&mut inner, true);
                if inner.state != CircuitState::Closed {
                    return;
                }

                let (calls, rate) = window_stats(&inner.samples);
                let consecutive_tripped = inner.consecutive_failures >= self.settings.failure_threshold;
                let rate_tripped = calls >= self.settings.minimum_throughput as usize
                    && rate >= self.settings.failure_rate_threshold;

                if consecutive_tripped || rate_tripped {
                    warn!(
                        breaker = %self.name,
                        consecutive_failures = inner.consecutive_failures,
                        window_calls = calls,
                        failure_rate = rate,
                        break_secs = self.settings.break_duration.as_secs(),
                        error = %error,
                        "Circuit opened"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
        }
    }

    fn record_sample(&self, inner: &mut BreakerInner, failed: bool) {
        let now = Instant::now();
        inner.samples.push_back((now, failed));
        while let Some(&(at, _)) = inner.samples.front() {
            if now.duration_since(at) > self.settings.sampling_window {
                inner.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn close(inner: &mut BreakerInner) {
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.samples.clear();
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    /// Current state as a caller would experience it; an open circuit whose
    /// break has elapsed reads as half-open.
    pub fn state(&self) -> CircuitState {
        let inner = self.lock();
        match inner.state {
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or(Duration::MAX);
                if elapsed >= self.settings.break_duration {
                    CircuitState::HalfOpen
                } else {
                    CircuitState::Open
                }
            }
            other => other,
        }
    }

    /// Force the circuit open until [`reset`](Self::reset).
    pub fn isolate(&self) {
        let mut inner = self.lock();
        warn!(breaker = %self.name, "Circuit manually isolated");
        inner.state = CircuitState::Isolated;
        inner.trial_in_flight = false;
    }

    pub fn reset(&self) {
        let mut inner = self.lock();
        info!(breaker = %self.name, "Circuit manually reset");
        Self::close(&mut inner);
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state();
        let inner = self.lock();
        let (window_calls, window_failure_rate) = window_stats(&inner.samples);
        BreakerSnapshot {
            name: self.name.clone(),
            state,
            consecutive_failures: inner.consecutive_failures,
            window_calls,
            window_failure_rate,
        }
    }
}

fn window_stats(samples: &VecDeque<(Instant, bool)>) -> (usize, f64) {
    let calls = samples.len();
    if calls == 0 {
        return (0, 0.0);
    }
    let failures = samples.iter().filter(|(_, failed)| *failed).count();
    (calls, failures as f64 / calls as f64)
}

/// Failures that say something about the health of the dependency. An agent
/// that ran and reported a failed command, or a rejected request, is healthy.
fn counts_as_failure(error: &OrchestraError) -> bool {
    matches!(
        error,
        OrchestraError::AgentConnection(_)
            | OrchestraError::TaskTimeout { .. }
            | OrchestraError::Notification(_)
            | OrchestraError::Database(_)
            | OrchestraError::Unexpected(_)
            | OrchestraError::Io(_)
    )
}
