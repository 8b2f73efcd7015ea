use crate::config::CircuitBreakerSettings;
use crate::error::AppError;
use crate::observability::metrics::CIRCUIT_BREAKER_STATE;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// The current state of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests pass through; consecutive failures are counted
    Closed,
    /// Requests are rejected immediately until the timeout elapses
    Open,
    /// A bounded number of probe requests test backend recovery
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding: 0=closed, 1=half-open, 2=open
    fn to_metric_value(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Errors returned by [`CircuitBreaker::call`]
#[derive(Debug, thiserror::Error)]
pub enum BreakerError {
    /// The circuit rejected the request without invoking the operation
    #[error("circuit breaker '{0}' is open")]
    Open(String),

    /// The operation ran and failed; the original error is preserved
    #[error(transparent)]
    Inner(AppError),
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<DateTime<Utc>>,
    half_open_admitted: u32,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            half_open_admitted: 0,
        }
    }
}

/// Per-backend circuit breaker cycling through closed, open, and half-open.
///
/// The breaker wraps an async operation returning `Result<T, AppError>` and
/// either returns the value, the operation's own error, or an immediate
/// rejection while open.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    timeout: Duration,
    max_requests: u32,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, cfg: &CircuitBreakerSettings) -> Self {
        let name = name.into();
        CIRCUIT_BREAKER_STATE
            .with_label_values(&[&name])
            .set(CircuitState::Closed.to_metric_value());

        Self {
            name,
            failure_threshold: cfg.failure_threshold.max(1),
            timeout: cfg.timeout(),
            max_requests: cfg.max_requests.max(1),
            state: Mutex::new(BreakerState::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Execute an operation under the breaker
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        self.admit()?;

        match f().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(BreakerError::Inner(err))
            }
        }
    }

    fn admit(&self) -> Result<(), BreakerError> {
        let mut state = self.state.lock();

        // Open circuits transition to half-open once the timeout elapses
        if state.state == CircuitState::Open {
            let elapsed = state
                .opened_at
                .map(|t| Utc::now().signed_duration_since(t))
                .map(|d| d.num_milliseconds().max(0) as u128)
                .unwrap_or(0);
            if elapsed >= self.timeout.as_millis() {
                self.transition(&mut state, CircuitState::HalfOpen);
            }
        }

        match state.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => Err(BreakerError::Open(self.name.clone())),
            CircuitState::HalfOpen => {
                if state.half_open_admitted >= self.max_requests {
                    Err(BreakerError::Open(self.name.clone()))
                } else {
                    state.half_open_admitted += 1;
                    Ok(())
                }
            }
        }
    }

    fn on_success(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures = 0;
        state.consecutive_successes += 1;

        if state.state == CircuitState::HalfOpen
            && state.consecutive_successes >= self.max_requests
        {
            self.transition(&mut state, CircuitState::Closed);
        }
    }

    fn on_failure(&self) {
        let mut state = self.state.lock();
        state.consecutive_successes = 0;
        state.consecutive_failures += 1;

        match state.state {
            CircuitState::Closed if state.consecutive_failures >= self.failure_threshold => {
                self.transition(&mut state, CircuitState::Open);
            }
            // Any probe failure re-opens
            CircuitState::HalfOpen => {
                self.transition(&mut state, CircuitState::Open);
            }
            _ => {}
        }
    }

    fn transition(&self, state: &mut BreakerState, to: CircuitState) {
        let from = state.state;
        state.state = to;
        match to {
            CircuitState::Open => {
                state.opened_at = Some(Utc::now());
            }
            CircuitState::HalfOpen => {
                state.half_open_admitted = 0;
                state.consecutive_successes = 0;
            }
            CircuitState::Closed => {
                state.opened_at = None;
                state.consecutive_failures = 0;
                state.consecutive_successes = 0;
            }
        }

        warn!(
            name = %self.name,
            from = %from,
            to = %to,
            "circuit breaker state change"
        );
        CIRCUIT_BREAKER_STATE
            .with_label_values(&[&self.name])
            .set(to.to_metric_value());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(failure_threshold: u32, timeout_secs: u64, max_requests: u32) -> CircuitBreakerSettings {
        CircuitBreakerSettings {
            failure_threshold,
            timeout_secs,
            max_requests,
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<u32, BreakerError> {
        breaker
            .call(|| async { Err::<u32, _>(AppError::Transient("boom".into())) })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<u32, BreakerError> {
        breaker.call(|| async { Ok::<_, AppError>(42) }).await
    }

    #[tokio::test]
    async fn test_starts_closed_and_passes_through() {
        let breaker = CircuitBreaker::new("t-closed", &settings(3, 30, 2));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(succeed(&breaker).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_preserves_operation_error() {
        let breaker = CircuitBreaker::new("t-err", &settings(3, 30, 2));
        let err = fail(&breaker).await.unwrap_err();
        assert!(matches!(err, BreakerError::Inner(AppError::Transient(_))));
    }

    #[tokio::test]
    async fn test_opens_after_consecutive_failures() {
        let breaker = CircuitBreaker::new("t-open", &settings(3, 30, 2));
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // Rejected without running the operation
        let err = succeed(&breaker).await.unwrap_err();
        assert!(matches!(err, BreakerError::Open(_)));
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new("t-reset", &settings(3, 30, 2));
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        let _ = succeed(&breaker).await;
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_probe_failure_reopens() {
        let breaker = CircuitBreaker::new("t-probe-fail", &settings(2, 0, 2));
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        // Zero timeout: next admit moves to half-open and admits the probe,
        // whose failure re-opens the circuit.
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_half_open_probe_successes_close() {
        let breaker = CircuitBreaker::new("t-probe-ok", &settings(2, 0, 2));
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let _ = succeed(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        let _ = succeed(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_bounds_probe_count() {
        let breaker = CircuitBreaker::new("t-probe-bound", &settings(1, 0, 1));
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        // First probe admitted and closes the circuit (max_requests = 1)
        let _ = succeed(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
