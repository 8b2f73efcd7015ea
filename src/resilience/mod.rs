//! Resilience primitives shared by the backend clients: a per-backend circuit
//! breaker and cancellation-aware retry with exponential backoff.

mod circuit_breaker;
mod retry;

pub use circuit_breaker::{BreakerError, CircuitBreaker, CircuitState};
pub use retry::{retry, RetryError};
