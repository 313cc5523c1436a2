//! Resilience primitives shared by every backend pool.
//!
//! - `ExponentialBackoff`: delays between connection establishment retries
//! - `CircuitBreaker`: fails fast while a backend keeps refusing connections

mod backoff;
mod circuit_breaker;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};

/// Get current time in milliseconds since epoch
pub(crate) fn current_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
