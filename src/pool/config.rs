//! Pool sizing, timeout and retry configuration

use std::time::Duration;

use crate::resilience::{BackoffConfig, CircuitBreakerConfig};

/// Runtime configuration of a single backend pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Upper bound on available + checked-out sessions
    pub max_size: usize,
    /// Sessions the maintenance task keeps open while idle
    pub min_idle: usize,
    /// Default wait used when a caller does not pass its own timeout
    pub acquire_timeout: Duration,
    /// Bound on establishing a session outside of `acquire` (replenish)
    pub connect_timeout: Duration,
    /// Idle sessions older than this are reaped
    pub idle_timeout: Duration,
    /// Idle sessions older than this are probed before reuse
    pub liveness_threshold: Duration,
    /// Sessions are recycled after this age regardless of activity
    pub max_lifetime: Duration,
    /// Retries after the first failed establishment (transient errors only)
    pub connect_retries: u32,
    pub backoff: BackoffConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            min_idle: 0,
            acquire_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(600),
            liveness_threshold: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(1800),
            connect_retries: 3,
            backoff: BackoffConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl PoolConfig {
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    pub fn with_min_idle(mut self, size: usize) -> Self {
        self.min_idle = size;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_liveness_threshold(mut self, threshold: Duration) -> Self {
        self.liveness_threshold = threshold;
        self
    }

    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    pub fn with_connect_retries(mut self, retries: u32) -> Self {
        self.connect_retries = retries;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }
}
