//! Exponential backoff between connection attempts

use std::time::Duration;

use rand::Rng;

/// Exponential backoff configuration
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier applied after every attempt
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 50,
            max_delay_ms: 2_000,
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Exponential backoff calculator with jitter.
///
/// The first call to [`next_delay`](Self::next_delay) returns roughly
/// `initial_delay_ms`; every following call multiplies the previous delay.
///
/// The pool creates a fresh instance for every connection establishment.
pub struct ExponentialBackoff {
    config: BackoffConfig,
    next_base_ms: f64,
}

impl ExponentialBackoff {
    /// Create a backoff with the default retry delays
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    /// Create a backoff with custom retry delays
    pub fn with_config(config: BackoffConfig) -> Self {
        let initial = config.initial_delay_ms as f64;
        Self {
            config,
            next_base_ms: initial,
        }
    }

    /// Delay to sleep before the next retry, jittered around the current base
    pub fn next_delay(&mut self) -> Duration {
        let capped = self.next_base_ms.min(self.config.max_delay_ms as f64);
        self.next_base_ms = capped * self.config.multiplier;

        let jitter_range = capped * self.config.jitter_factor;
        let delay = if jitter_range > 0.0 {
            let jitter = rand::rng().random_range(-jitter_range..jitter_range);
            (capped + jitter).max(1.0)
        } else {
            capped.max(1.0)
        };

        Duration::from_millis(delay as u64)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}
