//! Circuit breaker guarding connection establishment for one backend

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};

use serde::Serialize;

use super::current_time_ms;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CircuitState {
    /// New connections may be opened
    Closed = 0,
    /// Backend considered down, no new connections are attempted
    Open = 1,
    /// One trial connection at a time is let through
    HalfOpen = 2,
}

impl CircuitState {
    /// Label used in metrics and JSON
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failed establishments before opening the circuit
    pub failure_threshold: u32,
    /// Successful trials in half-open state before closing
    pub success_threshold: u32,
    /// Time to wait before transitioning from open to half-open (ms).
    /// Also bounds how long an unanswered trial blocks the next one.
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout_ms: 30_000,
        }
    }
}

/// Lock-free circuit breaker.
///
/// Only connection establishment feeds it; reusing an idle session never
/// consults the breaker, so callers keep working off warm sessions while a
/// backend refuses new ones. In half-open state a single caller holds the
/// trial slot until it reports an outcome; everyone else is refused.
pub struct CircuitBreaker {
    state: AtomicU8,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    /// Timestamp of last state change (ms since epoch)
    last_state_change: AtomicI64,
    /// When the half-open trial in flight was claimed (ms since epoch), 0 if none
    trial_started: AtomicI64,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a breaker with the default thresholds
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Create a breaker with custom thresholds
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            last_state_change: AtomicI64::new(current_time_ms()),
            trial_started: AtomicI64::new(0),
            config,
        }
    }

    /// Current state, moving Open to HalfOpen once the reset timeout passed
    pub fn state(&self) -> CircuitState {
        self.check_state_transition();
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Whether a new connection attempt may start.
    ///
    /// In half-open state this claims the trial slot; the caller must follow
    /// up with [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure).
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => self.claim_trial(),
        }
    }

    /// Record a successful establishment
    pub fn record_success(&self) {
        self.trial_started.store(0, Ordering::Release);
        match CircuitState::from(self.state.load(Ordering::Acquire)) {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Release);
            }
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.config.success_threshold {
                    self.transition_to(CircuitState::Closed);
                    tracing::info!(successes, "Circuit breaker closed, backend accepting connections again");
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed establishment (after retries were exhausted)
    pub fn record_failure(&self) {
        self.trial_started.store(0, Ordering::Release);
        match CircuitState::from(self.state.load(Ordering::Acquire)) {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.config.failure_threshold {
                    self.transition_to(CircuitState::Open);
                    tracing::warn!(failures, "Circuit breaker opened, backend refusing connections");
                }
            }
            CircuitState::HalfOpen => {
                self.transition_to(CircuitState::Open);
                tracing::warn!("Trial connection failed, circuit breaker reopened");
            }
            CircuitState::Open => {
                self.last_state_change
                    .store(current_time_ms(), Ordering::Release);
            }
        }
    }

    /// Take the half-open trial slot. A trial that never reported back
    /// (its caller was cancelled) expires after the reset timeout.
    fn claim_trial(&self) -> bool {
        let now = current_time_ms();
        let started = self.trial_started.load(Ordering::Acquire);
        if started != 0 && now - started < self.config.reset_timeout_ms as i64 {
            return false;
        }
        self.trial_started
            .compare_exchange(started, now, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn check_state_transition(&self) {
        if CircuitState::from(self.state.load(Ordering::Acquire)) != CircuitState::Open {
            return;
        }

        let elapsed = current_time_ms() - self.last_state_change.load(Ordering::Acquire);
        if elapsed < self.config.reset_timeout_ms as i64 {
            return;
        }

        if self
            .state
            .compare_exchange(
                CircuitState::Open as u8,
                CircuitState::HalfOpen as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.success_count.store(0, Ordering::Release);
            self.trial_started.store(0, Ordering::Release);
            self.last_state_change
                .store(current_time_ms(), Ordering::Release);
            tracing::info!("Circuit breaker half-open, next connection attempt is a trial");
        }
    }

    fn transition_to(&self, new_state: CircuitState) {
        self.state.store(new_state as u8, Ordering::Release);
        self.last_state_change
            .store(current_time_ms(), Ordering::Release);
        self.success_count.store(0, Ordering::Release);
        self.trial_started.store(0, Ordering::Release);
        if new_state == CircuitState::Closed {
            self.failure_count.store(0, Ordering::Release);
        }
    }

    /// Snapshot for the stats endpoint
    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            state: self.state(),
            failure_count: self.failure_count.load(Ordering::Acquire),
            success_count: self.success_count.load(Ordering::Acquire),
            trial_in_flight: self.trial_started.load(Ordering::Acquire) != 0,
            last_state_change_ms: self.last_state_change.load(Ordering::Acquire),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of a [`CircuitBreaker`]
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub trial_in_flight: bool,
    pub last_state_change_ms: i64,
}
