//! Prometheus metrics for the connection pools.
//!
//! - Occupancy gauges (idle, checked out, waiting) per backend
//! - Session lifecycle counters (opened, discarded by reason, failed opens)
//! - Pool exhaustion and acquire latency
//! - Circuit breaker state

mod helpers;

pub use helpers::{encode_metrics, PoolMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "sqlbridge";

lazy_static! {
    // ============================================================================
    // Occupancy
    // ============================================================================

    pub static ref POOL_IDLE: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_pool_idle_connections", METRIC_PREFIX),
        "Sessions available for reuse",
        &["backend"]
    ).unwrap();

    pub static ref POOL_CHECKED_OUT: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_pool_checked_out_connections", METRIC_PREFIX),
        "Sessions currently held by callers",
        &["backend"]
    ).unwrap();

    pub static ref POOL_WAITING: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_pool_waiting_callers", METRIC_PREFIX),
        "Callers waiting for pool capacity",
        &["backend"]
    ).unwrap();

    pub static ref POOL_MAX_SIZE: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_pool_max_connections", METRIC_PREFIX),
        "Configured maximum sessions",
        &["backend"]
    ).unwrap();

    /// Circuit breaker state (0=closed, 1=open, 2=half-open)
    pub static ref POOL_CIRCUIT_STATE: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_pool_circuit_breaker_state", METRIC_PREFIX),
        "Circuit breaker state (0=closed, 1=open, 2=half-open)",
        &["backend"]
    ).unwrap();

    // ============================================================================
    // Lifecycle
    // ============================================================================

    pub static ref CONNECTIONS_OPENED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Sessions successfully established",
        &["backend"]
    ).unwrap();

    pub static ref CONNECTIONS_DISCARDED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_connections_discarded_total", METRIC_PREFIX),
        "Sessions destroyed, by reason",
        &["backend", "reason"]
    ).unwrap();

    pub static ref CONNECT_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_connect_failures_total", METRIC_PREFIX),
        "Acquisitions that failed to establish a session after retries",
        &["backend"]
    ).unwrap();

    // ============================================================================
    // Acquisition
    // ============================================================================

    pub static ref POOL_EXHAUSTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_pool_exhausted_total", METRIC_PREFIX),
        "Acquisitions that timed out waiting for capacity",
        &["backend"]
    ).unwrap();

    pub static ref ACQUIRE_LATENCY: HistogramVec = register_histogram_vec!(
        format!("{}_acquire_latency_seconds", METRIC_PREFIX),
        "Time from acquire call to session hand-out",
        &["backend"],
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();
}
