//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    ACQUIRE_LATENCY, CONNECTIONS_DISCARDED_TOTAL, CONNECTIONS_OPENED_TOTAL,
    CONNECT_FAILURES_TOTAL, POOL_CHECKED_OUT, POOL_CIRCUIT_STATE, POOL_EXHAUSTED_TOTAL, POOL_IDLE,
    POOL_MAX_SIZE, POOL_WAITING,
};
use crate::pool::{BackendKind, PoolStatus};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording pool metrics
pub struct PoolMetrics;

impl PoolMetrics {
    pub fn record_opened(backend: BackendKind) {
        CONNECTIONS_OPENED_TOTAL
            .with_label_values(&[backend.as_str()])
            .inc();
    }

    pub fn record_discarded(backend: BackendKind, reason: &str) {
        CONNECTIONS_DISCARDED_TOTAL
            .with_label_values(&[backend.as_str(), reason])
            .inc();
    }

    pub fn record_connect_failure(backend: BackendKind) {
        CONNECT_FAILURES_TOTAL
            .with_label_values(&[backend.as_str()])
            .inc();
    }

    pub fn record_exhausted(backend: BackendKind) {
        POOL_EXHAUSTED_TOTAL
            .with_label_values(&[backend.as_str()])
            .inc();
    }

    pub fn observe_acquire(backend: BackendKind, seconds: f64) {
        ACQUIRE_LATENCY
            .with_label_values(&[backend.as_str()])
            .observe(seconds);
    }

    /// Refresh occupancy gauges from a status snapshot
    pub fn update_status(status: &PoolStatus) {
        let label = [status.backend.as_str()];
        POOL_IDLE.with_label_values(&label).set(status.idle as i64);
        POOL_CHECKED_OUT
            .with_label_values(&label)
            .set(status.checked_out as i64);
        POOL_WAITING.with_label_values(&label).set(status.waiting as i64);
        POOL_MAX_SIZE
            .with_label_values(&label)
            .set(status.max_size as i64);
        POOL_CIRCUIT_STATE
            .with_label_values(&label)
            .set(status.circuit as u8 as i64);
    }
}
