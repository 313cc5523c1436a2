//! Pool statistics and status snapshots

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::BackendKind;
use crate::resilience::CircuitState;

/// Point-in-time occupancy of a pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub backend: BackendKind,
    pub max_size: usize,
    pub idle: usize,
    pub checked_out: usize,
    /// Callers currently waiting for capacity
    pub waiting: usize,
    pub circuit: CircuitState,
    pub closed: bool,
}

impl PoolStatus {
    /// Sessions currently alive (available + checked out)
    pub fn size(&self) -> usize {
        self.idle + self.checked_out
    }

    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            self.checked_out as f64 / self.max_size as f64 * 100.0
        }
    }
}

/// Cumulative counters since the pool was created.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStats {
    pub connections_created: u64,
    pub connections_closed: u64,
    pub acquisitions: u64,
    pub reused: u64,
    pub exhausted_count: u64,
    pub connect_failures: u64,
    pub probe_failures: u64,
    pub total_wait_time_ms: u64,
}

impl PoolStats {
    pub fn avg_wait_time_ms(&self) -> f64 {
        if self.acquisitions == 0 {
            0.0
        } else {
            self.total_wait_time_ms as f64 / self.acquisitions as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct AtomicPoolStats {
    connections_created: AtomicU64,
    connections_closed: AtomicU64,
    acquisitions: AtomicU64,
    reused: AtomicU64,
    exhausted_count: AtomicU64,
    connect_failures: AtomicU64,
    probe_failures: AtomicU64,
    total_wait_time_ms: AtomicU64,
}

impl AtomicPoolStats {
    pub fn record_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_acquisition(&self, wait_time_ms: u64, reused: bool) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        self.total_wait_time_ms
            .fetch_add(wait_time_ms, Ordering::Relaxed);
        if reused {
            self.reused.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_exhausted(&self) {
        self.exhausted_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_probe_failure(&self) {
        self.probe_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            exhausted_count: self.exhausted_count.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            probe_failures: self.probe_failures.load(Ordering::Relaxed),
            total_wait_time_ms: self.total_wait_time_ms.load(Ordering::Relaxed),
        }
    }
}
