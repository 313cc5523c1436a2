use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::connection_manager::ConnectionManager;
use crate::metrics::PoolMetrics;

/// Background task that reaps expired idle sessions, keeps `min_idle`
/// sessions warm and refreshes the pool gauges.
pub struct PoolMaintenanceTask {
    interval: Duration,
    connection_manager: Arc<ConnectionManager>,
    shutdown: broadcast::Receiver<()>,
}

impl PoolMaintenanceTask {
    pub fn new(
        interval: Duration,
        connection_manager: Arc<ConnectionManager>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            interval,
            connection_manager,
            shutdown,
        }
    }

    /// Run until a shutdown signal arrives
    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            backends = ?self.connection_manager.backends(),
            "Pool maintenance task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Pool maintenance task received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.run_once().await;
                }
            }
        }

        tracing::info!("Pool maintenance task stopped");
    }

    async fn run_once(&self) {
        let start = Instant::now();
        self.connection_manager.maintain().await;

        for status in self.connection_manager.statuses() {
            PoolMetrics::update_status(&status);
            tracing::debug!(
                backend = %status.backend,
                idle = status.idle,
                checked_out = status.checked_out,
                waiting = status.waiting,
                circuit = status.circuit.as_str(),
                "Pool status"
            );
        }

        tracing::trace!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Pool maintenance pass finished"
        );
    }
}
