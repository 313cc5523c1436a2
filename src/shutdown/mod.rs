//! Graceful shutdown handling for the connection service.
//!
//! This module provides coordinated shutdown functionality that:
//! 1. Signals background tasks to stop
//! 2. Waits for checked-out sessions to come back
//! 3. Closes every pool

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::connection_manager::ConnectionManager;

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for checked-out sessions to be released (default: 10 seconds)
    pub drain_timeout: Duration,
    /// Time to wait for pools to close their idle sessions (default: 15 seconds)
    pub close_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(15),
        }
    }
}

/// Handles graceful shutdown of the connection service
pub struct GracefulShutdown {
    connection_manager: Arc<ConnectionManager>,
    shutdown_tx: broadcast::Sender<()>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(connection_manager: Arc<ConnectionManager>, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self::with_config(connection_manager, shutdown_tx, ShutdownConfig::default())
    }

    pub fn with_config(
        connection_manager: Arc<ConnectionManager>,
        shutdown_tx: broadcast::Sender<()>,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            connection_manager,
            shutdown_tx,
            config,
        }
    }

    /// Execute graceful shutdown sequence
    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self),
        fields(checked_out = self.checked_out())
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = std::time::Instant::now();
        let mut result = ShutdownResult::default();

        tracing::info!(reason = %reason, "Starting graceful shutdown - Phase 1: Stopping background tasks");
        let _ = self.shutdown_tx.send(());

        tracing::info!("Phase 2: Waiting for checked-out sessions");
        result.sessions_outstanding = self.wait_for_sessions().await;

        tracing::info!("Phase 3: Closing pools");
        result.pools_closed = timeout(self.config.close_timeout, self.connection_manager.close())
            .await
            .is_ok();
        if !result.pools_closed {
            tracing::warn!("Timed out closing pools");
        }

        result.duration = start.elapsed();
        result.success = result.pools_closed;

        tracing::info!(
            sessions_outstanding = result.sessions_outstanding,
            pools_closed = result.pools_closed,
            duration_ms = result.duration.as_millis(),
            "Graceful shutdown completed"
        );

        result
    }

    fn checked_out(&self) -> usize {
        self.connection_manager
            .statuses()
            .iter()
            .map(|s| s.checked_out)
            .sum()
    }

    /// Returns how many sessions were still checked out when the wait ended.
    async fn wait_for_sessions(&self) -> usize {
        if self.checked_out() == 0 {
            return 0;
        }

        let wait_future = async {
            while self.checked_out() > 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        let _ = timeout(self.config.drain_timeout, wait_future).await;

        let remaining = self.checked_out();
        if remaining > 0 {
            tracing::warn!(
                remaining_sessions = remaining,
                "Some sessions were not released before shutdown"
            );
        }
        remaining
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default)]
pub struct ShutdownResult {
    pub success: bool,
    /// Sessions still checked out when the pools were closed
    pub sessions_outstanding: usize,
    pub pools_closed: bool,
    pub duration: Duration,
}
