//! Per-backend connection pools behind one acquire/release surface.

mod backend;
mod error;

pub use backend::BackendConnection;
pub use error::ManagerError;

use std::time::Duration;

use serde::Serialize;

use crate::config::Settings;
#[cfg(feature = "odbc")]
use crate::odbc::OdbcConnector;
use crate::pool::{BackendKind, Connector, Pool, PoolConfig, PoolStats, PoolStatus};
use crate::postgres::PostgresConnector;
use crate::resilience::CircuitBreakerStats;

/// Point-in-time view of one backend pool
#[derive(Debug, Clone, Serialize)]
pub struct BackendStats {
    pub status: PoolStatus,
    pub stats: PoolStats,
    pub circuit: CircuitBreakerStats,
}

impl BackendStats {
    fn of<K: Connector>(pool: &Pool<K>) -> Self {
        Self {
            status: pool.status(),
            stats: pool.stats(),
            circuit: pool.circuit_breaker().stats(),
        }
    }
}

/// Owns one pool per configured backend.
///
/// Backends left out of the configuration answer every acquisition with
/// [`ManagerError::NotConfigured`].
#[derive(Default)]
pub struct ConnectionManager {
    postgres: Option<Pool<PostgresConnector>>,
    #[cfg(feature = "odbc")]
    sql_server: Option<Pool<OdbcConnector>>,
}

impl ConnectionManager {
    /// Manager with no backends.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build pools for every backend present in `settings`. No session is
    /// opened here.
    pub fn from_settings(settings: &Settings) -> Result<Self, ManagerError> {
        let mut manager = Self::new();

        if let Some(pg) = &settings.postgres {
            let connector = PostgresConnector::new(pg)
                .map_err(|e| ManagerError::Config(format!("postgres: {e}")))?;
            let config = PoolConfig::from(settings.postgres_pool());
            tracing::info!(
                backend = %BackendKind::Postgres,
                target = %crate::postgres::mask_url(&pg.url),
                max_size = config.max_size,
                "Connection pool configured"
            );
            manager = manager.with_postgres(Pool::new(connector, config));
        }

        if let Some(mssql) = &settings.sqlserver {
            #[cfg(feature = "odbc")]
            {
                let connector = OdbcConnector::new(mssql);
                let config = PoolConfig::from(settings.sqlserver_pool());
                tracing::info!(
                    backend = %BackendKind::SqlServerOdbc,
                    target = %crate::odbc::mask_connection_string(
                        &crate::odbc::build_connection_string(mssql)
                    ),
                    max_size = config.max_size,
                    "Connection pool configured"
                );
                manager = manager.with_sql_server(Pool::new(connector, config));
            }
            #[cfg(not(feature = "odbc"))]
            {
                let _ = mssql;
                return Err(ManagerError::Config(
                    "sqlserver is configured but this build lacks the `odbc` feature".into(),
                ));
            }
        }

        Ok(manager)
    }

    pub fn with_postgres(mut self, pool: Pool<PostgresConnector>) -> Self {
        self.postgres = Some(pool);
        self
    }

    #[cfg(feature = "odbc")]
    pub fn with_sql_server(mut self, pool: Pool<OdbcConnector>) -> Self {
        self.sql_server = Some(pool);
        self
    }

    pub fn postgres(&self) -> Option<&Pool<PostgresConnector>> {
        self.postgres.as_ref()
    }

    #[cfg(feature = "odbc")]
    pub fn sql_server(&self) -> Option<&Pool<OdbcConnector>> {
        self.sql_server.as_ref()
    }

    /// Configured backends, in a stable order.
    pub fn backends(&self) -> Vec<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter(|kind| self.is_configured(*kind))
            .collect()
    }

    pub fn is_configured(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::Postgres => self.postgres.is_some(),
            #[cfg(feature = "odbc")]
            BackendKind::SqlServerOdbc => self.sql_server.is_some(),
            #[cfg(not(feature = "odbc"))]
            BackendKind::SqlServerOdbc => false,
        }
    }

    /// Check out a session for `kind`, waiting at most `timeout`.
    pub async fn acquire(
        &self,
        kind: BackendKind,
        timeout: Duration,
    ) -> Result<BackendConnection, ManagerError> {
        match kind {
            BackendKind::Postgres => {
                let pool = self
                    .postgres
                    .as_ref()
                    .ok_or(ManagerError::NotConfigured(kind))?;
                Ok(BackendConnection::Postgres(pool.acquire(timeout).await?))
            }
            #[cfg(feature = "odbc")]
            BackendKind::SqlServerOdbc => {
                let pool = self
                    .sql_server
                    .as_ref()
                    .ok_or(ManagerError::NotConfigured(kind))?;
                Ok(BackendConnection::SqlServer(pool.acquire(timeout).await?))
            }
            #[cfg(not(feature = "odbc"))]
            BackendKind::SqlServerOdbc => Err(ManagerError::NotConfigured(kind)),
        }
    }

    /// Return a session to this manager's pool for its backend.
    ///
    /// A session from another manager is reported as a double release and
    /// goes back to the pool that issued it.
    pub fn release(&self, conn: BackendConnection) -> Result<(), ManagerError> {
        match conn {
            BackendConnection::Postgres(c) => match &self.postgres {
                Some(pool) => Ok(pool.release(c)?),
                None => {
                    let err = ManagerError::NotConfigured(BackendKind::Postgres);
                    drop(c);
                    Err(err)
                }
            },
            #[cfg(feature = "odbc")]
            BackendConnection::SqlServer(c) => match &self.sql_server {
                Some(pool) => Ok(pool.release(c)?),
                None => {
                    let err = ManagerError::NotConfigured(BackendKind::SqlServerOdbc);
                    drop(c);
                    Err(err)
                }
            },
        }
    }

    /// Discard a session permanently; its pool opens a replacement on demand.
    pub fn invalidate(&self, conn: BackendConnection) {
        tracing::debug!(backend = %conn.kind(), session_id = conn.id(), "Invalidating session");
        conn.invalidate();
    }

    pub fn status(&self, kind: BackendKind) -> Option<PoolStatus> {
        match kind {
            BackendKind::Postgres => self.postgres.as_ref().map(Pool::status),
            #[cfg(feature = "odbc")]
            BackendKind::SqlServerOdbc => self.sql_server.as_ref().map(Pool::status),
            #[cfg(not(feature = "odbc"))]
            BackendKind::SqlServerOdbc => None,
        }
    }

    pub fn statuses(&self) -> Vec<PoolStatus> {
        self.backends()
            .into_iter()
            .filter_map(|kind| self.status(kind))
            .collect()
    }

    pub fn stats(&self) -> Vec<BackendStats> {
        let mut out = Vec::new();
        if let Some(pool) = &self.postgres {
            out.push(BackendStats::of(pool));
        }
        #[cfg(feature = "odbc")]
        if let Some(pool) = &self.sql_server {
            out.push(BackendStats::of(pool));
        }
        out.sort_by_key(|s| BackendKind::ALL.iter().position(|k| *k == s.status.backend));
        out
    }

    /// Reap expired idle sessions and top pools back up to `min_idle`.
    /// Failures are logged; one backend being down does not stop the other.
    pub async fn maintain(&self) {
        if let Some(pool) = &self.postgres {
            maintain_pool(pool).await;
        }
        #[cfg(feature = "odbc")]
        if let Some(pool) = &self.sql_server {
            maintain_pool(pool).await;
        }
    }

    /// Close every pool. Checked-out sessions are closed as they come back.
    pub async fn close(&self) {
        if let Some(pool) = &self.postgres {
            pool.close().await;
        }
        #[cfg(feature = "odbc")]
        if let Some(pool) = &self.sql_server {
            pool.close().await;
        }
    }
}

async fn maintain_pool<K: crate::pool::Connector>(pool: &Pool<K>) {
    pool.reap_idle().await;
    if let Err(e) = pool.replenish().await {
        tracing::warn!(backend = %pool.kind(), error = %e, "Failed to replenish idle sessions");
    }
}
