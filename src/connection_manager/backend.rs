use chrono::{DateTime, Utc};
use sqlx::postgres::PgConnection;

#[cfg(feature = "odbc")]
use crate::odbc::{OdbcConnector, OdbcSession};
use crate::pool::{BackendKind, PooledConnection};
use crate::postgres::PostgresConnector;

/// A session checked out of one of the manager's pools.
///
/// Returned to its pool by [`ConnectionManager::release`](super::ConnectionManager::release)
/// or on drop, and discarded for good by
/// [`ConnectionManager::invalidate`](super::ConnectionManager::invalidate).
#[derive(Debug)]
pub enum BackendConnection {
    Postgres(PooledConnection<PostgresConnector>),
    #[cfg(feature = "odbc")]
    SqlServer(PooledConnection<OdbcConnector>),
}

impl BackendConnection {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConnection::Postgres(_) => BackendKind::Postgres,
            #[cfg(feature = "odbc")]
            BackendConnection::SqlServer(_) => BackendKind::SqlServerOdbc,
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            BackendConnection::Postgres(c) => c.id(),
            #[cfg(feature = "odbc")]
            BackendConnection::SqlServer(c) => c.id(),
        }
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        match self {
            BackendConnection::Postgres(c) => c.opened_at(),
            #[cfg(feature = "odbc")]
            BackendConnection::SqlServer(c) => c.opened_at(),
        }
    }

    /// Flag the session as broken so it is discarded instead of reused.
    pub fn mark_invalid(&mut self) {
        match self {
            BackendConnection::Postgres(c) => c.mark_invalid(),
            #[cfg(feature = "odbc")]
            BackendConnection::SqlServer(c) => c.mark_invalid(),
        }
    }

    pub fn as_postgres_mut(&mut self) -> Option<&mut PgConnection> {
        match self {
            BackendConnection::Postgres(c) => Some(&mut **c),
            #[cfg(feature = "odbc")]
            _ => None,
        }
    }

    #[cfg(feature = "odbc")]
    pub fn as_sqlserver(&self) -> Option<&OdbcSession> {
        match self {
            BackendConnection::SqlServer(c) => Some(&**c),
            _ => None,
        }
    }

    pub(crate) fn invalidate(self) {
        match self {
            BackendConnection::Postgres(c) => c.invalidate(),
            #[cfg(feature = "odbc")]
            BackendConnection::SqlServer(c) => c.invalidate(),
        }
    }
}
