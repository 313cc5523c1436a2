//! Connection handle and related types

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Database backend served by a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    #[serde(rename = "sqlserver")]
    SqlServerOdbc,
    #[serde(rename = "postgres")]
    Postgres,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::SqlServerOdbc, BackendKind::Postgres];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::SqlServerOdbc => "sqlserver",
            BackendKind::Postgres => "postgres",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlserver" | "mssql" | "odbc" => Ok(BackendKind::SqlServerOdbc),
            "postgres" | "postgresql" | "pg" => Ok(BackendKind::Postgres),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

/// Why a session left the pool for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Caller reported the session broken
    Invalidated,
    /// Liveness probe failed before reuse
    Stale,
    IdleTimeout,
    MaxLifetime,
    /// Pool was closed while the session was idle or checked out
    Closed,
}

impl DiscardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscardReason::Invalidated => "invalidated",
            DiscardReason::Stale => "stale",
            DiscardReason::IdleTimeout => "idle_timeout",
            DiscardReason::MaxLifetime => "max_lifetime",
            DiscardReason::Closed => "closed",
        }
    }
}

/// One live database session, owned by exactly one party at a time.
///
/// Deliberately not `Clone`: the pool moves a handle out of its available
/// set into a [`PooledConnection`](super::PooledConnection) and back.
pub struct ConnectionHandle<C> {
    pub(crate) id: u64,
    pub(crate) kind: BackendKind,
    pub(crate) opened_at: DateTime<Utc>,
    pub(crate) created: Instant,
    pub(crate) last_used: Instant,
    pub(crate) valid: bool,
    pub(crate) conn: C,
}

impl<C> ConnectionHandle<C> {
    pub(crate) fn new(id: u64, kind: BackendKind, conn: C) -> Self {
        let now = Instant::now();
        Self {
            id,
            kind,
            opened_at: Utc::now(),
            created: now,
            last_used: now,
            valid: true,
            conn,
        }
    }

    /// Session id, unique within the issuing pool
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// Swap the driver session for a probed one, keeping the metadata.
    pub(crate) fn split(self) -> (HandleMeta, C) {
        (
            HandleMeta {
                id: self.id,
                kind: self.kind,
                opened_at: self.opened_at,
                created: self.created,
            },
            self.conn,
        )
    }
}

/// Handle metadata while its session is away being probed.
pub(crate) struct HandleMeta {
    id: u64,
    kind: BackendKind,
    opened_at: DateTime<Utc>,
    created: Instant,
}

impl HandleMeta {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn rejoin<C>(self, conn: C) -> ConnectionHandle<C> {
        ConnectionHandle {
            id: self.id,
            kind: self.kind,
            opened_at: self.opened_at,
            created: self.created,
            last_used: Instant::now(),
            valid: true,
            conn,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_labels() {
        assert_eq!(BackendKind::Postgres.to_string(), "postgres");
        assert_eq!(BackendKind::SqlServerOdbc.as_str(), "sqlserver");
        assert_eq!("MSSQL".parse::<BackendKind>(), Ok(BackendKind::SqlServerOdbc));
        assert_eq!("postgresql".parse::<BackendKind>(), Ok(BackendKind::Postgres));
        assert!("oracle".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_backend_kind_serde() {
        let json = serde_json::to_string(&BackendKind::SqlServerOdbc).unwrap();
        assert_eq!(json, "\"sqlserver\"");
        let kind: BackendKind = serde_json::from_str("\"postgres\"").unwrap();
        assert_eq!(kind, BackendKind::Postgres);
    }

    #[test]
    fn test_handle_split_and_rejoin_keeps_identity() {
        let handle = ConnectionHandle::new(7, BackendKind::Postgres, "session");
        let opened_at = handle.opened_at();

        let (meta, conn) = handle.split();
        assert_eq!(meta.id(), 7);

        let handle = meta.rejoin(conn);
        assert_eq!(handle.id(), 7);
        assert_eq!(handle.opened_at(), opened_at);
        assert!(handle.is_valid());
        assert_eq!(handle.conn, "session");
    }
}
