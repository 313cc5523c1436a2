//! PostgreSQL connector over sqlx (TLS and SCRAM auth handled by the driver).

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection};

use crate::config::PostgresConfig;
use crate::pool::{BackendKind, ConnectError, Connector};

/// Opens native PostgreSQL sessions.
pub struct PostgresConnector {
    options: PgConnectOptions,
    /// Database URL with the password masked, for logging
    masked_url: String,
}

impl PostgresConnector {
    /// Parse connection options once; no I/O happens here.
    pub fn new(config: &PostgresConfig) -> Result<Self, sqlx::Error> {
        let mut options = PgConnectOptions::from_str(&config.url)?;
        if let Some(name) = &config.application_name {
            options = options.application_name(name);
        }

        Ok(Self {
            options,
            masked_url: mask_url(&config.url),
        })
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    type Connection = PgConnection;

    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn target(&self) -> String {
        self.masked_url.clone()
    }

    async fn connect(&self) -> Result<PgConnection, ConnectError> {
        self.options.connect().await.map_err(classify)
    }

    async fn ping(&self, mut conn: PgConnection) -> Result<PgConnection, ConnectError> {
        conn.ping().await.map_err(classify)?;
        Ok(conn)
    }

    async fn close(&self, conn: PgConnection) {
        if let Err(e) = conn.close().await {
            tracing::debug!(error = %e, "Error closing PostgreSQL session");
        }
    }
}

/// Map a driver error onto the pool's retry policy.
fn classify(err: sqlx::Error) -> ConnectError {
    let transient = match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|code| is_transient_sqlstate(&code)),
        _ => false,
    };

    if transient {
        ConnectError::transient(err.to_string())
    } else {
        ConnectError::fatal(err.to_string())
    }
}

/// SQLSTATEs worth retrying: connection exceptions, too many connections,
/// server still starting up.
pub fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08") || code == "53300" || code == "57P03"
}

/// Mask the password in a database URL for safe logging.
pub fn mask_url(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        let scheme_end = url.find("://").map(|i| i + 3).unwrap_or(0);
        if let Some(colon_pos) = url[scheme_end..at_pos].find(':') {
            let colon_pos = scheme_end + colon_pos;
            return format!("{}***{}", &url[..colon_pos + 1], &url[at_pos..]);
        }
    }
    url.to_string()
}
