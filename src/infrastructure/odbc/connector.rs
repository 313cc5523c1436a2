//! SQL Server connector over the system ODBC driver manager.
//!
//! odbc-api is a blocking API, so every driver call runs on the blocking
//! thread pool. Sessions borrow a process-wide ODBC environment.

use std::sync::OnceLock;

use async_trait::async_trait;
use odbc_api::{Connection, ConnectionOptions, Environment};

use super::dsn::{build_connection_string, is_transient_odbc_state, mask_connection_string};
use crate::config::SqlServerConfig;
use crate::pool::{BackendKind, ConnectError, Connector};

static ENVIRONMENT: OnceLock<Environment> = OnceLock::new();

fn environment() -> Result<&'static Environment, ConnectError> {
    if let Some(env) = ENVIRONMENT.get() {
        return Ok(env);
    }
    let env = Environment::new()
        .map_err(|e| ConnectError::fatal(format!("ODBC environment allocation failed: {e}")))?;
    // A racing initializer may have won; either environment is equivalent.
    let _ = ENVIRONMENT.set(env);
    ENVIRONMENT
        .get()
        .ok_or_else(|| ConnectError::fatal("ODBC environment unavailable"))
}

/// An open ODBC session.
///
/// `Send` through odbc-api's `Connection`; the pool hands a session to one
/// owner at a time and every driver call moves it into a single blocking task.
pub struct OdbcSession(Connection<'static>);

impl OdbcSession {
    pub fn connection(&self) -> &Connection<'static> {
        &self.0
    }
}

impl std::fmt::Debug for OdbcSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OdbcSession").finish_non_exhaustive()
    }
}

/// Opens SQL Server sessions through the ODBC driver named in the config.
pub struct OdbcConnector {
    connection_string: String,
    masked: String,
}

impl OdbcConnector {
    pub fn new(config: &SqlServerConfig) -> Self {
        let connection_string = build_connection_string(config);
        let masked = mask_connection_string(&connection_string);
        Self {
            connection_string,
            masked,
        }
    }
}

#[async_trait]
impl Connector for OdbcConnector {
    type Connection = OdbcSession;

    fn kind(&self) -> BackendKind {
        BackendKind::SqlServerOdbc
    }

    fn target(&self) -> String {
        self.masked.clone()
    }

    async fn connect(&self) -> Result<OdbcSession, ConnectError> {
        let conn_str = self.connection_string.clone();
        tokio::task::spawn_blocking(move || {
            let env = environment()?;
            let conn = env
                .connect_with_connection_string(&conn_str, ConnectionOptions::default())
                .map_err(classify)?;
            conn.set_autocommit(true).map_err(classify)?;
            Ok(OdbcSession(conn))
        })
        .await
        .map_err(|e| ConnectError::transient(format!("ODBC connect task failed: {e}")))?
    }

    async fn ping(&self, session: OdbcSession) -> Result<OdbcSession, ConnectError> {
        tokio::task::spawn_blocking(move || match session.0.is_dead() {
            Ok(false) => Ok(session),
            Ok(true) => Err(ConnectError::transient("ODBC connection is dead")),
            Err(e) => Err(classify(e)),
        })
        .await
        .map_err(|e| ConnectError::transient(format!("ODBC probe task failed: {e}")))?
    }

    async fn close(&self, session: OdbcSession) {
        // Dropping the connection disconnects, which may block on the network.
        if let Err(e) = tokio::task::spawn_blocking(move || drop(session)).await {
            tracing::debug!(error = %e, "Error closing ODBC session");
        }
    }
}

fn classify(err: odbc_api::Error) -> ConnectError {
    match &err {
        odbc_api::Error::Diagnostics { record, .. } => {
            if is_transient_odbc_state(record.state.as_str()) {
                ConnectError::transient(err.to_string())
            } else {
                ConnectError::fatal(err.to_string())
            }
        }
        _ => ConnectError::fatal(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_is_masked() {
        let config = SqlServerConfig {
            connection_string: None,
            driver: "ODBC Driver 17 for SQL Server".into(),
            server: "db,1433".into(),
            database: "POS".into(),
            username: "svc".into(),
            password: "hunter2".into(),
            extra_attributes: None,
            pool: None,
        };
        let connector = OdbcConnector::new(&config);
        assert_eq!(connector.kind(), BackendKind::SqlServerOdbc);
        assert!(!connector.target().contains("hunter2"));
        assert!(connector.target().contains("SERVER=db,1433"));
    }
}
