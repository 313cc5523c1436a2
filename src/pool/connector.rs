//! Driver seam: how a pool opens, probes and closes sessions

use async_trait::async_trait;
use thiserror::Error;

use super::BackendKind;

/// Failure reported by a connector.
///
/// `transient` failures (refused socket, network reset, server starting up)
/// are retried by the pool; the rest (bad credentials, unknown database,
/// missing driver) surface immediately.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ConnectError {
    message: String,
    transient: bool,
}

impl ConnectError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Opens sessions for one backend kind.
///
/// Implementations must not share a session between two `connect` results.
/// `ping` takes the session by value so blocking drivers can run the probe on
/// another thread; a session whose probe fails is dropped by the connector.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + 'static;

    fn kind(&self) -> BackendKind;

    /// Target description safe for logs (credentials masked).
    fn target(&self) -> String;

    async fn connect(&self) -> Result<Self::Connection, ConnectError>;

    async fn ping(&self, conn: Self::Connection) -> Result<Self::Connection, ConnectError>;

    async fn close(&self, conn: Self::Connection);
}
