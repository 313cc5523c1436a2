use thiserror::Error;

use crate::pool::{BackendKind, PoolError};

/// Errors surfaced by [`ConnectionManager`](super::ConnectionManager).
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("{0} backend is not configured")]
    NotConfigured(BackendKind),

    #[error("invalid backend configuration: {0}")]
    Config(String),
}

impl ManagerError {
    /// Backend the error concerns, when there is one.
    pub fn backend(&self) -> Option<BackendKind> {
        match self {
            ManagerError::Pool(e) => Some(e.backend()),
            ManagerError::NotConfigured(kind) => Some(*kind),
            ManagerError::Config(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pool_errors_pass_through() {
        let err: ManagerError = PoolError::PoolExhausted {
            backend: BackendKind::Postgres,
            timeout: Duration::from_millis(100),
        }
        .into();
        assert_eq!(err.backend(), Some(BackendKind::Postgres));
        assert!(err.to_string().contains("exhausted"));
    }

    #[test]
    fn test_not_configured_message() {
        let err = ManagerError::NotConfigured(BackendKind::SqlServerOdbc);
        assert_eq!(err.to_string(), "sqlserver backend is not configured");
        assert!(ManagerError::Config("x".into()).backend().is_none());
    }
}
