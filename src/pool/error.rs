use std::time::Duration;

use thiserror::Error;

use super::BackendKind;

/// Errors crossing the pool boundary.
///
/// A failed liveness probe never shows up here: the stale session is
/// discarded and replaced inside `acquire`.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("{backend} pool exhausted: no connection available within {}ms", .timeout.as_millis())]
    PoolExhausted {
        backend: BackendKind,
        timeout: Duration,
    },

    #[error("{backend} backend unavailable: {reason}")]
    BackendUnavailable { backend: BackendKind, reason: String },

    #[error("{backend} session {session_id} released twice or into the wrong pool")]
    DoubleRelease { backend: BackendKind, session_id: u64 },
}

impl PoolError {
    pub fn backend(&self) -> BackendKind {
        match self {
            PoolError::PoolExhausted { backend, .. }
            | PoolError::BackendUnavailable { backend, .. }
            | PoolError::DoubleRelease { backend, .. } => *backend,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, PoolError::PoolExhausted { .. })
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, PoolError::BackendUnavailable { .. })
    }
}
