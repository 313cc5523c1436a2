//! Scoped ownership of a checked-out session

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::OwnedSemaphorePermit;

use super::{BackendKind, ConnectionHandle, Connector, PoolError, PoolInner};

/// A session checked out of a [`Pool`](super::Pool).
///
/// Dereferences to the driver session. Every exit path gives the session
/// back: [`release`](Self::release) and [`invalidate`](Self::invalidate)
/// consume the guard, and dropping it releases a valid session or discards
/// one that was [`mark_invalid`](Self::mark_invalid)ed. The guard also
/// carries the capacity permit, which is freed only after the session is
/// back in the pool so a woken waiter finds it there.
pub struct PooledConnection<K: Connector> {
    handle: Option<ConnectionHandle<K::Connection>>,
    permit: Option<OwnedSemaphorePermit>,
    pub(crate) pool: Arc<PoolInner<K>>,
}

impl<K: Connector> PooledConnection<K> {
    pub(crate) fn new(
        handle: ConnectionHandle<K::Connection>,
        permit: OwnedSemaphorePermit,
        pool: Arc<PoolInner<K>>,
    ) -> Self {
        Self {
            handle: Some(handle),
            permit: Some(permit),
            pool,
        }
    }

    fn handle(&self) -> &ConnectionHandle<K::Connection> {
        self.handle
            .as_ref()
            .expect("session is present until the guard is consumed")
    }

    fn handle_mut(&mut self) -> &mut ConnectionHandle<K::Connection> {
        self.handle
            .as_mut()
            .expect("session is present until the guard is consumed")
    }

    /// Session id, stable across release and reacquisition
    pub fn id(&self) -> u64 {
        self.handle().id()
    }

    pub fn kind(&self) -> BackendKind {
        self.handle().kind()
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.handle().opened_at()
    }

    pub fn is_valid(&self) -> bool {
        self.handle().is_valid()
    }

    /// Flag the session as broken; it is discarded instead of reused.
    pub fn mark_invalid(&mut self) {
        self.handle_mut().valid = false;
    }

    /// Return the session to the pool.
    pub fn release(mut self) -> Result<(), PoolError> {
        self.check_in()
    }

    /// Discard the session permanently. The next acquisition opens a new one.
    pub fn invalidate(mut self) {
        self.mark_invalid();
        if let Err(e) = self.check_in() {
            tracing::error!(error = %e, "Failed to discard invalidated session");
        }
    }

    fn check_in(&mut self) -> Result<(), PoolError> {
        match (self.handle.take(), self.permit.take()) {
            (Some(handle), Some(permit)) => self.pool.check_in(handle, permit),
            _ => Ok(()),
        }
    }
}

impl<K: Connector> Deref for PooledConnection<K> {
    type Target = K::Connection;

    fn deref(&self) -> &Self::Target {
        &self.handle().conn
    }
}

impl<K: Connector> DerefMut for PooledConnection<K> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.handle_mut().conn
    }
}

impl<K: Connector> Drop for PooledConnection<K> {
    fn drop(&mut self) {
        if let Err(e) = self.check_in() {
            tracing::error!(error = %e, "Failed to return session on drop");
        }
    }
}

impl<K: Connector> std::fmt::Debug for PooledConnection<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.handle {
            Some(handle) => f
                .debug_struct("PooledConnection")
                .field("id", &handle.id())
                .field("kind", &handle.kind())
                .field("valid", &handle.is_valid())
                .finish(),
            None => f.write_str("PooledConnection(returned)"),
        }
    }
}
