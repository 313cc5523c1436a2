//! Bounded pool of database sessions for one backend.
//!
//! Capacity is a [`Semaphore`] with `max_size` permits: a caller holds a
//! permit for as long as it holds a session, so waiting is FIFO and wakes as
//! soon as a session is released. The available set and the checked-out ids
//! sit behind one mutex that is never held across an `.await`; opening and
//! probing sessions happen outside it.
//!
//! Accounting invariant: `idle + checked_out <= max_size`. A session is
//! opened only when the available set was empty at checkout, so the number of
//! live sessions never exceeds the number of permits.

mod config;
mod connector;
mod error;
mod guard;
mod handle;
mod stats;

pub use config::PoolConfig;
pub use connector::{ConnectError, Connector};
pub use error::PoolError;
pub use guard::PooledConnection;
pub use handle::{BackendKind, ConnectionHandle, DiscardReason};
pub use stats::{PoolStats, PoolStatus};

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant as Deadline;

use crate::metrics::PoolMetrics;
use crate::resilience::{CircuitBreaker, ExponentialBackoff};

use handle::HandleMeta;
use stats::AtomicPoolStats;

/// Upper bound on closing a discarded session in the background
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Stand-in deadline for timeouts too large to add to the clock
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_after(timeout: Duration) -> Deadline {
    let now = Deadline::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

struct PoolState<C> {
    /// Available sessions, most recently released last
    idle: Vec<ConnectionHandle<C>>,
    checked_out: HashSet<u64>,
}

pub(crate) struct PoolInner<K: Connector> {
    connector: K,
    config: PoolConfig,
    state: Mutex<PoolState<K::Connection>>,
    semaphore: Arc<Semaphore>,
    next_id: AtomicU64,
    waiting: AtomicUsize,
    circuit_breaker: CircuitBreaker,
    stats: AtomicPoolStats,
    closed: AtomicBool,
}

/// Connection pool for a single backend kind.
///
/// Cheap to clone; clones share the same sessions.
pub struct Pool<K: Connector> {
    inner: Arc<PoolInner<K>>,
}

impl<K: Connector> Clone for Pool<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K: Connector> Pool<K> {
    /// Create an empty pool. No session is opened until the first
    /// `acquire` or `replenish`.
    pub fn new(connector: K, config: PoolConfig) -> Self {
        let circuit_breaker = CircuitBreaker::with_config(config.circuit_breaker.clone());
        Self {
            inner: Arc::new(PoolInner {
                semaphore: Arc::new(Semaphore::new(config.max_size)),
                state: Mutex::new(PoolState {
                    idle: Vec::with_capacity(config.max_size),
                    checked_out: HashSet::with_capacity(config.max_size),
                }),
                connector,
                config,
                next_id: AtomicU64::new(1),
                waiting: AtomicUsize::new(0),
                circuit_breaker,
                stats: AtomicPoolStats::default(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.inner.connector.kind()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn connector(&self) -> &K {
        &self.inner.connector
    }

    /// Check out a session, waiting at most `timeout` for capacity.
    ///
    /// Reuses the most recently released session when one is available,
    /// probing it first if it sat idle longer than the liveness threshold.
    /// Otherwise opens a new session, retrying transient failures with
    /// backoff.
    ///
    /// A liveness probe runs in its own task holding the session and its
    /// permit. If the caller gives up first (deadline or cancellation) the
    /// probe still finishes and a live session goes back to the available
    /// set; only a failed probe discards it.
    #[tracing::instrument(
        name = "pool_acquire",
        skip(self),
        fields(backend = %self.kind(), timeout_ms = timeout.as_millis() as u64)
    )]
    pub async fn acquire(&self, timeout: Duration) -> Result<PooledConnection<K>, PoolError> {
        let inner = &self.inner;

        if inner.closed.load(Ordering::Acquire) {
            return Err(inner.closed_error());
        }

        let start = Instant::now();
        let deadline = deadline_after(timeout);

        let permit = {
            let _waiting = WaitingGuard::enter(&inner.waiting);
            tokio::time::timeout_at(deadline, inner.semaphore.clone().acquire_owned()).await
        };

        let mut permit = match permit {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(inner.closed_error()),
            Err(_) => return Err(inner.exhausted(timeout)),
        };

        while let Some(handle) = inner.checkout_idle() {
            if handle.age() >= inner.config.max_lifetime {
                inner.discard_checked_out(handle, DiscardReason::MaxLifetime);
                continue;
            }

            if handle.idle_for() < inner.config.liveness_threshold {
                return Ok(inner.hand_out(handle, permit, start, true));
            }

            if Deadline::now() >= deadline {
                // No budget left to probe; the session stays for the next caller
                inner.restore_idle(handle);
                return Err(inner.exhausted(timeout));
            }

            match inner.probe(handle, permit, deadline).await {
                Probe::Alive(handle, p) => return Ok(inner.hand_out(handle, p, start, true)),
                Probe::Stale(p) => permit = p,
                Probe::Pending => return Err(inner.exhausted(timeout)),
            }
        }

        let handle = inner.open(deadline).await?;
        Ok(inner.hand_out(handle, permit, start, false))
    }

    /// Check out a session using the configured acquire timeout.
    pub async fn get(&self) -> Result<PooledConnection<K>, PoolError> {
        self.acquire(self.inner.config.acquire_timeout).await
    }

    /// Return a session to this pool.
    ///
    /// A session issued by a different pool is reported as `DoubleRelease`
    /// and sent back to the pool that issued it.
    pub fn release(&self, conn: PooledConnection<K>) -> Result<(), PoolError> {
        if !Arc::ptr_eq(&conn.pool, &self.inner) {
            let err = PoolError::DoubleRelease {
                backend: self.kind(),
                session_id: conn.id(),
            };
            tracing::error!(backend = %self.kind(), session_id = conn.id(), "Session released into a pool that did not issue it");
            drop(conn);
            return Err(err);
        }
        conn.release()
    }

    /// Discard a session for good; the next acquisition opens a replacement.
    pub fn invalidate(&self, conn: PooledConnection<K>) {
        conn.invalidate();
    }

    /// Destroy idle sessions past the idle timeout or max lifetime.
    pub async fn reap_idle(&self) -> usize {
        let inner = &self.inner;
        let expired: Vec<_> = {
            let mut state = inner.lock_state();
            let (expired, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut state.idle)
                .into_iter()
                .partition(|h| inner.expiry_reason(h).is_some());
            state.idle = keep;
            expired
        };

        let count = expired.len();
        for handle in expired {
            let reason = inner
                .expiry_reason(&handle)
                .unwrap_or(DiscardReason::IdleTimeout);
            inner.record_discard(handle.id, reason);
            inner.close_now(handle.conn).await;
        }

        if count > 0 {
            tracing::debug!(backend = %self.kind(), reaped = count, "Reaped idle sessions");
        }
        count
    }

    /// Open sessions until `min_idle` are available, never waiting for
    /// capacity. Returns how many were opened.
    pub async fn replenish(&self) -> Result<usize, PoolError> {
        let inner = &self.inner;
        let mut opened = 0;

        while !inner.closed.load(Ordering::Acquire) && self.status().idle < inner.config.min_idle {
            let Ok(permit) = inner.semaphore.clone().try_acquire_owned() else {
                break;
            };
            let deadline = deadline_after(inner.config.connect_timeout);
            let handle = inner.open(deadline).await?;
            inner.check_in(handle, permit)?;
            opened += 1;
        }

        if opened > 0 {
            tracing::debug!(backend = %self.kind(), opened, "Replenished idle sessions");
        }
        Ok(opened)
    }

    pub fn status(&self) -> PoolStatus {
        let inner = &self.inner;
        let (idle, checked_out) = {
            let state = inner.lock_state();
            (state.idle.len(), state.checked_out.len())
        };

        PoolStatus {
            backend: self.kind(),
            max_size: inner.config.max_size,
            idle,
            checked_out,
            waiting: inner.waiting.load(Ordering::Relaxed),
            circuit: inner.circuit_breaker.state(),
            closed: inner.closed.load(Ordering::Acquire),
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.stats.snapshot()
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.inner.circuit_breaker
    }

    /// Close the pool: waiters fail, idle sessions are closed, sessions still
    /// checked out are closed when they come back.
    pub async fn close(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        inner.semaphore.close();
        let idle = std::mem::take(&mut inner.lock_state().idle);
        for handle in idle {
            inner.record_discard(handle.id, DiscardReason::Closed);
            inner.close_now(handle.conn).await;
        }

        tracing::info!(backend = %self.kind(), "Connection pool closed");
    }
}

impl<K: Connector> PoolInner<K> {
    fn lock_state(&self) -> MutexGuard<'_, PoolState<K::Connection>> {
        // No code path panics while holding the lock; recover if one ever does.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn closed_error(&self) -> PoolError {
        PoolError::BackendUnavailable {
            backend: self.connector.kind(),
            reason: "pool is closed".to_string(),
        }
    }

    fn exhausted(&self, timeout: Duration) -> PoolError {
        let backend = self.connector.kind();
        self.stats.record_exhausted();
        PoolMetrics::record_exhausted(backend);
        tracing::warn!(
            backend = %backend,
            timeout_ms = timeout.as_millis() as u64,
            "Connection pool exhausted"
        );
        PoolError::PoolExhausted { backend, timeout }
    }

    fn expiry_reason(&self, handle: &ConnectionHandle<K::Connection>) -> Option<DiscardReason> {
        if handle.age() >= self.config.max_lifetime {
            Some(DiscardReason::MaxLifetime)
        } else if handle.idle_for() >= self.config.idle_timeout {
            Some(DiscardReason::IdleTimeout)
        } else {
            None
        }
    }

    /// Pop the most recently released session and mark it checked out in the
    /// same critical section.
    fn checkout_idle(&self) -> Option<ConnectionHandle<K::Connection>> {
        let mut state = self.lock_state();
        let handle = state.idle.pop()?;
        state.checked_out.insert(handle.id);
        Some(handle)
    }

    /// Put a session taken by `checkout_idle` back untouched.
    fn restore_idle(&self, handle: ConnectionHandle<K::Connection>) {
        let mut state = self.lock_state();
        state.checked_out.remove(&handle.id);
        state.idle.push(handle);
    }

    fn hand_out(
        self: &Arc<Self>,
        mut handle: ConnectionHandle<K::Connection>,
        permit: OwnedSemaphorePermit,
        start: Instant,
        reused: bool,
    ) -> PooledConnection<K> {
        let waited = start.elapsed();
        self.stats
            .record_acquisition(waited.as_millis() as u64, reused);
        PoolMetrics::observe_acquire(self.connector.kind(), waited.as_secs_f64());

        handle.touch();
        tracing::trace!(backend = %handle.kind(), session_id = handle.id(), reused, "Session checked out");
        PooledConnection::new(handle, permit, self.clone())
    }

    /// Probe a checked-out session in a background task, waiting for the
    /// verdict until `deadline`.
    async fn probe(
        self: &Arc<Self>,
        handle: ConnectionHandle<K::Connection>,
        permit: OwnedSemaphorePermit,
        deadline: Deadline,
    ) -> Probe<K> {
        let session_id = handle.id;
        let (tx, mut rx) = oneshot::channel();
        let inner = self.clone();

        tokio::spawn(async move {
            let handle = inner.check_liveness(handle).await;
            // An unclaimed result checks itself back in when dropped
            let _ = tx.send(ProbeResult {
                pool: inner,
                handle,
                permit: Some(permit),
            });
        });

        let received = match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(received) => received.ok(),
            Err(_) => {
                rx.close();
                rx.try_recv().ok()
            }
        };

        match received.map(ProbeResult::into_parts) {
            Some((Some(handle), Some(permit))) => Probe::Alive(handle, permit),
            Some((None, Some(permit))) => Probe::Stale(permit),
            _ => {
                tracing::debug!(
                    backend = %self.connector.kind(),
                    session_id,
                    "Acquire deadline reached during liveness probe"
                );
                Probe::Pending
            }
        }
    }

    /// Ping a checked-out session; `None` means it was stale and is gone.
    async fn check_liveness(
        &self,
        handle: ConnectionHandle<K::Connection>,
    ) -> Option<ConnectionHandle<K::Connection>> {
        let (meta, conn) = handle.split();
        let reservation = Reservation::new(self, meta);

        let outcome = tokio::time::timeout(self.config.connect_timeout, self.connector.ping(conn)).await;
        match outcome {
            Ok(Ok(conn)) => Some(reservation.keep().rejoin(conn)),
            Ok(Err(e)) => {
                tracing::debug!(
                    backend = %self.connector.kind(),
                    session_id = reservation.id(),
                    error = %e,
                    "Liveness probe failed, discarding stale session"
                );
                None
            }
            Err(_) => {
                tracing::debug!(
                    backend = %self.connector.kind(),
                    session_id = reservation.id(),
                    "Liveness probe exceeded the connect timeout, discarding stale session"
                );
                None
            }
        }
    }

    /// Establish a new session and mark it checked out.
    async fn open(&self, deadline: Deadline) -> Result<ConnectionHandle<K::Connection>, PoolError> {
        let backend = self.connector.kind();

        if !self.circuit_breaker.allow_request() {
            return Err(PoolError::BackendUnavailable {
                backend,
                reason: "circuit breaker is open".to_string(),
            });
        }

        let mut backoff = ExponentialBackoff::with_config(self.config.backoff.clone());
        let mut attempt: u32 = 0;

        let outcome = loop {
            attempt += 1;

            let err = match tokio::time::timeout_at(deadline, self.connector.connect()).await {
                Ok(Ok(conn)) => break Ok(conn),
                Ok(Err(e)) => e,
                Err(_) => {
                    break Err(format!(
                        "timed out establishing connection after {} attempt(s)",
                        attempt
                    ))
                }
            };

            if !err.is_transient() || attempt > self.config.connect_retries {
                break Err(err.to_string());
            }

            let delay = backoff.next_delay();
            if deadline_after(delay) >= deadline {
                break Err(format!("{} (no time left to retry)", err));
            }

            tracing::debug!(
                backend = %backend,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient connect failure, retrying"
            );
            tokio::time::sleep(delay).await;
        };

        match outcome {
            Ok(conn) => {
                self.circuit_breaker.record_success();
                self.stats.record_created();
                PoolMetrics::record_opened(backend);

                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                self.lock_state().checked_out.insert(id);

                tracing::debug!(
                    backend = %backend,
                    session_id = id,
                    target = %self.connector.target(),
                    attempts = attempt,
                    "Opened database session"
                );
                Ok(ConnectionHandle::new(id, backend, conn))
            }
            Err(reason) => {
                self.circuit_breaker.record_failure();
                self.stats.record_connect_failure();
                PoolMetrics::record_connect_failure(backend);

                tracing::warn!(
                    backend = %backend,
                    target = %self.connector.target(),
                    attempts = attempt,
                    error = %reason,
                    "Failed to establish database session"
                );
                Err(PoolError::BackendUnavailable { backend, reason })
            }
        }
    }

    /// Take a session back from its guard.
    pub(crate) fn check_in(
        self: &Arc<Self>,
        handle: ConnectionHandle<K::Connection>,
        permit: OwnedSemaphorePermit,
    ) -> Result<(), PoolError> {
        let backend = self.connector.kind();
        let mut state = self.lock_state();

        if !state.checked_out.remove(&handle.id) {
            drop(state);
            let session_id = handle.id;
            self.close_later(handle.conn);
            drop(permit);
            tracing::error!(backend = %backend, session_id, "Session released twice");
            return Err(PoolError::DoubleRelease {
                backend,
                session_id,
            });
        }

        let discard = if self.closed.load(Ordering::Acquire) {
            Some(DiscardReason::Closed)
        } else if !handle.valid {
            Some(DiscardReason::Invalidated)
        } else if handle.age() >= self.config.max_lifetime {
            Some(DiscardReason::MaxLifetime)
        } else {
            None
        };

        match discard {
            None => {
                let mut handle = handle;
                handle.touch();
                state.idle.push(handle);
                drop(state);
            }
            Some(reason) => {
                drop(state);
                self.note_discard(handle.id, reason);
                self.close_later(handle.conn);
            }
        }

        // Free capacity only once the session is back, so a woken waiter
        // finds it in the available set.
        drop(permit);
        Ok(())
    }

    /// Drop a checked-out session that will not be handed out.
    fn discard_checked_out(
        self: &Arc<Self>,
        handle: ConnectionHandle<K::Connection>,
        reason: DiscardReason,
    ) {
        self.record_discard(handle.id, reason);
        self.close_later(handle.conn);
    }

    /// Remove `id` from the checked-out set and count the discard.
    fn record_discard(&self, id: u64, reason: DiscardReason) {
        self.lock_state().checked_out.remove(&id);
        self.note_discard(id, reason);
    }

    fn note_discard(&self, id: u64, reason: DiscardReason) {
        let backend = self.connector.kind();
        self.stats.record_closed();
        if reason == DiscardReason::Stale {
            self.stats.record_probe_failure();
        }
        PoolMetrics::record_discarded(backend, reason.as_str());
        tracing::debug!(backend = %backend, session_id = id, reason = reason.as_str(), "Session discarded");
    }

    async fn close_now(&self, conn: K::Connection) {
        if tokio::time::timeout(CLOSE_TIMEOUT, self.connector.close(conn))
            .await
            .is_err()
        {
            tracing::debug!(backend = %self.connector.kind(), "Timed out closing session");
        }
    }

    /// Close a session in the background; callers may be in a sync context.
    fn close_later(self: &Arc<Self>, conn: K::Connection) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let inner = self.clone();
                runtime.spawn(async move {
                    inner.close_now(conn).await;
                });
            }
            Err(_) => drop(conn),
        }
    }
}

/// What a caller gets back from [`PoolInner::probe`]
enum Probe<K: Connector> {
    Alive(ConnectionHandle<K::Connection>, OwnedSemaphorePermit),
    /// Session discarded; the permit comes back for another try
    Stale(OwnedSemaphorePermit),
    /// The probe still owns the session and the permit
    Pending,
}

/// Verdict of a probe task.
///
/// If the caller never takes it, dropping it returns a live session to the
/// available set and frees the permit.
struct ProbeResult<K: Connector> {
    pool: Arc<PoolInner<K>>,
    handle: Option<ConnectionHandle<K::Connection>>,
    permit: Option<OwnedSemaphorePermit>,
}

impl<K: Connector> ProbeResult<K> {
    fn into_parts(
        mut self,
    ) -> (
        Option<ConnectionHandle<K::Connection>>,
        Option<OwnedSemaphorePermit>,
    ) {
        (self.handle.take(), self.permit.take())
    }
}

impl<K: Connector> Drop for ProbeResult<K> {
    fn drop(&mut self) {
        if let (Some(handle), Some(permit)) = (self.handle.take(), self.permit.take()) {
            let session_id = handle.id;
            if self.pool.check_in(handle, permit).is_ok() {
                tracing::debug!(
                    backend = %self.pool.connector.kind(),
                    session_id,
                    "Probed session returned after its caller left"
                );
            }
        }
    }
}

/// Keeps a probed session counted as checked out; if the probe fails or is
/// dropped mid-ping, the session is written off.
struct Reservation<'a, K: Connector> {
    inner: &'a PoolInner<K>,
    meta: Option<HandleMeta>,
}

impl<'a, K: Connector> Reservation<'a, K> {
    fn new(inner: &'a PoolInner<K>, meta: HandleMeta) -> Self {
        Self {
            inner,
            meta: Some(meta),
        }
    }

    fn id(&self) -> u64 {
        self.meta.as_ref().map(HandleMeta::id).unwrap_or_default()
    }

    fn keep(mut self) -> HandleMeta {
        self.meta
            .take()
            .expect("reservation is kept at most once")
    }
}

impl<K: Connector> Drop for Reservation<'_, K> {
    fn drop(&mut self) {
        if let Some(meta) = self.meta.take() {
            self.inner.record_discard(meta.id(), DiscardReason::Stale);
        }
    }
}

/// Counts a caller as waiting until the permit wait ends or is cancelled.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}
