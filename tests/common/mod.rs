//! Scripted connector shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use sqlbridge::pool::{BackendKind, ConnectError, Connector, Pool, PoolConfig};
use sqlbridge::resilience::BackoffConfig;

/// Counters and failure switches shared between a test and its connector
#[derive(Debug, Default)]
pub struct MockState {
    pub connect_calls: AtomicU64,
    pub opened: AtomicU64,
    pub closed: AtomicU64,
    pub pings: AtomicU64,
    /// Sessions alive right now, and the most ever alive at once
    pub live: AtomicUsize,
    pub max_live: AtomicUsize,
    pub fail_transient: AtomicU32,
    pub fail_fatal: AtomicU32,
    pub ping_fails: AtomicBool,
    pub connect_delay_ms: AtomicU64,
    pub ping_delay_ms: AtomicU64,
}

impl MockState {
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> u64 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    pub fn fail_next_transient(&self, n: u32) {
        self.fail_transient.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_fatal(&self, n: u32) {
        self.fail_fatal.store(n, Ordering::SeqCst);
    }

    pub fn set_ping_fails(&self, fails: bool) {
        self.ping_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_ping_delay(&self, delay: Duration) {
        self.ping_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn pings(&self) -> u64 {
        self.pings.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// A fake session; counts itself closed when dropped.
#[derive(Debug)]
pub struct MockSession {
    pub serial: u64,
    state: Arc<MockState>,
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        self.state.live.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MockConnector {
    kind: BackendKind,
    pub state: Arc<MockState>,
}

impl MockConnector {
    pub fn new(kind: BackendKind) -> (Self, Arc<MockState>) {
        let state = Arc::new(MockState::default());
        (
            Self {
                kind,
                state: state.clone(),
            },
            state,
        )
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Connection = MockSession;

    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn target(&self) -> String {
        "mock://db".to_string()
    }

    async fn connect(&self) -> Result<MockSession, ConnectError> {
        self.state.connect_calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.state.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if MockState::take_failure(&self.state.fail_fatal) {
            return Err(ConnectError::fatal("login failed for user 'pos'"));
        }
        if MockState::take_failure(&self.state.fail_transient) {
            return Err(ConnectError::transient("connection refused"));
        }

        let serial = self.state.opened.fetch_add(1, Ordering::SeqCst) + 1;
        let live = self.state.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_live.fetch_max(live, Ordering::SeqCst);

        Ok(MockSession {
            serial,
            state: self.state.clone(),
        })
    }

    async fn ping(&self, conn: MockSession) -> Result<MockSession, ConnectError> {
        self.state.pings.fetch_add(1, Ordering::SeqCst);

        let delay = self.state.ping_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.state.ping_fails.load(Ordering::SeqCst) {
            return Err(ConnectError::transient("server closed the connection"));
        }
        Ok(conn)
    }

    async fn close(&self, conn: MockSession) {
        drop(conn);
    }
}

/// Small, fast-retrying pool configuration
pub fn test_config(max_size: usize) -> PoolConfig {
    PoolConfig::default()
        .with_max_size(max_size)
        .with_acquire_timeout(Duration::from_secs(2))
        .with_backoff(BackoffConfig {
            initial_delay_ms: 1,
            max_delay_ms: 5,
            multiplier: 2.0,
            jitter_factor: 0.0,
        })
}

pub fn mock_pool(max_size: usize) -> (Pool<MockConnector>, Arc<MockState>) {
    mock_pool_with(test_config(max_size))
}

pub fn mock_pool_with(config: PoolConfig) -> (Pool<MockConnector>, Arc<MockState>) {
    let (connector, state) = MockConnector::new(BackendKind::Postgres);
    (Pool::new(connector, config), state)
}

/// Let background close tasks run
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
