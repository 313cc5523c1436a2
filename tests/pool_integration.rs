//! Pool behaviour against a scripted connector
//!
//! These tests exercise capacity, reuse, liveness, retry and cancellation
//! without a real database.

mod common;

use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio_test::{assert_err, assert_ok};

use sqlbridge::pool::{BackendKind, Pool, PoolError};
use sqlbridge::resilience::{CircuitBreakerConfig, CircuitState};

use common::{mock_pool, mock_pool_with, settle, test_config, MockConnector};

#[tokio::test]
async fn test_exhausted_pool_times_out() {
    let (pool, state) = mock_pool(2);

    let first = assert_ok!(pool.acquire(Duration::from_millis(100)).await);
    let second = assert_ok!(pool.acquire(Duration::from_millis(100)).await);
    assert_ne!(first.id(), second.id());

    let start = Instant::now();
    let err = assert_err!(pool.acquire(Duration::from_millis(100)).await);
    let elapsed = start.elapsed();

    assert!(matches!(
        err,
        PoolError::PoolExhausted { backend: BackendKind::Postgres, .. }
    ));
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(1));
    assert_eq!(state.opened(), 2);
    assert_eq!(pool.stats().exhausted_count, 1);
}

#[tokio::test]
async fn test_released_session_is_reused() {
    let (pool, state) = mock_pool(2);

    let conn = assert_ok!(pool.get().await);
    let id = conn.id();
    let serial = conn.serial;
    assert_ok!(pool.release(conn));

    let status = pool.status();
    assert_eq!(status.idle, 1);
    assert_eq!(status.checked_out, 0);

    let again = assert_ok!(pool.get().await);
    assert_eq!(again.id(), id);
    assert_eq!(again.serial, serial);
    assert_eq!(state.opened(), 1);

    let stats = pool.stats();
    assert_eq!(stats.acquisitions, 2);
    assert_eq!(stats.reused, 1);
}

#[tokio::test]
async fn test_most_recently_released_goes_out_first() {
    let (pool, _state) = mock_pool(3);

    let a = assert_ok!(pool.get().await);
    let b = assert_ok!(pool.get().await);
    let b_id = b.id();
    assert_ok!(pool.release(a));
    assert_ok!(pool.release(b));

    let next = assert_ok!(pool.get().await);
    assert_eq!(next.id(), b_id);
}

#[tokio::test]
async fn test_dropped_guard_returns_session() {
    let (pool, _state) = mock_pool(1);

    {
        let _conn = assert_ok!(pool.get().await);
        assert_eq!(pool.status().checked_out, 1);
    }

    let status = pool.status();
    assert_eq!(status.idle, 1);
    assert_eq!(status.checked_out, 0);
    assert_ok!(pool.acquire(Duration::from_millis(50)).await);
}

#[tokio::test]
async fn test_invalidated_session_is_replaced() {
    let (pool, state) = mock_pool(1);

    let conn = assert_ok!(pool.get().await);
    let id = conn.id();
    pool.invalidate(conn);
    settle().await;

    assert_eq!(pool.status().size(), 0);
    assert_eq!(state.closed(), 1);

    let fresh = assert_ok!(pool.acquire(Duration::from_millis(100)).await);
    assert_ne!(fresh.id(), id);
    assert_eq!(state.opened(), 2);
}

#[tokio::test]
async fn test_marked_invalid_is_discarded_on_drop() {
    let (pool, state) = mock_pool(1);

    let mut conn = assert_ok!(pool.get().await);
    conn.mark_invalid();
    assert!(!conn.is_valid());
    drop(conn);
    settle().await;

    assert_eq!(pool.status().idle, 0);
    assert_eq!(state.closed(), 1);
}

#[tokio::test]
async fn test_waiter_wakes_on_release() {
    let (pool, _state) = mock_pool(1);

    let held = assert_ok!(pool.get().await);
    let held_id = held.id();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire(Duration::from_secs(2)).await.map(|c| c.id()) })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pool.status().waiting, 1);

    let start = Instant::now();
    assert_ok!(pool.release(held));

    let id = assert_ok!(assert_ok!(waiter.await));
    assert_eq!(id, held_id);
    assert!(start.elapsed() < Duration::from_millis(500));
    assert_eq!(pool.status().waiting, 0);
}

#[tokio::test]
async fn test_concurrency_never_exceeds_max_size() {
    let (pool, state) = mock_pool(3);

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let pool = pool.clone();
            tokio::spawn(async move {
                let conn = pool.acquire(Duration::from_secs(5)).await?;
                tokio::time::sleep(Duration::from_millis(10)).await;
                pool.release(conn)
            })
        })
        .collect();

    for outcome in join_all(tasks).await {
        assert_ok!(assert_ok!(outcome));
    }

    assert!(state.max_live() <= 3, "max live was {}", state.max_live());
    assert!(state.opened() <= 3);
    let status = pool.status();
    assert!(status.size() <= 3);
    assert_eq!(status.checked_out, 0);
    assert_eq!(pool.stats().acquisitions, 20);
}

#[tokio::test]
async fn test_stale_session_is_replaced_transparently() {
    let (pool, state) = mock_pool_with(test_config(1).with_liveness_threshold(Duration::ZERO));

    let conn = assert_ok!(pool.get().await);
    let stale_id = conn.id();
    assert_ok!(pool.release(conn));

    state.set_ping_fails(true);
    let conn = assert_ok!(pool.get().await);
    assert_ne!(conn.id(), stale_id);
    assert_eq!(state.opened(), 2);

    let stats = pool.stats();
    assert_eq!(stats.probe_failures, 1);
    assert_eq!(pool.status().size(), 1);
}

#[tokio::test]
async fn test_recently_used_session_skips_probe() {
    let (pool, state) = mock_pool(1);

    let conn = assert_ok!(pool.get().await);
    assert_ok!(pool.release(conn));
    assert_ok!(pool.get().await);

    assert_eq!(state.pings.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let (pool, state) = mock_pool(1);
    state.fail_next_transient(2);

    assert_ok!(pool.get().await);
    assert_eq!(state.connect_calls(), 3);
    assert_eq!(pool.circuit_breaker().state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_fatal_failure_is_not_retried() {
    let (pool, state) = mock_pool(1);
    state.fail_next_fatal(1);

    let err = assert_err!(pool.get().await);
    match err {
        PoolError::BackendUnavailable { backend, reason } => {
            assert_eq!(backend, BackendKind::Postgres);
            assert!(reason.contains("login failed"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(state.connect_calls(), 1);

    // The permit went back with the failure
    assert_ok!(pool.get().await);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let (pool, state) = mock_pool_with(test_config(1).with_connect_retries(2));
    state.fail_next_transient(10);

    let err = assert_err!(pool.get().await);
    assert!(err.is_unavailable());
    assert_eq!(state.connect_calls(), 3);
    assert_eq!(pool.stats().connect_failures, 1);
}

#[tokio::test]
async fn test_circuit_opens_after_repeated_failures() {
    let config = test_config(1).with_circuit_breaker(CircuitBreakerConfig {
        failure_threshold: 2,
        success_threshold: 1,
        reset_timeout_ms: 60_000,
    });
    let (pool, state) = mock_pool_with(config);
    state.fail_next_fatal(5);

    assert_err!(pool.get().await);
    assert_err!(pool.get().await);
    assert_eq!(pool.status().circuit, CircuitState::Open);

    let err = assert_err!(pool.get().await);
    assert!(err.to_string().contains("circuit breaker"));
    assert_eq!(state.connect_calls(), 2);
}

#[tokio::test]
async fn test_slow_connect_is_bounded_by_timeout() {
    let (pool, state) = mock_pool(1);
    state.set_connect_delay(Duration::from_secs(2));

    let start = Instant::now();
    let err = assert_err!(pool.acquire(Duration::from_millis(100)).await);
    assert!(err.is_unavailable());
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_cancelled_wait_leaves_no_trace() {
    let (pool, _state) = mock_pool(1);
    let held = assert_ok!(pool.get().await);

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let _ = pool.acquire(Duration::from_secs(10)).await;
        })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(pool.status().waiting, 1);

    waiter.abort();
    let _ = waiter.await;
    assert_eq!(pool.status().waiting, 0);

    assert_ok!(pool.release(held));
    assert_ok!(pool.acquire(Duration::from_millis(50)).await);
}

#[tokio::test]
async fn test_cancelled_connect_returns_capacity() {
    let (pool, state) = mock_pool(1);
    state.set_connect_delay(Duration::from_millis(500));

    let cancelled = tokio::time::timeout(Duration::from_millis(50), pool.acquire(Duration::from_secs(5))).await;
    assert!(cancelled.is_err());

    let status = pool.status();
    assert_eq!(status.checked_out, 0);
    assert_eq!(status.idle, 0);

    state.set_connect_delay(Duration::ZERO);
    assert_ok!(pool.acquire(Duration::from_millis(200)).await);
}

#[tokio::test]
async fn test_reap_idle_removes_expired_sessions() {
    let (pool, state) = mock_pool_with(test_config(2).with_idle_timeout(Duration::from_millis(10)));

    let conn = assert_ok!(pool.get().await);
    assert_ok!(pool.release(conn));
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(pool.reap_idle().await, 1);
    assert_eq!(pool.status().idle, 0);
    assert_eq!(state.closed(), 1);
}

#[tokio::test]
async fn test_max_lifetime_recycles_sessions() {
    let (pool, state) = mock_pool_with(test_config(1).with_max_lifetime(Duration::from_millis(10)));

    let conn = assert_ok!(pool.get().await);
    let id = conn.id();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_ok!(pool.release(conn));
    settle().await;
    assert_eq!(pool.status().idle, 0);

    let fresh = assert_ok!(pool.get().await);
    assert_ne!(fresh.id(), id);
    assert_eq!(state.opened(), 2);
}

#[tokio::test]
async fn test_replenish_fills_min_idle() {
    let (pool, state) = mock_pool_with(test_config(3).with_min_idle(2));

    assert_eq!(assert_ok!(pool.replenish().await), 2);
    assert_eq!(pool.status().idle, 2);
    assert_eq!(state.opened(), 2);

    assert_eq!(assert_ok!(pool.replenish().await), 0);
}

#[tokio::test]
async fn test_release_into_foreign_pool_is_rejected() {
    let (home, _) = mock_pool(1);
    let (other, _) = mock_pool(1);

    let conn = assert_ok!(home.get().await);
    let err = assert_err!(other.release(conn));
    assert!(matches!(err, PoolError::DoubleRelease { .. }));

    // The session still went back to the pool that issued it
    assert_eq!(home.status().idle, 1);
    assert_eq!(other.status().size(), 0);
}

#[tokio::test]
async fn test_closed_pool_rejects_acquisitions() {
    let (pool, state) = mock_pool(2);

    let held = assert_ok!(pool.get().await);
    let idle = assert_ok!(pool.get().await);
    assert_ok!(pool.release(idle));

    pool.close().await;
    assert!(pool.status().closed);
    assert_eq!(state.closed(), 1);

    let err = assert_err!(pool.acquire(Duration::from_millis(50)).await);
    assert!(err.is_unavailable());

    drop(held);
    settle().await;
    assert_eq!(state.closed(), 2);
    assert_eq!(pool.status().size(), 0);
}

#[tokio::test]
async fn test_sessions_report_their_backend() {
    let (connector, _) = MockConnector::new(BackendKind::SqlServerOdbc);
    let pool = Pool::new(connector, test_config(1));

    let conn = assert_ok!(pool.get().await);
    assert_eq!(conn.kind(), BackendKind::SqlServerOdbc);
    assert_eq!(pool.status().backend, BackendKind::SqlServerOdbc);
}

#[tokio::test]
async fn test_concurrent_callers_beyond_capacity() {
    let (pool, state) = mock_pool(2);

    let start = Instant::now();
    let outcomes = join_all((0..3).map(|_| pool.acquire(Duration::from_millis(100)))).await;
    let elapsed = start.elapsed();

    let granted: Vec<_> = outcomes.iter().filter_map(|o| o.as_ref().ok()).collect();
    assert_eq!(granted.len(), 2);
    assert_ne!(granted[0].id(), granted[1].id());

    let refused: Vec<_> = outcomes.iter().filter_map(|o| o.as_ref().err()).collect();
    assert_eq!(refused.len(), 1);
    assert!(matches!(refused[0], PoolError::PoolExhausted { .. }));

    assert!(elapsed >= Duration::from_millis(100));
    assert_eq!(state.opened(), 2);
    assert_eq!(pool.status().checked_out, 2);
}

#[tokio::test]
async fn test_slow_liveness_check_past_deadline_keeps_sessions() {
    let (pool, state) =
        mock_pool_with(test_config(3).with_liveness_threshold(Duration::ZERO));

    let sessions = vec![
        assert_ok!(pool.get().await),
        assert_ok!(pool.get().await),
        assert_ok!(pool.get().await),
    ];
    for conn in sessions {
        assert_ok!(pool.release(conn));
    }
    assert_eq!(pool.status().idle, 3);

    state.set_ping_delay(Duration::from_millis(50));
    let err = assert_err!(pool.acquire(Duration::from_millis(20)).await);
    assert!(matches!(err, PoolError::PoolExhausted { .. }));

    // Only one session was being probed when the caller gave up
    assert_eq!(state.pings(), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = pool.status();
    assert_eq!(status.idle, 3);
    assert_eq!(status.checked_out, 0);
    assert_eq!(state.opened(), 3);
    assert_eq!(state.closed(), 0);
    assert_eq!(pool.stats().probe_failures, 0);
}

#[tokio::test]
async fn test_cancelled_acquire_during_liveness_check_returns_session() {
    let (pool, state) =
        mock_pool_with(test_config(1).with_liveness_threshold(Duration::ZERO));

    let conn = assert_ok!(pool.get().await);
    let id = conn.id();
    assert_ok!(pool.release(conn));

    state.set_ping_delay(Duration::from_millis(100));
    let cancelled =
        tokio::time::timeout(Duration::from_millis(20), pool.acquire(Duration::from_secs(2))).await;
    assert!(cancelled.is_err());

    // The probe still owns the session
    assert_eq!(pool.status().checked_out, 1);

    tokio::time::sleep(Duration::from_millis(150)).await;
    let status = pool.status();
    assert_eq!(status.idle, 1);
    assert_eq!(status.checked_out, 0);
    assert_eq!(pool.stats().probe_failures, 0);

    state.set_ping_delay(Duration::ZERO);
    let again = assert_ok!(pool.acquire(Duration::from_millis(200)).await);
    assert_eq!(again.id(), id);
    assert_eq!(state.opened(), 1);
}

#[tokio::test]
async fn test_unbounded_timeout_does_not_overflow() {
    let (pool, _state) = mock_pool(1);

    let conn = assert_ok!(pool.acquire(Duration::MAX).await);
    assert_ok!(pool.release(conn));
    assert_ok!(pool.acquire(Duration::MAX).await);
}
