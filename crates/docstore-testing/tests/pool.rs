//! Pool-dependent integration tests.
//!
//! Every test drives a real pool against the in-memory stub connector; the
//! monitoring collaborator is played by direct `ready`/`clear`/`close`
//! calls. Timing-sensitive tests run under a paused clock.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use docstore_driver_pool::{
    CloseReason, ConnectionError, Connector, Error, Pool, PoolBuilder, PoolEventKind,
    PoolListener, PoolState, ServerAddress,
};
use docstore_testing::{EventRecorder, StubConnector};

fn address() -> ServerAddress {
    ServerAddress::new("db.example.com", 7070)
}

fn build_with(
    connector: StubConnector,
    configure: impl FnOnce(PoolBuilder) -> PoolBuilder,
) -> (Pool, Arc<StubConnector>, Arc<EventRecorder>) {
    let connector = Arc::new(connector);
    let recorder = Arc::new(EventRecorder::new());
    let builder = Pool::builder()
        .address(address())
        .connector(Arc::clone(&connector) as Arc<dyn Connector>)
        .listener(Arc::clone(&recorder) as Arc<dyn PoolListener>);
    let pool = configure(builder).build().unwrap();
    (pool, connector, recorder)
}

/// Poll `condition` until it holds, advancing time between polls.
async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_checkout_from_closed_pool_fails_without_queuing() {
    let (pool, _, _) = build_with(StubConnector::new(), |b| b);
    pool.ready();
    pool.close();

    let err = pool.check_out().await.unwrap_err();
    assert!(matches!(err, Error::PoolClosed { .. }));
    assert!(!err.is_retryable());
    assert_eq!(pool.status().waiting, 0);
}

#[tokio::test]
async fn test_checkout_from_paused_pool_establishes() {
    // Only `closed` gates checkout; a freshly constructed (paused) pool
    // serves on demand, it just is not warmed proactively.
    let (pool, _, _) = build_with(StubConnector::new(), |b| b);
    assert_eq!(pool.state(), PoolState::Paused);

    let conn = pool.check_out().await.unwrap();
    assert_eq!(conn.generation(), 0);
    drop(conn);
    pool.close();
}

#[tokio::test]
async fn test_reuse_under_capacity_hands_same_connection() {
    let (pool, connector, _) = build_with(StubConnector::new(), |b| b.max_pool_size(1));
    pool.ready();

    let first = pool.check_out().await.unwrap();
    let first_id = first.id();

    let second = tokio::spawn({
        let pool = pool.clone();
        async move { pool.check_out().await }
    });
    wait_until(|| pool.status().waiting == 1).await;

    drop(first);
    let second = second.await.unwrap().unwrap();
    assert_eq!(second.id(), first_id);
    assert_eq!(second.generation(), 0);
    assert_eq!(connector.connect_count(), 1);

    drop(second);
    pool.close();
}

#[tokio::test]
async fn test_fifo_fairness_serves_earliest_waiter_first() {
    let (pool, _, _) = build_with(StubConnector::new(), |b| b.max_pool_size(1));
    pool.ready();
    let held = pool.check_out().await.unwrap();

    let a = tokio::spawn({
        let pool = pool.clone();
        async move { pool.check_out().await }
    });
    wait_until(|| pool.status().waiting == 1).await;
    let b = tokio::spawn({
        let pool = pool.clone();
        async move { pool.check_out().await }
    });
    wait_until(|| pool.status().waiting == 2).await;

    drop(held);
    let a_conn = a.await.unwrap().unwrap();
    assert!(!b.is_finished());
    assert_eq!(pool.status().waiting, 1);

    drop(a_conn);
    let b_conn = b.await.unwrap().unwrap();
    drop(b_conn);
    pool.close();
}

#[tokio::test(start_paused = true)]
async fn test_wait_queue_timeout_fires_at_deadline_not_before() {
    let (pool, _, _) = build_with(StubConnector::new(), |b| {
        b.max_pool_size(1)
            .wait_queue_timeout(Duration::from_millis(50))
    });
    pool.ready();
    let held = pool.check_out().await.unwrap();

    let started = tokio::time::Instant::now();
    let err = pool.check_out().await.unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(50));
    match err {
        Error::WaitQueueTimeout { address, waited } => {
            assert_eq!(address, self::address());
            assert!(waited >= Duration::from_millis(50));
        }
        other => panic!("expected wait-queue timeout, got {other}"),
    }
    assert_eq!(pool.status().waiting, 0);
    drop(held);
    pool.close();
}

#[tokio::test]
async fn test_close_drains_queue_and_rejects_new_checkouts() {
    let (pool, connector, _) = build_with(StubConnector::new(), |b| b.max_pool_size(1));
    pool.ready();
    let held = pool.check_out().await.unwrap();

    let a = tokio::spawn({
        let pool = pool.clone();
        async move { pool.check_out().await }
    });
    wait_until(|| pool.status().waiting == 1).await;
    let b = tokio::spawn({
        let pool = pool.clone();
        async move { pool.check_out().await }
    });
    wait_until(|| pool.status().waiting == 2).await;

    pool.close();
    assert!(matches!(
        a.await.unwrap().unwrap_err(),
        Error::PoolClosed { .. }
    ));
    assert!(matches!(
        b.await.unwrap().unwrap_err(),
        Error::PoolClosed { .. }
    ));

    let err = pool.check_out().await.unwrap_err();
    assert!(matches!(err, Error::PoolClosed { .. }));
    assert_eq!(pool.status().waiting, 0);

    // The held connection is destroyed at its check-in.
    drop(held);
    assert_eq!(connector.shutdown_count(), 1);
}

#[tokio::test]
async fn test_partial_clear_destroys_idle_and_stales_in_use() {
    let (pool, connector, _) = build_with(StubConnector::new(), |b| b.max_pool_size(3));
    pool.ready();

    let c1 = pool.check_out().await.unwrap();
    let c2 = pool.check_out().await.unwrap();
    let c3 = pool.check_out().await.unwrap();
    drop(c1);
    drop(c2);
    let before = pool.status();
    assert_eq!(before.idle, 2);
    assert_eq!(before.in_use, 1);

    pool.clear(ConnectionError::Reset, false);

    let status = pool.status();
    assert_eq!(status.state, PoolState::Paused);
    assert_eq!(status.generation, 1);
    assert_eq!(status.idle, 0);
    assert_eq!(status.in_use, 1);
    assert_eq!(connector.shutdown_count(), 2);
    assert!(!c3.is_interrupted());

    // Stale, so destroyed at check-in rather than returned to idle.
    drop(c3);
    let status = pool.status();
    assert_eq!(status.idle, 0);
    assert_eq!(status.in_use, 0);
    assert_eq!(connector.shutdown_count(), 3);
    pool.close();
}

#[tokio::test]
async fn test_clear_with_interrupt_severs_checked_out_links() {
    let (pool, connector, _) = build_with(StubConnector::new(), |b| b.max_pool_size(2));
    pool.ready();
    let held = pool.check_out().await.unwrap();
    assert!(!held.is_interrupted());

    pool.clear(ConnectionError::Timeout, true);
    assert!(held.is_interrupted());
    // Resolves immediately once the link is severed.
    held.interrupted().await;

    drop(held);
    assert_eq!(connector.shutdown_count(), 1);
    pool.close();
}

#[tokio::test]
async fn test_clear_fails_waiters_fast_with_retry_label() {
    let (pool, _, _) = build_with(StubConnector::new(), |b| b.max_pool_size(1));
    pool.ready();
    let held = pool.check_out().await.unwrap();

    let waiter = tokio::spawn({
        let pool = pool.clone();
        async move { pool.check_out().await }
    });
    wait_until(|| pool.status().waiting == 1).await;

    pool.clear(ConnectionError::Reset, false);
    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::PoolCleared { .. }));
    assert!(err.is_retryable());
    assert_eq!(err.address(), Some(&address()));

    drop(held);
    pool.close();
}

#[tokio::test]
async fn test_monitor_clear_rejects_waiters_with_network_variant() {
    let (pool, _, _) = build_with(StubConnector::new(), |b| b.max_pool_size(1));
    pool.ready();
    let held = pool.check_out().await.unwrap();

    let waiter = tokio::spawn({
        let pool = pool.clone();
        async move { pool.check_out().await }
    });
    wait_until(|| pool.status().waiting == 1).await;

    pool.clear(ConnectionError::Reset, true);
    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::PoolClearedOnNetworkError { .. }));
    assert!(err.is_retryable());

    drop(held);
    pool.close();
}

#[tokio::test]
async fn test_check_in_with_network_error_clears_pool() {
    let (pool, connector, _) = build_with(StubConnector::new(), |b| b);
    pool.ready();
    let conn = pool.check_out().await.unwrap();

    conn.check_in_with_error(ConnectionError::Reset);

    let status = pool.status();
    assert_eq!(status.state, PoolState::Paused);
    assert_eq!(status.generation, 1);
    assert_eq!(status.idle, 0);
    assert!(pool.server_error().is_some());
    assert_eq!(connector.shutdown_count(), 1);

    pool.ready();
    assert_eq!(pool.state(), PoolState::Ready);
    assert!(pool.server_error().is_none());
    pool.close();
}

#[tokio::test]
async fn test_check_in_with_local_error_destroys_without_clearing() {
    let (pool, connector, _) = build_with(StubConnector::new(), |b| b);
    pool.ready();
    let conn = pool.check_out().await.unwrap();
    let first_id = conn.id();

    conn.check_in_with_error(ConnectionError::Handshake("command failed".into()));

    let status = pool.status();
    assert_eq!(status.state, PoolState::Ready);
    assert_eq!(status.generation, 0);
    assert_eq!(status.idle, 0);
    assert!(pool.server_error().is_none());
    assert_eq!(connector.shutdown_count(), 1);

    // The pool simply creates another on the next checkout.
    let replacement = pool.check_out().await.unwrap();
    assert_ne!(replacement.id(), first_id);
    drop(replacement);
    pool.close();
}

#[tokio::test]
async fn test_failed_establishment_propagates_and_releases_slot() {
    let (pool, connector, _) = build_with(StubConnector::new(), |b| b.max_pool_size(1));
    connector.fail_next(ConnectionError::Handshake("bad credentials".into()));
    pool.ready();

    let err = pool.check_out().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Connection(ConnectionError::Handshake(_))
    ));
    assert!(!err.is_retryable());
    assert_eq!(pool.status().pending, 0);

    // The slot was released, so the retry can establish.
    let conn = pool.check_out().await.unwrap();
    assert_eq!(conn.generation(), 0);
    assert_eq!(connector.connect_count(), 2);
    drop(conn);
    pool.close();
}

#[tokio::test(start_paused = true)]
async fn test_waiter_promoted_when_establishment_fails_elsewhere() {
    let (pool, connector, _) = build_with(
        StubConnector::with_delay(Duration::from_millis(10)),
        |b| b.max_pool_size(1),
    );
    connector.fail_next(ConnectionError::Reset);
    pool.ready();

    let first = tokio::spawn({
        let pool = pool.clone();
        async move { pool.check_out().await }
    });
    wait_until(|| pool.status().pending == 1).await;
    let second = tokio::spawn({
        let pool = pool.clone();
        async move { pool.check_out().await }
    });
    wait_until(|| pool.status().waiting == 1).await;

    // The failed establishment opens the slot; the queued checkout is
    // promoted to run its own.
    let err = first.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Connection(ConnectionError::Reset)));

    let conn = second.await.unwrap().unwrap();
    assert_eq!(conn.generation(), 0);
    assert_eq!(connector.connect_count(), 2);
    drop(conn);
    pool.close();
}

#[tokio::test(start_paused = true)]
async fn test_clear_during_establishment_discards_fresh_connection() {
    let (pool, connector, _) = build_with(
        StubConnector::with_delay(Duration::from_millis(10)),
        |b| b.max_pool_size(1),
    );
    pool.ready();

    let checkout = tokio::spawn({
        let pool = pool.clone();
        async move { pool.check_out().await }
    });
    wait_until(|| pool.status().pending == 1).await;

    pool.clear(ConnectionError::Reset, false);

    // Establishment completes against the bumped generation: the fresh
    // connection is destroyed unused and the checkout parks in the queue.
    wait_until(|| pool.status().waiting == 1).await;
    assert_eq!(pool.status().pending, 0);
    assert_eq!(connector.shutdown_count(), 1);

    pool.ready();
    let conn = checkout.await.unwrap().unwrap();
    assert_eq!(conn.generation(), 1);
    assert_eq!(pool.status().generation, 1);
    drop(conn);
    pool.close();
}

#[tokio::test]
async fn test_close_is_idempotent_and_emits_once() {
    let (pool, _, recorder) = build_with(StubConnector::new(), |b| b);
    pool.ready();
    pool.close();
    assert_eq!(pool.state(), PoolState::Closed);
    let events_after_first = recorder.len();

    pool.close();
    assert_eq!(pool.state(), PoolState::Closed);
    assert_eq!(recorder.len(), events_after_first);
}

#[tokio::test]
async fn test_event_stream_for_basic_lifecycle() {
    let (pool, _, recorder) = build_with(StubConnector::new(), |b| b);
    pool.ready();
    let conn = pool.check_out().await.unwrap();
    let id = conn.id();
    drop(conn);
    pool.close();

    assert_eq!(
        recorder.kinds(),
        vec![
            PoolEventKind::PoolCreated,
            PoolEventKind::PoolReady,
            PoolEventKind::CheckoutStarted,
            PoolEventKind::ConnectionCreated { id },
            PoolEventKind::ConnectionCheckedOut { id },
            PoolEventKind::ConnectionCheckedIn { id },
            PoolEventKind::ConnectionClosed {
                id,
                reason: CloseReason::PoolClosed,
            },
            PoolEventKind::PoolClosed,
        ]
    );

    // Every event is stamped with the pool's address.
    assert!(
        recorder
            .events()
            .iter()
            .all(|event| event.address == address())
    );
}

#[tokio::test(start_paused = true)]
async fn test_maintainer_warms_ready_pool_to_minimum() {
    let (pool, connector, _) = build_with(StubConnector::new(), |b| {
        b.min_pool_size(2)
            .maintenance_interval(Duration::from_millis(10))
    });

    // Paused pools are never warmed.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pool.status().idle, 0);
    assert_eq!(connector.connect_count(), 0);

    pool.ready();
    wait_until(|| pool.status().idle == 2).await;
    assert_eq!(connector.connect_count(), 2);

    // Further cycles do not overfill.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pool.status().idle, 2);
    assert_eq!(connector.connect_count(), 2);

    // Warm connections carry the current generation and are reused.
    let a = pool.check_out().await.unwrap();
    let b = pool.check_out().await.unwrap();
    assert_eq!(a.generation(), pool.status().generation);
    assert_eq!(b.generation(), pool.status().generation);
    assert_eq!(connector.connect_count(), 2);
    drop(a);
    drop(b);
    pool.close();
}

#[tokio::test(start_paused = true)]
async fn test_maintainer_evicts_idle_expired_connections() {
    let (pool, connector, recorder) = build_with(StubConnector::new(), |b| {
        b.max_idle_time(Duration::from_millis(50))
            .maintenance_interval(Duration::from_millis(20))
    });
    pool.ready();
    let conn = pool.check_out().await.unwrap();
    drop(conn);
    assert_eq!(pool.status().idle, 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    wait_until(|| pool.status().idle == 0).await;
    assert_eq!(connector.shutdown_count(), 1);
    assert_eq!(
        recorder.count(|kind| matches!(
            kind,
            PoolEventKind::ConnectionClosed {
                reason: CloseReason::Idle,
                ..
            }
        )),
        1
    );
    pool.close();
}

#[tokio::test]
async fn test_checked_out_generation_tracks_pool_generation() {
    let (pool, _, _) = build_with(StubConnector::new(), |b| b);
    pool.ready();

    let conn = pool.check_out().await.unwrap();
    assert_eq!(conn.generation(), 0);
    drop(conn);

    pool.clear(ConnectionError::Reset, false);
    pool.ready();

    let conn = pool.check_out().await.unwrap();
    assert_eq!(conn.generation(), 1);
    assert_eq!(pool.status().generation, 1);
    drop(conn);
    pool.close();
}

#[tokio::test]
async fn test_detach_removes_connection_from_pool_accounting() {
    let (pool, connector, _) = build_with(StubConnector::new(), |b| b.max_pool_size(1));
    pool.ready();

    let guard = pool.check_out().await.unwrap();
    let first_id = guard.id();
    let mut detached = guard.detach();

    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.idle, 0);

    // Capacity was freed, so a replacement can be established.
    let replacement = pool.check_out().await.unwrap();
    assert_ne!(replacement.id(), first_id);
    drop(replacement);

    // Closing the detached connection is the caller's job now.
    assert!(detached.transport().is_some());
    drop(detached);
    assert_eq!(connector.shutdown_count(), 1);

    pool.close();
    assert_eq!(connector.shutdown_count(), 2);
}

#[tokio::test]
async fn test_metrics_track_connection_lifecycle() {
    let (pool, _, _) = build_with(StubConnector::new(), |b| b);
    pool.ready();

    let conn = pool.check_out().await.unwrap();
    drop(conn);
    pool.clear(ConnectionError::Reset, false);

    let metrics = pool.metrics();
    assert_eq!(metrics.connections_created, 1);
    assert_eq!(metrics.connections_closed, 1);
    assert_eq!(metrics.checkouts_successful, 1);
    assert_eq!(metrics.checkouts_failed, 0);
    assert!((metrics.checkout_success_rate() - 1.0).abs() < f64::EPSILON);
    pool.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_capacity_bound_holds_under_concurrent_checkouts() {
    let (pool, _, _) = build_with(StubConnector::new(), |b| {
        b.max_pool_size(4)
            .wait_queue_timeout(Duration::from_secs(5))
    });
    pool.ready();

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..25 {
                let conn = pool.check_out().await.unwrap();
                tokio::time::sleep(Duration::from_micros(50)).await;
                drop(conn);
            }
        }));
    }

    for _ in 0..200 {
        let status = pool.status();
        assert!(status.idle + status.in_use + status.pending <= status.max);
        tokio::time::sleep(Duration::from_micros(20)).await;
    }
    for task in tasks {
        task.await.unwrap();
    }

    let status = pool.status();
    assert!(status.idle + status.in_use + status.pending <= status.max);
    let metrics = pool.metrics();
    assert_eq!(metrics.checkouts_successful, 16 * 25);
    assert_eq!(metrics.checkouts_failed, 0);
    pool.close();
}
