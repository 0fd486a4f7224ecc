//! Lock integration tests under simulated time.
//!
//! Covers mutual exclusion, expiry takeover, idempotent release,
//! cancellation, ordered batch acquisition and store failures.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::TimeDelta;
use leasehold::{
    CancellationSignal, Clock, InMemoryLeaseStore, LeaseId, LeaseLock, LeaseRecord, LeaseState,
    LeaseStore, LockConfig, LockError, ResourceKey, ResourceKind,
};
use leasehold_testkit::{ManualClock, RecordingLeaseStore, TokioClock};
use tokio::time::Instant;

fn lock_over(store: &RecordingLeaseStore) -> LeaseLock {
    LeaseLock::builder(Arc::new(store.clone()))
        .with_clock(Arc::new(TokioClock::new()))
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_only_one_holder_at_a_time() {
    let store = RecordingLeaseStore::new();
    let lock = lock_over(&store);
    let holders = Arc::new(AtomicUsize::new(0));
    let max_holders = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let lock = lock.clone();
        let holders = holders.clone();
        let max_holders = max_holders.clone();
        tasks.push(tokio::spawn(async move {
            let cancel = CancellationSignal::new();
            let mut lease = lock
                .acquire("queue:default", Duration::from_secs(5), &cancel)
                .await?;
            let now_holding = holders.fetch_add(1, Ordering::SeqCst) + 1;
            max_holders.fetch_max(now_holding, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            holders.fetch_sub(1, Ordering::SeqCst);
            lease.release().await
        }));
    }

    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_eq!(max_holders.load(Ordering::SeqCst), 1);
    assert_eq!(store.max_concurrent_inserts(), 1);
    assert!(store.table().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_waiter_acquires_after_holder_releases() {
    let store = RecordingLeaseStore::new();
    let lock = lock_over(&store);
    let start = Instant::now();

    let mut first = lock
        .acquire("queue:default", Duration::from_secs(2), &CancellationSignal::new())
        .await
        .unwrap();
    assert!(start.elapsed() < Duration::from_millis(100));

    let waiter = {
        let lock = lock.clone();
        tokio::spawn(async move {
            let lease = lock
                .acquire("queue:default", Duration::from_secs(2), &CancellationSignal::new())
                .await;
            (lease, start.elapsed())
        })
    };

    tokio::time::sleep(Duration::from_millis(500)).await;
    first.release().await.unwrap();

    let (second, waited) = waiter.await.unwrap();
    let second = second.unwrap();
    assert!(second.is_held());
    assert!(waited >= Duration::from_millis(500), "acquired too early: {waited:?}");
    assert!(waited <= Duration::from_millis(600), "acquired too late: {waited:?}");
    assert_eq!(
        store.table().row("queue:default").unwrap().lease_id,
        second.lease_id()
    );
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_lease_is_taken_over_after_expiry() {
    let store = RecordingLeaseStore::new();
    let lock = lock_over(&store);
    let start = Instant::now();

    let crashed = lock
        .acquire("agg", Duration::from_millis(200), &CancellationSignal::new())
        .await
        .unwrap();
    let crashed_id = crashed.lease_id();
    std::mem::forget(crashed);

    let early = lock
        .acquire("agg", Duration::from_millis(150), &CancellationSignal::new())
        .await
        .unwrap_err();
    assert!(early.is_timeout());
    assert_eq!(store.table().row("agg").unwrap().lease_id, crashed_id);

    let taker = lock
        .acquire("agg", Duration::from_secs(1), &CancellationSignal::new())
        .await
        .unwrap();
    let waited = start.elapsed();
    assert!(waited >= Duration::from_millis(200), "took over too early: {waited:?}");
    assert!(waited <= Duration::from_millis(300), "took over too late: {waited:?}");
    assert_eq!(store.table().row("agg").unwrap().lease_id, taker.lease_id());
    assert_eq!(store.table().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_release_is_idempotent() {
    let store = RecordingLeaseStore::new();
    let lock = lock_over(&store);

    let mut lease = lock
        .acquire("counter:stats", Duration::from_secs(1), &CancellationSignal::new())
        .await
        .unwrap();
    lease.release().await.unwrap();
    lease.release().await.unwrap();
    lock.release(&mut lease).await.unwrap();

    assert_eq!(lease.state(), LeaseState::Released);
    assert_eq!(store.delete_calls(), 1);
    assert!(store.table().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_release_without_row_succeeds() {
    let store = RecordingLeaseStore::new();
    let lock = lock_over(&store);

    let mut lease = lock
        .acquire("hash:user", Duration::from_millis(100), &CancellationSignal::new())
        .await
        .unwrap();

    // Expire the row and let another acquirer replace it.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let successor = lock
        .acquire("hash:user", Duration::from_secs(1), &CancellationSignal::new())
        .await
        .unwrap();

    lease.release().await.unwrap();
    assert_eq!(store.table().len(), 1);
    assert_eq!(
        store.table().row("hash:user").unwrap().lease_id,
        successor.lease_id()
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_waiting_within_one_poll() {
    let store = RecordingLeaseStore::new();
    let lock = lock_over(&store);
    let holder = lock
        .acquire("job:42", Duration::from_secs(10), &CancellationSignal::new())
        .await
        .unwrap();

    let cancel = CancellationSignal::new();
    let start = Instant::now();
    let waiter = {
        let lock = lock.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let res = lock.acquire("job:42", Duration::from_secs(5), &cancel).await;
            (res, start.elapsed())
        })
    };

    tokio::time::sleep(Duration::from_millis(250)).await;
    cancel.cancel();

    let (res, elapsed) = waiter.await.unwrap();
    match res {
        Err(LockError::Cancelled { resource }) => assert_eq!(resource, "job:42"),
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert!(elapsed <= Duration::from_millis(350), "cancel took {elapsed:?}");
    assert_eq!(store.table().len(), 1);
    assert_eq!(
        store.table().row("job:42").unwrap().lease_id,
        holder.lease_id()
    );
}

#[tokio::test(start_paused = true)]
async fn test_store_failure_is_not_retried() {
    let store = RecordingLeaseStore::new();
    store.fail_inserts("connection reset");
    let lock = lock_over(&store);

    let err = lock
        .acquire("list:recent", Duration::from_secs(2), &CancellationSignal::new())
        .await
        .unwrap_err();

    assert!(matches!(err, LockError::Store(_)));
    assert_eq!(err.reason(), "store");
    assert_eq!(store.insert_calls(), 1);

    store.clear_failure();
    let lease = lock
        .acquire("list:recent", Duration::from_secs(2), &CancellationSignal::new())
        .await
        .unwrap();
    assert!(lease.is_held());
}

#[tokio::test(start_paused = true)]
async fn test_opposite_batch_orders_do_not_deadlock() {
    let store = RecordingLeaseStore::new();
    let lock = lock_over(&store);

    let batches = [
        vec![
            ResourceKey::new(ResourceKind::Queue, "queue:default"),
            ResourceKey::new(ResourceKind::Job, "job:1"),
        ],
        vec![
            ResourceKey::new(ResourceKind::Job, "job:1"),
            ResourceKey::new(ResourceKind::Queue, "queue:default"),
        ],
    ];

    let mut tasks = Vec::new();
    for keys in batches {
        let lock = lock.clone();
        tasks.push(tokio::spawn(async move {
            let mut set = lock
                .acquire_many(keys, Duration::from_secs(5), &CancellationSignal::new())
                .await?;
            tokio::time::sleep(Duration::from_millis(50)).await;
            set.release().await
        }));
    }

    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert!(store.table().is_empty());
}

#[tokio::test]
async fn test_manual_clock_drives_polling() {
    let clock = ManualClock::new();
    let table = InMemoryLeaseStore::new();
    let start = clock.now();
    table
        .try_insert(&LeaseRecord {
            resource: "set:tags".into(),
            lease_id: LeaseId::new(),
            created_at: start,
            expires_at: start + TimeDelta::milliseconds(300),
        })
        .await
        .unwrap();

    let lock = LeaseLock::builder(Arc::new(table.clone()))
        .with_clock(Arc::new(clock.clone()))
        .build()
        .unwrap();
    let lease = lock
        .acquire("set:tags", Duration::from_secs(1), &CancellationSignal::new())
        .await
        .unwrap();

    assert_eq!(clock.sleeps(), vec![Duration::from_millis(100); 3]);
    assert_eq!(lease.acquired_at(), start + TimeDelta::milliseconds(300));
    assert_eq!(lease.expires_at(), start + TimeDelta::milliseconds(1300));
}

#[tokio::test]
async fn test_manual_clock_timeout_counts_attempts() {
    let clock = ManualClock::new();
    let store = RecordingLeaseStore::new();
    let start = clock.now();
    store
        .table()
        .try_insert(&LeaseRecord {
            resource: "queue:critical".into(),
            lease_id: LeaseId::new(),
            created_at: start,
            expires_at: start + TimeDelta::seconds(10),
        })
        .await
        .unwrap();

    let lock = LeaseLock::builder(Arc::new(store.clone()))
        .with_clock(Arc::new(clock.clone()))
        .with_config(LockConfig::default().with_poll_interval(100))
        .build()
        .unwrap();
    let err = lock
        .acquire("queue:critical", Duration::from_millis(350), &CancellationSignal::new())
        .await
        .unwrap_err();

    match err {
        LockError::Timeout { resource, timeout } => {
            assert_eq!(resource, "queue:critical");
            assert_eq!(timeout, Duration::from_millis(350));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(store.insert_calls(), 4);
    clock.assert_sleep_count_eq(4);
}
