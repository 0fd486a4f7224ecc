//! PostgreSQL lease table tests.
//!
//! Requires a running Postgres instance reachable through `DATABASE_URL`.
//! Run with: `cargo test --test postgres_lease_store --features postgres -- --ignored`

#![cfg(feature = "postgres")]

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use leasehold::{
    CancellationSignal, LeaseId, LeaseLock, LeaseRecord, LeaseStore, LockConfig,
    PersistenceConfig, PostgresLeaseStore,
};
use uuid::Uuid;

async fn fresh_store() -> PostgresLeaseStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let prefix = format!("t{}_", Uuid::new_v4().simple());
    let config = LockConfig::default().with_table_prefix(prefix);
    PostgresLeaseStore::connect(&PersistenceConfig::new(url), &config)
        .await
        .expect("connect and prepare schema")
}

async fn drop_table(store: &PostgresLeaseStore) {
    sqlx::query(&format!("DROP TABLE IF EXISTS {}", store.table()))
        .execute(store.pool())
        .await
        .unwrap();
}

fn record(resource: &str, ttl: TimeDelta) -> LeaseRecord {
    let now = Utc::now();
    LeaseRecord {
        resource: resource.to_string(),
        lease_id: LeaseId::new(),
        created_at: now,
        expires_at: now + ttl,
    }
}

#[tokio::test]
#[ignore]
async fn test_live_row_blocks_and_expired_row_is_replaced() {
    let store = fresh_store().await;

    let first = record("agg", TimeDelta::milliseconds(200));
    assert_eq!(store.try_insert(&first).await.unwrap(), 1);
    assert_eq!(store.try_insert(&record("agg", TimeDelta::seconds(1))).await.unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(250)).await;
    let second = record("agg", TimeDelta::seconds(1));
    assert_eq!(store.try_insert(&second).await.unwrap(), 1);

    let row = store.current("agg").await.unwrap().unwrap();
    assert_eq!(row.lease_id, second.lease_id);

    assert_eq!(store.delete("agg", first.lease_id).await.unwrap(), 0);
    assert_eq!(store.delete("agg", second.lease_id).await.unwrap(), 1);
    assert!(store.current("agg").await.unwrap().is_none());

    drop_table(&store).await;
}

#[tokio::test]
#[ignore]
async fn test_ensure_schema_is_repeatable() {
    let store = fresh_store().await;
    store.ensure_schema().await.unwrap();
    drop_table(&store).await;
}

#[tokio::test]
#[ignore]
async fn test_two_locks_share_one_table() {
    let store = Arc::new(fresh_store().await);
    let a = LeaseLock::new(store.clone(), LockConfig::default()).unwrap();
    let b = LeaseLock::new(store.clone(), LockConfig::default()).unwrap();
    let cancel = CancellationSignal::new();

    let mut held = a
        .acquire("queue:default", Duration::from_secs(5), &cancel)
        .await
        .unwrap();
    let blocked = b
        .acquire("queue:default", Duration::from_millis(300), &cancel)
        .await
        .unwrap_err();
    assert!(blocked.is_timeout());

    held.release().await.unwrap();
    let mut next = b
        .acquire("queue:default", Duration::from_secs(1), &cancel)
        .await
        .unwrap();
    next.release().await.unwrap();

    drop_table(&store).await;
}
