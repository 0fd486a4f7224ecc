use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use leasehold::{InMemoryLeaseStore, LeaseId, LeaseRecord, LeaseStore};
use parking_lot::Mutex;

/// Lease table that records what the lock asked of it.
///
/// Wraps an [`InMemoryLeaseStore`]. Every call is counted; inserts can be
/// made to fail, and the highest number of overlapping inserts is tracked
/// so tests can check that the guard serializes them.
#[derive(Clone, Debug, Default)]
pub struct RecordingLeaseStore {
    inner: InMemoryLeaseStore,
    inserts: Arc<AtomicU64>,
    deletes: Arc<AtomicU64>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    insert_failure: Arc<Mutex<Option<String>>>,
}

impl RecordingLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The underlying table.
    pub fn table(&self) -> &InMemoryLeaseStore {
        &self.inner
    }

    pub fn insert_calls(&self) -> u64 {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> u64 {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Most inserts that were ever running at the same time.
    pub fn max_concurrent_inserts(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Make every following insert fail with `message`.
    pub fn fail_inserts(&self, message: impl Into<String>) {
        *self.insert_failure.lock() = Some(message.into());
    }

    pub fn clear_failure(&self) {
        *self.insert_failure.lock() = None;
    }
}

#[async_trait]
impl LeaseStore for RecordingLeaseStore {
    async fn try_insert(&self, lease: &LeaseRecord) -> anyhow::Result<u64> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.insert_failure.lock().clone() {
            anyhow::bail!(message);
        }

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        tokio::task::yield_now().await;
        let result = self.inner.try_insert(lease).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn delete(&self, resource: &str, lease_id: LeaseId) -> anyhow::Result<u64> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(resource, lease_id).await
    }
}
