use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use crate::store::{LeaseId, LeaseRecord, LeaseStore};

/// Lease table kept in process memory.
///
/// Each operation runs under a single mutex, which gives the same atomicity
/// as the SQL backends. Clones share the table.
#[derive(Clone, Debug, Default)]
pub struct InMemoryLeaseStore {
    rows: Arc<Mutex<HashMap<String, LeaseRecord>>>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current row for `resource`, live or not.
    pub fn row(&self, resource: &str) -> Option<LeaseRecord> {
        self.rows.lock().get(resource).cloned()
    }

    /// Number of rows, including expired ones not yet superseded.
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn try_insert(&self, lease: &LeaseRecord) -> anyhow::Result<u64> {
        let mut rows = self.rows.lock();
        if let Some(existing) = rows.get(&lease.resource) {
            if existing.is_live(lease.created_at) {
                trace!(resource = %lease.resource, holder = %existing.lease_id, "lease row is live");
                return Ok(0);
            }
        }
        rows.insert(lease.resource.clone(), lease.clone());
        Ok(1)
    }

    async fn delete(&self, resource: &str, lease_id: LeaseId) -> anyhow::Result<u64> {
        let mut rows = self.rows.lock();
        match rows.get(resource) {
            Some(existing) if existing.lease_id == lease_id => {
                rows.remove(resource);
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}
