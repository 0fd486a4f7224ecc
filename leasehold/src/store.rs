use std::fmt::Display;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for one acquisition of a lease.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub Uuid);

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaseId {
    /// Create a new lease ID using UUID v7.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Display for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One row of the lease table.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LeaseRecord {
    /// Primary key: the guarded resource name.
    pub resource: String,
    /// Identity of the acquisition that wrote this row.
    pub lease_id: LeaseId,
    /// When the lease was (re-)established.
    pub created_at: DateTime<Utc>,
    /// Instant after which the row no longer blocks other acquirers.
    pub expires_at: DateTime<Utc>,
}

impl LeaseRecord {
    /// A row is live while its expiry lies strictly in the future.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Storage backend for the lease table.
///
/// Both operations must execute as one indivisible statement against the
/// store: callers never read the table and then write based on what they saw.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Write `lease` unless a live row exists for `lease.resource` at
    /// `lease.created_at`. An expired row is superseded.
    ///
    /// Returns the number of rows written: 1 on success, 0 if a live lease
    /// blocked the insert.
    async fn try_insert(&self, lease: &LeaseRecord) -> anyhow::Result<u64>;

    /// Delete the row for `resource` written by `lease_id`.
    ///
    /// Deliberately narrower than a plain delete by primary key: a holder
    /// whose row expired and was taken over must not remove its successor's
    /// lease.
    ///
    /// Returns the number of rows deleted. Zero is not an error: the lease
    /// was already released or superseded after expiring.
    async fn delete(&self, resource: &str, lease_id: LeaseId) -> anyhow::Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_lease_id_display() {
        let id = LeaseId::new();
        let s = id.to_string();
        assert!(!s.is_empty());
    }

    #[test]
    fn test_record_liveness_boundary() {
        let now = Utc::now();
        let record = LeaseRecord {
            resource: "agg".into(),
            lease_id: LeaseId::new(),
            created_at: now,
            expires_at: now + TimeDelta::milliseconds(200),
        };

        assert!(record.is_live(now));
        assert!(record.is_live(now + TimeDelta::milliseconds(199)));
        assert!(!record.is_live(now + TimeDelta::milliseconds(200)));
    }
}
