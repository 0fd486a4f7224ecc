//! Error types for lease acquisition and configuration.

use std::time::Duration;

use thiserror::Error;

use crate::resource::ResourceKind;

/// Errors surfaced by [`crate::LeaseLock`].
#[derive(Debug, Error)]
pub enum LockError {
    /// No lease could be established before the deadline.
    #[error("timed out after {timeout:?} waiting for lock on `{resource}`")]
    Timeout { resource: String, timeout: Duration },
    /// The caller's cancellation signal fired during acquisition.
    #[error("acquisition of lock on `{resource}` was cancelled")]
    Cancelled { resource: String },
    /// A lease with no lifetime would never block anyone.
    #[error("lease on `{resource}` needs a non-zero ttl")]
    ZeroTtl { resource: String },
    /// The lease store failed; not retried.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl LockError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, LockError::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, LockError::Cancelled { .. })
    }

    /// Short label used for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            LockError::Timeout { .. } => "timeout",
            LockError::Cancelled { .. } => "cancelled",
            LockError::ZeroTtl { .. } => "zero_ttl",
            LockError::Store(_) => "store",
        }
    }
}

/// Errors raised while waiting for a [`crate::ResourceGuard`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("timed out after {timeout:?} waiting for {kind} guard")]
    Timeout { kind: ResourceKind, timeout: Duration },
    #[error("wait for {kind} guard was cancelled")]
    Cancelled { kind: ResourceKind },
}

impl GuardError {
    /// Re-expresses a guard failure as the equivalent lock failure.
    pub(crate) fn into_lock_error(
        self,
        resource: &str,
        timeout: Duration,
    ) -> LockError {
        match self {
            GuardError::Timeout { .. } => LockError::Timeout {
                resource: resource.to_string(),
                timeout,
            },
            GuardError::Cancelled { .. } => LockError::Cancelled {
                resource: resource.to_string(),
            },
        }
    }
}

/// Invalid [`crate::LockConfig`] values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("table prefix `{0}` may only contain ASCII letters, digits and underscores")]
    InvalidTablePrefix(String),
    #[error("poll interval must be positive")]
    ZeroPollInterval,
}
