//! Leasehold - table-backed distributed leases.
//!
//! A mutual-exclusion primitive for processes that share nothing but a
//! database. Holding a lease on a resource means owning the row keyed by
//! that resource name in the lease table; a row whose expiry has passed is
//! abandoned and may be taken over.
//!
//! # Core Concepts
//!
//! - **Lock**: [`LeaseLock`] acquires a named resource by polling an atomic
//!   conditional insert until it succeeds, the timeout passes, or the caller
//!   cancels. It hands back a [`LeaseHandle`] that releases the row.
//!
//! - **Store**: The [`LeaseStore`] trait abstracts the lease table. Each
//!   operation is one indivisible statement. [`InMemoryLeaseStore`] keeps the
//!   table in process; `PostgresLeaseStore` keeps it in PostgreSQL.
//!
//! - **Guard**: A [`ResourceGuard`] serializes the short metadata operations
//!   per [`ResourceKind`]. Kinds are always taken in rank order so that
//!   multi-resource callers cannot deadlock.
//!
//! - **Ordering**: [`ResourceKey`] sorts by kind rank, then by resource name
//!   ignoring case. [`LeaseLock::acquire_many`] uses it to take several
//!   leases in a fixed global order.
//!
//! # Feature Flags
//!
//! - `postgres` - PostgreSQL lease table via sqlx
//! - `metrics` - Prometheus metrics support
//! - `test-util` - `TokioClock`, driven by paused tokio time
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use leasehold::{CancellationSignal, InMemoryLeaseStore, LeaseLock, LockConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let lock = LeaseLock::new(Arc::new(InMemoryLeaseStore::new()), LockConfig::default())?;
//! let cancel = CancellationSignal::new();
//!
//! let mut lease = lock.acquire("queue:default", Duration::from_secs(2), &cancel).await?;
//! // ... exclusive work ...
//! lease.release().await?;
//! # Ok(())
//! # }
//! ```

/// Cooperative cancellation.
pub mod cancel;

/// Injectable time source.
///
/// The `clock` module defines the [`Clock`] trait used for timestamps and
/// poll sleeps, with [`SystemClock`] as the production implementation.
pub mod clock;

/// Configuration structures for the lock and its persistence.
///
/// The `config` module defines [`LockConfig`] and [`PersistenceConfig`].
pub mod config;

/// Error types: [`LockError`], [`GuardError`], [`ConfigError`].
pub mod error;

/// Per-kind critical sections around lease-table mutations.
///
/// The `guard` module provides the [`ResourceGuard`] trait and the
/// [`LocalResourceGuard`] implementation backed by tokio mutexes.
pub mod guard;

/// The distributed lock.
///
/// The `lock` module provides:
/// - [`LeaseLock`] - acquires and releases leases
/// - [`LeaseHandle`] - a held lease
/// - [`LeaseSet`] - leases acquired together
/// - [`LeaseState`] - acquisition lifecycle
pub mod lock;

/// In-memory lease table.
pub mod memory;

/// Resource kinds and the global acquisition order.
pub mod resource;

/// Lease table abstraction.
///
/// The `store` module defines the [`LeaseStore`] trait, the [`LeaseRecord`]
/// row type and the [`LeaseId`] identifier.
pub mod store;

/// Tracing spans and telemetry helpers.
pub mod telemetry;

#[cfg(feature = "metrics")]
/// Prometheus metrics, enabled by the `metrics` feature.
pub mod metrics;

#[cfg(feature = "postgres")]
/// PostgreSQL persistence implementation.
///
/// The `persistence` module provides a PostgreSQL-backed lease table
/// when the `postgres` feature is enabled.
pub mod persistence;

pub use cancel::*;
pub use clock::*;
pub use config::*;
pub use error::*;
pub use guard::*;
pub use lock::*;
pub use memory::*;
pub use resource::*;
pub use store::*;
#[cfg(feature = "postgres")]
pub use persistence::PostgresLeaseStore;
