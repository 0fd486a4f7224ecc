/// PostgreSQL lease table.
///
/// This module provides `PostgresLeaseStore`, a PostgreSQL-backed
/// implementation of the [`LeaseStore`](crate::store::LeaseStore) trait.
pub mod postgres;

pub use postgres::PostgresLeaseStore;
