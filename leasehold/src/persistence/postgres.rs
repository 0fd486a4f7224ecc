use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::config::{LockConfig, PersistenceConfig};
use crate::error::ConfigError;
use crate::store::{LeaseId, LeaseRecord, LeaseStore};

/// PostgreSQL-backed lease table.
///
/// Both operations are single statements, so concurrent acquirers in
/// different processes are serialized by the primary key on `resource`.
#[derive(Clone, Debug)]
pub struct PostgresLeaseStore {
    pool: PgPool,
    table: String,
}

impl PostgresLeaseStore {
    /// Create a store over `pool` using the table named by `config`.
    pub fn new(pool: PgPool, config: &LockConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            pool,
            table: config.lock_table(),
        })
    }

    /// Open a pool and, if `config.prepare_schema` is set, create the table.
    pub async fn connect(
        persistence: &PersistenceConfig,
        config: &LockConfig,
    ) -> anyhow::Result<Self> {
        let pool = persistence.connect().await?;
        let store = Self::new(pool, config)?;
        if config.prepare_schema {
            store.ensure_schema().await?;
        }
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the lease table if it does not exist.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                resource TEXT PRIMARY KEY,
                lease_id UUID NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL
            )
            "#,
            table = self.table
        ))
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to create lease table {}", self.table))?;

        info!(table = %self.table, "lease table ready");
        Ok(())
    }

    /// Current row for `resource`, live or not.
    pub async fn current(&self, resource: &str) -> anyhow::Result<Option<LeaseRecord>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT resource, lease_id, created_at, expires_at
            FROM {table}
            WHERE resource = $1
            "#,
            table = self.table
        ))
        .bind(resource)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(LeaseRecord {
                resource: row.try_get("resource")?,
                lease_id: LeaseId(row.try_get("lease_id")?),
                created_at: row.try_get("created_at")?,
                expires_at: row.try_get("expires_at")?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl LeaseStore for PostgresLeaseStore {
    async fn try_insert(&self, lease: &LeaseRecord) -> anyhow::Result<u64> {
        let res = sqlx::query(&format!(
            r#"
            INSERT INTO {table} (resource, lease_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (resource) DO UPDATE
            SET lease_id = EXCLUDED.lease_id,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at
            WHERE {table}.expires_at <= EXCLUDED.created_at
            "#,
            table = self.table
        ))
        .bind(&lease.resource)
        .bind(lease.lease_id.0)
        .bind(lease.created_at)
        .bind(lease.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected())
    }

    async fn delete(&self, resource: &str, lease_id: LeaseId) -> anyhow::Result<u64> {
        let res = sqlx::query(&format!(
            r#"
            DELETE FROM {table}
            WHERE resource = $1
              AND lease_id = $2
            "#,
            table = self.table
        ))
        .bind(resource)
        .bind(lease_id.0)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() > 0 {
            debug!(resource, %lease_id, "deleted lease row");
        }
        Ok(res.rows_affected())
    }
}
