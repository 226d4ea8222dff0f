//! Pooled Postgres implementation of the [`Store`] trait.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::trace;

use crate::{JsonRow, Store, StoreError};

/// Connection tuning knobs for the Postgres store.
#[derive(Debug, Clone)]
pub struct PgStoreOptions {
    /// Maximum number of pooled connections.
    pub max_connections: u32,
    /// Timeout applied when acquiring a connection from the pool.
    pub acquire_timeout: Duration,
}

impl Default for PgStoreOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// `Store` implementation backed by a shared `sqlx` connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects using default options.
    pub async fn connect(dsn: &str) -> Result<PgStore, StoreError> {
        Self::with_options(dsn, PgStoreOptions::default()).await
    }

    /// Connects using the provided tuning options.
    pub async fn with_options(dsn: &str, options: PgStoreOptions) -> Result<PgStore, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.acquire_timeout)
            .connect(dsn)
            .await?;
        Ok(PgStore { pool })
    }

    /// Wraps an existing pool.
    pub fn from_pool(pool: PgPool) -> PgStore {
        PgStore { pool }
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn exec(&self, sql: &str) -> Result<u64, StoreError> {
        trace!(sql, "exec");
        let result = sqlx::query(sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn exec_transaction(&self, stmts: &[String]) -> Result<(), StoreError> {
        // The transaction rolls back on drop if any statement fails.
        let mut tx = self.pool.begin().await?;
        for sql in stmts {
            trace!(sql, "exec in transaction");
            sqlx::query(sql).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query_json(&self, sql: &str) -> Result<Vec<JsonRow>, StoreError> {
        trace!(sql, "query");
        // Rows are scanned through to_jsonb so that user columns of
        // arbitrary type can be read without static knowledge of the
        // table's shape.
        let wrapped = format!("SELECT to_jsonb(q) AS data FROM ({sql}) AS q");
        let rows = sqlx::query(&wrapped).fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| {
                let value: serde_json::Value = row.try_get("data")?;
                match value {
                    serde_json::Value::Object(map) => Ok(map),
                    other => Err(StoreError::Scan(format!(
                        "expected JSON object, got {other}"
                    ))),
                }
            })
            .collect()
    }
}
