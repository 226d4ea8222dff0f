//! metadb-store
//!
//! Narrow access layer over the backing Postgres store. The executor and
//! catalog issue fully rendered SQL through the [`Store`] trait; the pooled
//! [`PgStore`] implementation runs it, and [`mocks::MockStore`] records it
//! for tests.

#![warn(missing_docs)]

pub mod mocks;
mod pg;

pub use pg::{PgStore, PgStoreOptions};

use async_trait::async_trait;

/// One result row, keyed by column name. Values use the JSON data model so
/// that rows of tables whose shape is only known at runtime can be scanned
/// without static types.
pub type JsonRow = serde_json::Map<String, serde_json::Value>;

/// Errors raised by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying database driver reported an error.
    #[error("store: {0}")]
    Database(#[source] sqlx::Error),
    /// The connection pool was shut down under an in-flight operation.
    #[error("store: operation cancelled")]
    Cancelled,
    /// A returned row could not be scanned into the JSON row model.
    #[error("store: scanning row: {0}")]
    Scan(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolClosed => StoreError::Cancelled,
            other => StoreError::Database(other),
        }
    }
}

/// Statement execution against the backing store.
///
/// All SQL is rendered by the caller; the store only runs it. Every method
/// is a suspension point: dropping the returned future cancels the
/// operation.
#[async_trait]
pub trait Store: Send + Sync {
    /// Executes a single statement, returning the number of affected rows.
    async fn exec(&self, sql: &str) -> Result<u64, StoreError>;

    /// Executes statements in order inside one transaction, rolling back
    /// if any of them fails.
    async fn exec_transaction(&self, stmts: &[String]) -> Result<(), StoreError>;

    /// Runs a query and returns every row as a JSON object keyed by
    /// column name.
    async fn query_json(&self, sql: &str) -> Result<Vec<JsonRow>, StoreError>;

    /// Runs a query expected to return at most one row.
    async fn query_one_json(&self, sql: &str) -> Result<Option<JsonRow>, StoreError> {
        Ok(self.query_json(sql).await?.into_iter().next())
    }
}
