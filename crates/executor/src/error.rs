//! Executor error taxonomy.

use metadb_catalog::CatalogError;
use metadb_store::StoreError;

/// Result type for executor operations.
pub type ExecResult<T> = Result<T, ExecError>;

/// Errors surfaced by the executor.
///
/// The executor performs no local retries; the source adapter decides
/// whether to re-deliver the batch. Every variant carries the logical
/// phase in which it was raised.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// A catalog DDL operation failed during schema reconciliation.
    #[error("schema: {context}: {source}")]
    Schema {
        /// The reconciliation step that failed.
        context: String,
        /// Underlying catalog failure.
        #[source]
        source: CatalogError,
    },
    /// A command requiring a primary key carried none.
    #[error("command missing primary key")]
    MissingPrimaryKey,
    /// A store statement failed.
    #[error("{context}: {source}")]
    Store {
        /// The execution phase that failed.
        context: String,
        /// Underlying store failure.
        #[source]
        source: StoreError,
    },
    /// The worker was cancelled at a suspension point. Propagated
    /// unchanged through every phase.
    #[error("operation cancelled")]
    Cancelled,
    /// An executor invariant was violated; indicates a bug.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ExecError {
    pub(crate) fn store(context: impl Into<String>, source: StoreError) -> ExecError {
        match source {
            StoreError::Cancelled => ExecError::Cancelled,
            source => ExecError::Store {
                context: context.into(),
                source,
            },
        }
    }

    pub(crate) fn schema(context: impl Into<String>, source: CatalogError) -> ExecError {
        match source {
            CatalogError::Store(StoreError::Cancelled) => ExecError::Cancelled,
            source => ExecError::Schema {
                context: context.into(),
                source,
            },
        }
    }
}
