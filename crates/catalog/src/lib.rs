//! metadb-catalog
//!
//! Tracks which destination tables exist, their stored column types, their
//! indexes, and the transform relationships between them, and performs all
//! schema DDL on behalf of the executor. The executor never issues DDL
//! directly; it flushes buffered DML and then calls the catalog.

#![warn(missing_docs)]

pub mod mocks;
mod pg;

pub use pg::PgCatalog;

use async_trait::async_trait;

use metadb_core::{Column, Command, DataType, Table};
use metadb_store::StoreError;

/// Errors raised by catalog operations, keyed by the DDL phase that failed.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Creating a destination table failed.
    #[error("creating table {table}: {source}")]
    TableCreate {
        /// The table being created.
        table: String,
        /// Underlying store failure.
        #[source]
        source: StoreError,
    },
    /// Adding a column failed.
    #[error("adding column {column} in table {table}: {source}")]
    AddColumn {
        /// The destination table.
        table: String,
        /// The column being added.
        column: String,
        /// Underlying store failure.
        #[source]
        source: StoreError,
    },
    /// Altering a column type failed.
    #[error("altering column {column} in table {table}: {source}")]
    AlterColumn {
        /// The destination table.
        table: String,
        /// The column being altered.
        column: String,
        /// Underlying store failure.
        #[source]
        source: StoreError,
    },
    /// Creating an index failed.
    #[error("creating index on {column}: {source}")]
    AddIndex {
        /// The column being indexed.
        column: String,
        /// Underlying store failure.
        #[source]
        source: StoreError,
    },
    /// Creating an origin partition failed.
    #[error("creating partition of {table} for origin {origin}: {source}")]
    Partition {
        /// The partitioned table.
        table: String,
        /// The origin whose partition was being created.
        origin: String,
        /// Underlying store failure.
        #[source]
        source: StoreError,
    },
    /// A store operation outside a DDL phase failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Catalog view of one stored column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredColumn {
    /// Column name.
    pub name: String,
    /// Logical column type.
    pub dtype: DataType,
    /// Type size; for `Text` this mirrors `char_max_len` (0 if unbounded).
    pub dtype_size: i64,
    /// Declared varchar width, if bounded.
    pub char_max_len: Option<i64>,
}

/// Catalog view of a stored table's user columns.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableSchema {
    /// The columns, in stored order. System columns are not included.
    pub columns: Vec<StoredColumn>,
}

impl TableSchema {
    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Option<&StoredColumn> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Catalog contract consumed by the executor.
///
/// Reads are served from in-memory state and are synchronous; mutations
/// perform DDL and are suspension points. Callers must flush any buffered
/// DML before invoking a mutation so DDL is never interleaved with
/// in-flight statements against the same table.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Whether the destination table exists.
    fn table_exists(&self, table: &Table) -> bool;

    /// Creates a destination table: the bitemporal history table, its
    /// current-row view, and its resync side table.
    async fn create_new_table(
        &self,
        table: &Table,
        transformed: bool,
        parent: Option<&Table>,
        source: &str,
    ) -> Result<(), CatalogError>;

    /// Adds a column to a destination table.
    async fn add_column(
        &self,
        table: &Table,
        name: &str,
        dtype: DataType,
        size: i64,
    ) -> Result<(), CatalogError>;

    /// Changes a column's type, casting existing data.
    async fn alter_column_type(
        &self,
        table: &Table,
        name: &str,
        dtype: DataType,
        size: i64,
        not_null: bool,
    ) -> Result<(), CatalogError>;

    /// Whether the origin partition of a transformed table exists.
    fn has_partition(&self, table: &Table, origin: &str) -> bool;

    /// Ensures the partition for the command's origin exists.
    async fn add_partition(&self, cmd: &Command) -> Result<(), CatalogError>;

    /// Whether an index on the column exists.
    fn index_exists(&self, column: &Column) -> bool;

    /// Creates an index on the column.
    async fn add_index(&self, column: &Column) -> Result<(), CatalogError>;

    /// The table itself plus the transitive closure of transform-derived
    /// tables. Empty if the table is unknown.
    fn descendant_tables(&self, table: &Table) -> Vec<Table>;

    /// The stored schema of a table. Unknown tables yield an empty schema,
    /// so that every column of a first command becomes a new-column delta.
    fn select_table_schema(&self, table: &Table) -> Result<TableSchema, CatalogError>;
}
