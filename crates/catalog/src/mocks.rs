//! In-memory `Catalog` implementation for testing.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use metadb_core::{Column, Command, DataType, Table};

use crate::{Catalog, CatalogError, StoredColumn, TableSchema};

/// Mock catalog for testing.
///
/// Tables, schemas, indexes, and descendants live in memory; every DDL
/// operation is recorded as a call string for assertions.
#[derive(Clone, Default)]
pub struct MockCatalog {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    tables: HashSet<Table>,
    schemas: HashMap<Table, TableSchema>,
    indexes: HashSet<Column>,
    partitions: HashSet<(Table, String)>,
    descendants: HashMap<Table, Vec<Table>>,
    calls: Vec<String>,
}

impl MockCatalog {
    /// Creates an empty mock catalog.
    pub fn new() -> MockCatalog {
        MockCatalog::default()
    }

    /// Seeds an existing table with the given stored columns.
    pub fn add_table(&self, table: &Table, columns: Vec<StoredColumn>) {
        let mut state = self.state.lock().unwrap();
        state.tables.insert(table.clone());
        state.schemas.insert(table.clone(), TableSchema { columns });
    }

    /// Seeds an existing index.
    pub fn add_existing_index(&self, column: Column) {
        self.state.lock().unwrap().indexes.insert(column);
    }

    /// Overrides the descendant closure returned for a table.
    pub fn set_descendants(&self, table: &Table, descendants: Vec<Table>) {
        self.state
            .lock()
            .unwrap()
            .descendants
            .insert(table.clone(), descendants);
    }

    /// DDL calls made so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }
}

/// Builds a stored column for seeding a [`MockCatalog`].
pub fn stored(name: &str, dtype: DataType, dtype_size: i64, char_max_len: Option<i64>) -> StoredColumn {
    StoredColumn {
        name: name.to_string(),
        dtype,
        dtype_size,
        char_max_len,
    }
}

#[async_trait]
impl Catalog for MockCatalog {
    fn table_exists(&self, table: &Table) -> bool {
        self.state.lock().unwrap().tables.contains(table)
    }

    async fn create_new_table(
        &self,
        table: &Table,
        transformed: bool,
        parent: Option<&Table>,
        _source: &str,
    ) -> Result<(), CatalogError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!(
            "create_new_table {table} transformed={transformed} parent={}",
            parent.map_or("none".to_string(), |p| p.to_string())
        ));
        state.tables.insert(table.clone());
        state.schemas.insert(table.clone(), TableSchema::default());
        Ok(())
    }

    async fn add_column(
        &self,
        table: &Table,
        name: &str,
        dtype: DataType,
        size: i64,
    ) -> Result<(), CatalogError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("add_column {table} {name} {dtype} {size}"));
        let char_max_len = match dtype {
            DataType::Text if size > 0 => Some(size),
            _ => None,
        };
        state
            .schemas
            .entry(table.clone())
            .or_default()
            .columns
            .push(StoredColumn {
                name: name.to_string(),
                dtype,
                dtype_size: size,
                char_max_len,
            });
        Ok(())
    }

    async fn alter_column_type(
        &self,
        table: &Table,
        name: &str,
        dtype: DataType,
        size: i64,
        _not_null: bool,
    ) -> Result<(), CatalogError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("alter_column_type {table} {name} {dtype} {size}"));
        if let Some(schema) = state.schemas.get_mut(table) {
            if let Some(col) = schema.columns.iter_mut().find(|c| c.name == name) {
                col.dtype = dtype;
                col.dtype_size = size;
                col.char_max_len = match dtype {
                    DataType::Text if size > 0 => Some(size),
                    _ => None,
                };
            }
        }
        Ok(())
    }

    fn has_partition(&self, table: &Table, origin: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .partitions
            .contains(&(table.clone(), origin.to_string()))
    }

    async fn add_partition(&self, cmd: &Command) -> Result<(), CatalogError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("add_partition {}.{} {}", cmd.schema_name, cmd.table_name, cmd.origin));
        state.partitions.insert((cmd.table(), cmd.origin.clone()));
        Ok(())
    }

    fn index_exists(&self, column: &Column) -> bool {
        self.state.lock().unwrap().indexes.contains(column)
    }

    async fn add_index(&self, column: &Column) -> Result<(), CatalogError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("add_index {column}"));
        state.indexes.insert(column.clone());
        Ok(())
    }

    fn descendant_tables(&self, table: &Table) -> Vec<Table> {
        let state = self.state.lock().unwrap();
        if let Some(descendants) = state.descendants.get(table) {
            return descendants.clone();
        }
        if state.tables.contains(table) {
            vec![table.clone()]
        } else {
            Vec::new()
        }
    }

    fn select_table_schema(&self, table: &Table) -> Result<TableSchema, CatalogError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .schemas
            .get(table)
            .cloned()
            .unwrap_or_default())
    }
}
