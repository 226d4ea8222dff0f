//! Postgres-backed catalog.
//!
//! Bookkeeping lives in the `metadb.track` system table; table, column,
//! index, and partition state is cached in memory and maintained by the
//! DDL operations, so reads never touch the database after startup.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use metadb_core::{encode_string, identifier_sql, Column, Command, DataType, Table};
use metadb_store::{JsonRow, Store, StoreError};

use crate::{Catalog, CatalogError, StoredColumn, TableSchema};

const CREATE_TRACK_TABLE: &str = "CREATE TABLE IF NOT EXISTS metadb.track (\
    schema_name varchar(63) NOT NULL,\
    table_name varchar(63) NOT NULL,\
    table_id uuid NOT NULL,\
    transformed boolean NOT NULL,\
    parent_schema varchar(63),\
    parent_table varchar(63),\
    source_name varchar(63) NOT NULL,\
    created timestamp with time zone NOT NULL,\
    PRIMARY KEY (schema_name, table_name))";

/// Catalog implementation backed by Postgres system state.
pub struct PgCatalog {
    store: Arc<dyn Store>,
    state: Mutex<CatalogState>,
}

#[derive(Default)]
struct CatalogState {
    tables: HashMap<Table, TrackedTable>,
    schemas: HashMap<Table, TableSchema>,
    indexes: HashSet<Column>,
    partitions: HashSet<(Table, String)>,
    children: HashMap<Table, Vec<Table>>,
}

struct TrackedTable {
    transformed: bool,
}

impl PgCatalog {
    /// Creates the system schema if needed and loads catalog state from
    /// `metadb.track`, `information_schema.columns`, and `pg_index`.
    pub async fn initialize(store: Arc<dyn Store>) -> Result<PgCatalog, CatalogError> {
        store.exec("CREATE SCHEMA IF NOT EXISTS metadb").await?;
        store.exec(CREATE_TRACK_TABLE).await?;

        let mut state = CatalogState::default();
        load_tracked_tables(store.as_ref(), &mut state).await?;
        load_table_schemas(store.as_ref(), &mut state).await?;
        load_indexes(store.as_ref(), &mut state).await?;
        info!(tables = state.tables.len(), "catalog initialized");

        Ok(PgCatalog {
            store,
            state: Mutex::new(state),
        })
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    fn table_exists(&self, table: &Table) -> bool {
        self.state.lock().unwrap().tables.contains_key(table)
    }

    async fn create_new_table(
        &self,
        table: &Table,
        transformed: bool,
        parent: Option<&Table>,
        source: &str,
    ) -> Result<(), CatalogError> {
        let map_err = |source: StoreError| CatalogError::TableCreate {
            table: table.to_string(),
            source,
        };

        let mut create = format!(
            "CREATE TABLE {} (\
             __id bigint GENERATED BY DEFAULT AS IDENTITY,\
             __start timestamp with time zone NOT NULL,\
             __end timestamp with time zone NOT NULL,\
             __current boolean NOT NULL,\
             __origin varchar(63) NOT NULL DEFAULT '')",
            table.history_sql()
        );
        if transformed {
            create.push_str(" PARTITION BY LIST (__origin)");
        }

        let store = &self.store;
        store
            .exec(&format!(
                "CREATE SCHEMA IF NOT EXISTS {}",
                identifier_sql(&table.schema)
            ))
            .await
            .map_err(map_err)?;
        store.exec(&create).await.map_err(map_err)?;
        store
            .exec(&current_view_sql(table, false))
            .await
            .map_err(map_err)?;
        store
            .exec(&format!(
                "CREATE TABLE {} (__id bigint PRIMARY KEY)",
                table.sync_sql()
            ))
            .await
            .map_err(map_err)?;

        let table_id = Uuid::new_v4();
        let (parent_schema, parent_table) = match parent {
            Some(p) => (encode_string(&p.schema), encode_string(&p.table)),
            None => ("NULL".to_string(), "NULL".to_string()),
        };
        store
            .exec(&format!(
                "INSERT INTO metadb.track \
                 (schema_name,table_name,table_id,transformed,parent_schema,\
                  parent_table,source_name,created) \
                 VALUES ({},{},'{}',{},{},{},{},'{}')",
                encode_string(&table.schema),
                encode_string(&table.table),
                table_id,
                transformed,
                parent_schema,
                parent_table,
                encode_string(source),
                Utc::now().to_rfc3339(),
            ))
            .await
            .map_err(map_err)?;

        info!(table = %table, transformed, "created table");
        let mut state = self.state.lock().unwrap();
        state
            .tables
            .insert(table.clone(), TrackedTable { transformed });
        state.schemas.insert(table.clone(), TableSchema::default());
        if let Some(p) = parent {
            state
                .children
                .entry(p.clone())
                .or_default()
                .push(table.clone());
        }
        Ok(())
    }

    async fn add_column(
        &self,
        table: &Table,
        name: &str,
        dtype: DataType,
        size: i64,
    ) -> Result<(), CatalogError> {
        let map_err = |source: StoreError| CatalogError::AddColumn {
            table: table.to_string(),
            column: name.to_string(),
            source,
        };
        self.store
            .exec(&format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                table.history_sql(),
                identifier_sql(name),
                dtype.to_sql(size)
            ))
            .await
            .map_err(map_err)?;
        // The new column lands at the end of the row, so the view can be
        // replaced in place.
        self.store
            .exec(&current_view_sql(table, true))
            .await
            .map_err(map_err)?;

        debug!(table = %table, column = name, dtype = %dtype, size, "added column");
        let mut state = self.state.lock().unwrap();
        if let Some(schema) = state.schemas.get_mut(table) {
            schema.columns.push(stored_column(name, dtype, size));
        }
        Ok(())
    }

    async fn alter_column_type(
        &self,
        table: &Table,
        name: &str,
        dtype: DataType,
        size: i64,
        not_null: bool,
    ) -> Result<(), CatalogError> {
        let map_err = |source: StoreError| CatalogError::AlterColumn {
            table: table.to_string(),
            column: name.to_string(),
            source,
        };
        let type_sql = dtype.to_sql(size);
        // A type change invalidates the current view; drop and recreate.
        self.store
            .exec(&format!("DROP VIEW IF EXISTS {}", table.sql()))
            .await
            .map_err(map_err)?;
        self.store
            .exec(&format!(
                "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{}",
                table.history_sql(),
                identifier_sql(name),
                type_sql,
                identifier_sql(name),
                type_sql
            ))
            .await
            .map_err(map_err)?;
        if not_null {
            self.store
                .exec(&format!(
                    "ALTER TABLE {} ALTER COLUMN {} SET NOT NULL",
                    table.history_sql(),
                    identifier_sql(name)
                ))
                .await
                .map_err(map_err)?;
        }
        self.store
            .exec(&current_view_sql(table, false))
            .await
            .map_err(map_err)?;

        debug!(table = %table, column = name, dtype = %dtype, size, "altered column type");
        let mut state = self.state.lock().unwrap();
        if let Some(schema) = state.schemas.get_mut(table) {
            if let Some(col) = schema.columns.iter_mut().find(|c| c.name == name) {
                *col = stored_column(name, dtype, size);
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
        let table = cmd.table();
        // Partition DDL is only valid on a table created with list
        // partitioning; a plain table needs none.
        let transformed = {
            let state = self.state.lock().unwrap();
            state.tables.get(&table).map(|t| t.transformed)
        };
        if transformed == Some(false) {
            warn!(table = %table, "partition requested for unpartitioned table");
            return Ok(());
        }
        let partition = partition_name(&table, &cmd.origin);
        self.store
            .exec(&format!(
                "CREATE TABLE IF NOT EXISTS {}.{} PARTITION OF {} FOR VALUES IN ({})",
                identifier_sql(&table.schema),
                identifier_sql(&partition),
                table.history_sql(),
                encode_string(&cmd.origin)
            ))
            .await
            .map_err(|source| CatalogError::Partition {
                table: table.to_string(),
                origin: cmd.origin.clone(),
                source,
            })?;
        debug!(table = %table, origin = %cmd.origin, "created origin partition");
        self.state
            .lock()
            .unwrap()
            .partitions
            .insert((table, cmd.origin.clone()));
        Ok(())
    }

    fn index_exists(&self, column: &Column) -> bool {
        self.state.lock().unwrap().indexes.contains(column)
    }

    async fn add_index(&self, column: &Column) -> Result<(), CatalogError> {
        let table = column.table();
        self.store
            .exec(&format!(
                "CREATE INDEX ON {} ({})",
                table.history_sql(),
                identifier_sql(&column.column)
            ))
            .await
            .map_err(|source| CatalogError::AddIndex {
                column: column.to_string(),
                source,
            })?;
        debug!(column = %column, "created index");
        self.state.lock().unwrap().indexes.insert(column.clone());
        Ok(())
    }

    fn descendant_tables(&self, table: &Table) -> Vec<Table> {
        let state = self.state.lock().unwrap();
        if !state.tables.contains_key(table) {
            return Vec::new();
        }
        let mut tables = vec![table.clone()];
        let mut i = 0;
        while i < tables.len() {
            if let Some(children) = state.children.get(&tables[i]) {
                for child in children {
                    if !tables.contains(child) {
                        tables.push(child.clone());
                    }
                }
            }
            i += 1;
        }
        tables
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

fn current_view_sql(table: &Table, replace: bool) -> String {
    format!(
        "CREATE {}VIEW {} AS SELECT * FROM {} WHERE __current",
        if replace { "OR REPLACE " } else { "" },
        table.sql(),
        table.history_sql()
    )
}

fn stored_column(name: &str, dtype: DataType, size: i64) -> StoredColumn {
    let char_max_len = match dtype {
        DataType::Text if size > 0 => Some(size),
        _ => None,
    };
    StoredColumn {
        name: name.to_string(),
        dtype,
        dtype_size: size,
        char_max_len,
    }
}

fn partition_name(table: &Table, origin: &str) -> String {
    let safe: String = origin
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("zzz___{}__{}", table.table, safe)
}

fn row_str<'a>(row: &'a JsonRow, name: &str) -> Result<&'a str, CatalogError> {
    row.get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| StoreError::Scan(format!("missing column {name}")).into())
}

async fn load_tracked_tables(
    store: &dyn Store,
    state: &mut CatalogState,
) -> Result<(), CatalogError> {
    let rows = store
        .query_json(
            "SELECT schema_name, table_name, transformed, \
             parent_schema, parent_table FROM metadb.track",
        )
        .await?;
    for row in &rows {
        let table = Table::new(row_str(row, "schema_name")?, row_str(row, "table_name")?);
        let transformed = row
            .get("transformed")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if let (Some(ps), Some(pt)) = (
            row.get("parent_schema").and_then(|v| v.as_str()),
            row.get("parent_table").and_then(|v| v.as_str()),
        ) {
            state
                .children
                .entry(Table::new(ps, pt))
                .or_default()
                .push(table.clone());
        }
        state.schemas.entry(table.clone()).or_default();
        state.tables.insert(table, TrackedTable { transformed });
    }
    Ok(())
}

async fn load_table_schemas(
    store: &dyn Store,
    state: &mut CatalogState,
) -> Result<(), CatalogError> {
    let rows = store
        .query_json(
            "SELECT c.table_schema, c.table_name, c.column_name, c.data_type, \
             c.character_maximum_length \
             FROM information_schema.columns c \
             JOIN metadb.track t ON c.table_schema = t.schema_name \
             AND c.table_name = t.table_name || '__' \
             ORDER BY c.table_schema, c.table_name, c.ordinal_position",
        )
        .await?;
    for row in &rows {
        let column_name = row_str(row, "column_name")?;
        if column_name.starts_with("__") {
            continue;
        }
        let history_name = row_str(row, "table_name")?;
        let table = Table::new(
            row_str(row, "table_schema")?,
            history_name.trim_end_matches("__"),
        );
        let data_type = row_str(row, "data_type")?;
        let Some((dtype, mut dtype_size)) = DataType::from_sql(data_type) else {
            warn!(table = %table, column = column_name, data_type, "unmanaged column type");
            continue;
        };
        let char_max_len = row.get("character_maximum_length").and_then(|v| v.as_i64());
        if dtype == DataType::Text {
            dtype_size = char_max_len.unwrap_or(0);
        }
        state
            .schemas
            .entry(table)
            .or_default()
            .columns
            .push(StoredColumn {
                name: column_name.to_string(),
                dtype,
                dtype_size,
                char_max_len,
            });
    }
    Ok(())
}

async fn load_indexes(store: &dyn Store, state: &mut CatalogState) -> Result<(), CatalogError> {
    let rows = store
        .query_json(
            "SELECT n.nspname AS schema_name, c.relname AS table_name, \
             a.attname AS column_name \
             FROM pg_index i \
             JOIN pg_class c ON c.oid = i.indrelid \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum = ANY(i.indkey) \
             JOIN metadb.track t ON n.nspname = t.schema_name \
             AND c.relname = t.table_name || '__'",
        )
        .await?;
    for row in &rows {
        let history_name = row_str(row, "table_name")?;
        state.indexes.insert(Column {
            schema: row_str(row, "schema_name")?.to_string(),
            table: history_name.trim_end_matches("__").to_string(),
            column: row_str(row, "column_name")?.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use metadb_core::Op;
    use metadb_store::mocks::{json_row, MockStore};
    use serde_json::json;

    async fn new_catalog(store: &MockStore) -> PgCatalog {
        // initialize issues three load queries: track, columns, indexes
        PgCatalog::initialize(Arc::new(store.clone())).await.unwrap()
    }

    #[tokio::test]
    async fn initialize_creates_system_schema() {
        let store = MockStore::new();
        let _cat = new_catalog(&store).await;
        let executed = store.executed();
        assert!(executed[0].starts_with("CREATE SCHEMA IF NOT EXISTS metadb"));
        assert!(executed[1].contains("metadb.track"));
        assert_eq!(store.queries().len(), 3);
    }

    #[tokio::test]
    async fn create_table_emits_history_view_and_sync() {
        let store = MockStore::new();
        let cat = new_catalog(&store).await;
        let table = Table::new("s", "t");
        assert!(!cat.table_exists(&table));

        cat.create_new_table(&table, false, None, "src").await.unwrap();

        assert!(cat.table_exists(&table));
        assert_eq!(cat.descendant_tables(&table), vec![table.clone()]);
        let executed = store.executed();
        assert!(executed.iter().any(|s| s.contains(r#"CREATE TABLE "s"."t__""#)));
        assert!(executed
            .iter()
            .any(|s| s == r#"CREATE VIEW "s"."t" AS SELECT * FROM "s"."t__" WHERE __current"#));
        assert!(executed
            .iter()
            .any(|s| s.contains(r#"CREATE TABLE "s"."t__sync" (__id bigint PRIMARY KEY)"#)));
        assert!(executed.iter().any(|s| s.starts_with("INSERT INTO metadb.track")));
    }

    #[tokio::test]
    async fn transformed_table_is_partitioned_and_tracks_parent() {
        let store = MockStore::new();
        let cat = new_catalog(&store).await;
        let parent = Table::new("s", "t");
        let child = Table::new("s", "t__jsonx");
        cat.create_new_table(&parent, false, None, "src").await.unwrap();
        cat.create_new_table(&child, true, Some(&parent), "src")
            .await
            .unwrap();

        assert!(store
            .executed()
            .iter()
            .any(|s| s.contains("PARTITION BY LIST (__origin)")));
        assert_eq!(cat.descendant_tables(&parent), vec![parent.clone(), child.clone()]);
        assert_eq!(cat.descendant_tables(&child), vec![child]);
    }

    #[tokio::test]
    async fn add_partition_records_origin() {
        let store = MockStore::new();
        let cat = new_catalog(&store).await;
        let cmd = Command {
            op: Op::Merge,
            schema_name: "s".to_string(),
            table_name: "t".to_string(),
            parent_table: Some(Table::new("s", "p")),
            origin: "o1".to_string(),
            source_timestamp: "2024-01-01T00:00:00Z".to_string(),
            transformed: true,
            columns: Vec::new(),
        };
        assert!(!cat.has_partition(&cmd.table(), "o1"));
        cat.add_partition(&cmd).await.unwrap();
        assert!(cat.has_partition(&cmd.table(), "o1"));
        assert!(store.executed().iter().any(|s| s.contains(
            r#"CREATE TABLE IF NOT EXISTS "s"."zzz___t__o1" PARTITION OF "s"."t__" FOR VALUES IN ('o1')"#
        )));
    }

    #[tokio::test]
    async fn add_and_alter_column_maintain_schema_cache() {
        let store = MockStore::new();
        let cat = new_catalog(&store).await;
        let table = Table::new("s", "t");
        cat.create_new_table(&table, false, None, "src").await.unwrap();

        cat.add_column(&table, "n", DataType::Integer, 2).await.unwrap();
        let schema = cat.select_table_schema(&table).unwrap();
        assert_eq!(schema.column("n").unwrap().dtype_size, 2);

        cat.alter_column_type(&table, "n", DataType::Integer, 4, false)
            .await
            .unwrap();
        let schema = cat.select_table_schema(&table).unwrap();
        assert_eq!(schema.column("n").unwrap().dtype_size, 4);
        assert!(store
            .executed()
            .iter()
            .any(|s| s == r#"ALTER TABLE "s"."t__" ALTER COLUMN "n" TYPE integer USING "n"::integer"#));

        cat.alter_column_type(&table, "n", DataType::Text, 12, false)
            .await
            .unwrap();
        let schema = cat.select_table_schema(&table).unwrap();
        assert_eq!(schema.column("n").unwrap().char_max_len, Some(12));
    }

    #[tokio::test]
    async fn index_cache_round_trip() {
        let store = MockStore::new();
        let cat = new_catalog(&store).await;
        let table = Table::new("s", "t");
        cat.create_new_table(&table, false, None, "src").await.unwrap();
        let column = Column::new(&table, "id");
        assert!(!cat.index_exists(&column));
        cat.add_index(&column).await.unwrap();
        assert!(cat.index_exists(&column));
        assert!(store
            .executed()
            .iter()
            .any(|s| s == r#"CREATE INDEX ON "s"."t__" ("id")"#));
    }

    #[tokio::test]
    async fn startup_load_restores_state() {
        let store = MockStore::new();
        store.push_rows(vec![json_row(&[
            ("schema_name", json!("s")),
            ("table_name", json!("t")),
            ("transformed", json!(false)),
            ("parent_schema", json!(null)),
            ("parent_table", json!(null)),
        ])]);
        store.push_rows(vec![
            json_row(&[
                ("table_schema", json!("s")),
                ("table_name", json!("t__")),
                ("column_name", json!("__id")),
                ("data_type", json!("bigint")),
                ("character_maximum_length", json!(null)),
            ]),
            json_row(&[
                ("table_schema", json!("s")),
                ("table_name", json!("t__")),
                ("column_name", json!("name")),
                ("data_type", json!("character varying")),
                ("character_maximum_length", json!(40)),
            ]),
        ]);
        store.push_rows(vec![json_row(&[
            ("schema_name", json!("s")),
            ("table_name", json!("t__")),
            ("column_name", json!("id")),
        ])]);

        let cat = PgCatalog::initialize(Arc::new(store)).await.unwrap();
        let table = Table::new("s", "t");
        assert!(cat.table_exists(&table));
        let schema = cat.select_table_schema(&table).unwrap();
        // system columns are not part of the cached schema
        assert!(schema.column("__id").is_none());
        let name = schema.column("name").unwrap();
        assert_eq!(name.dtype, DataType::Text);
        assert_eq!(name.char_max_len, Some(40));
        assert!(cat.index_exists(&Column::new(&table, "id")));
    }
}
