//! Command dispatch and the executor entrypoint.

use std::time::Instant;

use metadb_catalog::Catalog;
use metadb_core::{
    encode_sql_data, Column, Command, CommandColumn, CommandList, DataType, Op, SyncMode,
};
use metadb_observability as obs;
use metadb_store::Store;
use tracing::trace;

use crate::batch::partition_commands;
use crate::buffer::ExecBuffer;
use crate::delta::{apply_delta_schema, find_delta_schema};
use crate::error::{ExecError, ExecResult};
use crate::merge::exec_merge_data;

/// Executes an ordered batch of change commands against the store.
///
/// Commands are partitioned into schema-homogeneous sub-batches; each
/// sub-batch reconciles schema, runs its row operations through the
/// execution buffer, and flushes at its boundary. Merge may adjust data
/// types in the commands, which is why the list is taken mutably.
pub async fn execute_command_list(
    cat: &dyn Catalog,
    store: &dyn Store,
    cmdlist: &mut CommandList,
    source: &str,
    sync_mode: SyncMode,
) -> ExecResult<()> {
    if cmdlist.cmd.is_empty() {
        return Ok(());
    }
    let started = Instant::now();
    let records = cmdlist.cmd.len();
    let ranges = partition_commands(cat, &cmdlist.cmd);
    let mut ebuf = ExecBuffer::new(store, sync_mode);
    for range in ranges {
        for cmd in &mut cmdlist.cmd[range] {
            trace!(op = %cmd.op, table = %cmd.table(), origin = %cmd.origin,
                source_timestamp = %cmd.source_timestamp, "exec command");
            exec_command(&mut ebuf, cat, cmd, source).await?;
        }
        ebuf.flush()
            .await
            .map_err(|e| rewrap_flush(e, "exec command list"))?;
    }
    obs::record_batch(source, records, started.elapsed());
    Ok(())
}

async fn exec_command(
    ebuf: &mut ExecBuffer<'_>,
    cat: &dyn Catalog,
    cmd: &mut Command,
    source: &str,
) -> ExecResult<()> {
    // Make schema changes if needed by the command.
    if cmd.op == Op::Merge {
        let delta = find_delta_schema(cat, cmd)?;
        add_table(ebuf, cat, cmd, source).await?;
        add_partition(ebuf, cat, cmd).await?;
        // Applying the delta may adjust data types in cmd.
        apply_delta_schema(ebuf, cat, cmd, delta).await?;
        ensure_primary_key_indexes(ebuf, cat, cmd).await?;
    }
    exec_command_data(ebuf, cat, cmd).await
}

async fn add_table(
    ebuf: &mut ExecBuffer<'_>,
    cat: &dyn Catalog,
    cmd: &Command,
    source: &str,
) -> ExecResult<()> {
    let table = cmd.table();
    if cat.table_exists(&table) {
        return Ok(());
    }
    ebuf.flush()
        .await
        .map_err(|e| rewrap_flush(e, "creating table"))?;
    cat.create_new_table(&table, cmd.transformed, cmd.parent_table.as_ref(), source)
        .await
        .map_err(|e| ExecError::schema(format!("creating table {table}"), e))
}

async fn add_partition(
    ebuf: &mut ExecBuffer<'_>,
    cat: &dyn Catalog,
    cmd: &Command,
) -> ExecResult<()> {
    if cmd.parent_table.is_none() {
        return Ok(());
    }
    let table = cmd.table();
    if cat.has_partition(&table, &cmd.origin) {
        return Ok(());
    }
    ebuf.flush()
        .await
        .map_err(|e| rewrap_flush(e, "creating partition"))?;
    cat.add_partition(cmd)
        .await
        .map_err(|e| ExecError::schema(format!("creating partition for table {table}"), e))
}

/// Ensures an index exists on every primary-key column of the command.
async fn ensure_primary_key_indexes(
    ebuf: &mut ExecBuffer<'_>,
    cat: &dyn Catalog,
    cmd: &Command,
) -> ExecResult<()> {
    let table = cmd.table();
    for col in &cmd.columns {
        if col.primary_key == 0 {
            continue;
        }
        let column = Column::new(&table, &col.name);
        if cat.index_exists(&column) {
            continue;
        }
        ebuf.flush()
            .await
            .map_err(|e| rewrap_flush(e, "creating indexes"))?;
        cat.add_index(&column)
            .await
            .map_err(|e| ExecError::schema(format!("creating index on {column}"), e))?;
    }
    Ok(())
}

async fn exec_command_data(
    ebuf: &mut ExecBuffer<'_>,
    cat: &dyn Catalog,
    cmd: &mut Command,
) -> ExecResult<()> {
    match cmd.op {
        Op::Merge => exec_merge_data(ebuf, cmd).await,
        Op::Delete => exec_delete_data(ebuf, cat, cmd).await,
        Op::Truncate => exec_truncate_data(ebuf, cat, cmd).await,
    }
}

/// Closes the current row matching the command's primary key, in the
/// destination table and every transform-derived descendant.
async fn exec_delete_data(
    ebuf: &mut ExecBuffer<'_>,
    cat: &dyn Catalog,
    cmd: &Command,
) -> ExecResult<()> {
    // An unknown table yields no descendants and the delete is a no-op.
    for table in cat.descendant_tables(&cmd.table()) {
        let mut b = format!(
            "UPDATE {} SET __end='{}',__current=FALSE WHERE __current AND __origin='{}'",
            table.history_sql(),
            cmd.source_timestamp,
            cmd.origin
        );
        where_pk_data_equal(&mut b, &cmd.columns)?;
        ebuf.store()
            .exec(&b)
            .await
            .map_err(|e| ExecError::store("delete", e))?;
    }
    Ok(())
}

/// Closes every current row of the command's origin, in the destination
/// table and every transform-derived descendant.
async fn exec_truncate_data(
    ebuf: &mut ExecBuffer<'_>,
    cat: &dyn Catalog,
    cmd: &Command,
) -> ExecResult<()> {
    for table in cat.descendant_tables(&cmd.table()) {
        let b = format!(
            "UPDATE {} SET __end='{}',__current=FALSE WHERE __current AND __origin='{}'",
            table.history_sql(),
            cmd.source_timestamp,
            cmd.origin
        );
        ebuf.store()
            .exec(&b)
            .await
            .map_err(|e| ExecError::store("truncate", e))?;
    }
    Ok(())
}

/// Appends an equality predicate for every primary-key column.
///
/// JSON-typed keys are compared as text on both sides. A command with no
/// primary-key column is rejected.
pub(crate) fn where_pk_data_equal(b: &mut String, columns: &[CommandColumn]) -> ExecResult<()> {
    let mut found = false;
    for c in columns {
        if c.primary_key == 0 {
            continue;
        }
        found = true;
        let literal = encode_sql_data(c.sql_data.as_deref(), c.dtype);
        if c.dtype == DataType::Json {
            b.push_str(&format!(" AND \"{}\"::text={literal}::text", c.name));
        } else {
            b.push_str(&format!(" AND \"{}\"={literal}", c.name));
        }
    }
    if !found {
        return Err(ExecError::MissingPrimaryKey);
    }
    Ok(())
}

fn rewrap_flush(e: ExecError, context: &str) -> ExecError {
    match e {
        ExecError::Store { source, .. } => ExecError::Store {
            context: context.to_string(),
            source,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pk_column(name: &str, dtype: DataType, sql: &str) -> CommandColumn {
        CommandColumn {
            name: name.to_string(),
            dtype,
            dtype_size: 8,
            primary_key: 1,
            data: Some(json!(1)),
            sql_data: Some(sql.to_string()),
            unavailable: false,
        }
    }

    #[test]
    fn pk_predicate_renders_equality() {
        let mut b = String::new();
        where_pk_data_equal(&mut b, &[pk_column("id", DataType::Integer, "7")]).unwrap();
        assert_eq!(b, r#" AND "id"=7"#);
    }

    #[test]
    fn json_pk_compares_as_text() {
        let mut b = String::new();
        where_pk_data_equal(&mut b, &[pk_column("doc", DataType::Json, r#"{"k":1}"#)]).unwrap();
        assert_eq!(b, r#" AND "doc"::text='{"k":1}'::text"#);
    }

    #[test]
    fn missing_primary_key_is_rejected() {
        let mut b = String::new();
        let mut col = pk_column("id", DataType::Integer, "7");
        col.primary_key = 0;
        assert!(matches!(
            where_pk_data_equal(&mut b, &[col]),
            Err(ExecError::MissingPrimaryKey)
        ));
    }
}
