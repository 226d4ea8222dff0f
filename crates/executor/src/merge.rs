//! Merge execution: identity check, unavailable-column backfill, and
//! bitemporal row maintenance.

use metadb_core::{encode_sql_data, Command, SyncMode, Table};
use metadb_store::Store;
use tracing::{trace, warn};

use crate::buffer::ExecBuffer;
use crate::error::{ExecError, ExecResult};
use crate::exec::where_pk_data_equal;

/// Executes a merge command.
///
/// A command whose payload matches the current row is a no-op (in resync
/// mode the matching `__id` is recorded). Otherwise the previous current
/// row is closed with the command's source timestamp and a new current
/// row is inserted; both statements are queued in the buffer.
pub async fn exec_merge_data(ebuf: &mut ExecBuffer<'_>, cmd: &mut Command) -> ExecResult<()> {
    let table = cmd.table();

    // Check if the current record (if any) is identical to the new one.
    // If so, we can avoid making any changes in the database.
    let (identical, id) = is_current_identical(ebuf.store(), cmd, &table).await?;
    if identical {
        trace!(table = %table, "new command matches current record");
        if ebuf.sync_mode() == SyncMode::Resync {
            if let Some(id) = id {
                ebuf.queue_sync_id(&table, id);
            }
        }
        return Ok(());
    }

    fill_unavailable_columns(ebuf.store(), cmd, &table).await?;

    // Close the current row, if any.
    let mut b = format!(
        "UPDATE {} SET __end='{}',__current='f' WHERE __current AND __origin='{}'",
        table.history_sql(),
        cmd.source_timestamp,
        cmd.origin
    );
    where_pk_data_equal(&mut b, &cmd.columns)?;
    let update = b;

    // Insert the new row.
    let mut b = format!("INSERT INTO {}(__start,__end,__current", table.history_sql());
    if !cmd.origin.is_empty() {
        b.push_str(",__origin");
    }
    for col in &cmd.columns {
        b.push_str(",\"");
        b.push_str(&col.name);
        b.push('"');
    }
    b.push_str(")VALUES('");
    b.push_str(&cmd.source_timestamp);
    b.push_str("','9999-12-31 00:00:00Z','t'");
    if !cmd.origin.is_empty() {
        b.push_str(",'");
        b.push_str(&cmd.origin);
        b.push('\'');
    }
    for col in &cmd.columns {
        b.push(',');
        b.push_str(&encode_sql_data(col.sql_data.as_deref(), col.dtype));
    }
    b.push_str(") RETURNING __id");
    let insert = b;

    ebuf.queue_merge_data(&table, update, insert);
    Ok(())
}

/// Looks for a row in the current view identical to the command.
///
/// The row is matched on `__origin` and on every non-unavailable column;
/// unavailable columns are wildcards, since an unsent value is assumed to
/// equal the stored one. A returned column outside the command must be
/// NULL for the row to match.
pub async fn is_current_identical(
    store: &dyn Store,
    cmd: &Command,
    table: &Table,
) -> ExecResult<(bool, Option<i64>)> {
    let mut b = format!(
        "SELECT * FROM {} WHERE __origin='{}'",
        table.sql(),
        cmd.origin
    );
    for col in &cmd.columns {
        if col.unavailable {
            continue;
        }
        b.push_str(" AND \"");
        b.push_str(&col.name);
        if col.data.is_none() {
            b.push_str("\" IS NULL");
        } else {
            b.push_str("\"=");
            b.push_str(&encode_sql_data(col.sql_data.as_deref(), col.dtype));
        }
    }
    b.push_str(" LIMIT 1");

    let Some(row) = store
        .query_one_json(&b)
        .await
        .map_err(|e| ExecError::store("querying for matching current row", e))?
    else {
        return Ok((false, None));
    };

    let columns = cmd.column_map();
    let mut id = None;
    for (name, value) in &row {
        if name == "__id" {
            id = Some(value.as_i64().ok_or_else(|| {
                ExecError::Internal("\"__id\" is not an integer".to_string())
            })?);
            continue;
        }
        if name.starts_with("__") {
            continue;
        }
        if columns.contains_key(name.as_str()) {
            continue;
        }
        // An extra column with a value means no match.
        if !value.is_null() {
            return Ok((false, None));
        }
    }
    Ok((true, id))
}

/// Substitutes current-row values for every unavailable column.
///
/// If no current row exists the columns are left unbound and a warning is
/// logged; they will encode as NULL.
async fn fill_unavailable_columns(
    store: &dyn Store,
    cmd: &mut Command,
    table: &Table,
) -> ExecResult<()> {
    let unavailable: Vec<usize> = cmd
        .columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.unavailable)
        .map(|(i, _)| i)
        .collect();
    if unavailable.is_empty() {
        return Ok(());
    }

    let mut b = String::from("SELECT ");
    for (i, &ci) in unavailable.iter().enumerate() {
        if i != 0 {
            b.push(',');
        }
        let name = &cmd.columns[ci].name;
        b.push('"');
        b.push_str(name);
        b.push_str("\"::text AS \"");
        b.push_str(name);
        b.push('"');
    }
    b.push_str(&format!(
        " FROM {} WHERE __origin='{}'",
        table.sql(),
        cmd.origin
    ));
    where_pk_data_equal(&mut b, &cmd.columns)?;
    b.push_str(" LIMIT 1");

    let Some(row) = store
        .query_one_json(&b)
        .await
        .map_err(|e| ExecError::store("querying for unavailable data", e))?
    else {
        warn!(table = %table, "no current value for unavailable data");
        return Ok(());
    };
    for ci in unavailable {
        let name = cmd.columns[ci].name.clone();
        match row.get(&name).and_then(|v| v.as_str()) {
            Some(value) => {
                trace!(table = %table, column = %name,
                    "found current value for unavailable data");
                cmd.columns[ci].sql_data = Some(value.to_string());
            }
            None => {
                return Err(ExecError::Internal(
                    "nil value in replacing unavailable data".to_string(),
                ));
            }
        }
    }
    Ok(())
}
