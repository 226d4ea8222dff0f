//! Schema delta discovery and in-place evolution.
//!
//! The delta between a command's declared columns and the stored table
//! schema is computed first; applying it then walks the evolution rules.
//! Schema changes are widening only: Numeric never narrows, Text never
//! reverts to another type, and a UUID column is not disturbed by a null
//! text sample.

use metadb_catalog::Catalog;
use metadb_core::{Command, DataType, Table};
use metadb_observability as obs;
use tracing::trace;

use crate::buffer::ExecBuffer;
use crate::error::{ExecError, ExecResult};

/// One column difference between a command and the stored schema.
#[derive(Clone, Debug)]
pub struct DeltaColumn {
    /// Column name.
    pub name: String,
    /// The column does not exist in the stored table.
    pub new_column: bool,
    /// Stored type.
    pub old_type: DataType,
    /// Stored type size; for Text this is the varchar width.
    pub old_type_size: i64,
    /// Incoming type.
    pub new_type: DataType,
    /// Incoming type size.
    pub new_type_size: i64,
    /// Incoming logical value; used to decide the UUID null-sample rule.
    pub new_data: Option<serde_json::Value>,
}

/// Ordered column deltas for one command.
#[derive(Clone, Debug, Default)]
pub struct DeltaSchema {
    /// The deltas, in command column order.
    pub columns: Vec<DeltaColumn>,
}

/// Computes the delta between the command's columns and the stored schema.
///
/// An unknown table yields an all-new-columns delta. Same-type size
/// differences are emitted only when the incoming size is larger; schema
/// evolution never narrows a column.
pub fn find_delta_schema(cat: &dyn Catalog, cmd: &Command) -> ExecResult<DeltaSchema> {
    let schema = cat
        .select_table_schema(&cmd.table())
        .map_err(|e| ExecError::schema("finding schema delta", e))?;
    let mut delta = DeltaSchema::default();
    for col in &cmd.columns {
        let Some(stored) = schema.column(&col.name) else {
            delta.columns.push(DeltaColumn {
                name: col.name.clone(),
                new_column: true,
                old_type: col.dtype,
                old_type_size: 0,
                new_type: col.dtype,
                new_type_size: col.dtype_size,
                new_data: col.data.clone(),
            });
            continue;
        };
        let grows = match col.dtype {
            DataType::Text => match stored.char_max_len {
                Some(max) => col.dtype_size > max,
                // Unbounded text accepts any width.
                None => false,
            },
            DataType::Integer | DataType::Float => col.dtype_size > stored.dtype_size,
            _ => false,
        };
        if stored.dtype == col.dtype && !grows {
            continue;
        }
        delta.columns.push(DeltaColumn {
            name: col.name.clone(),
            new_column: false,
            old_type: stored.dtype,
            old_type_size: stored.dtype_size,
            new_type: col.dtype,
            new_type_size: col.dtype_size,
            new_data: col.data.clone(),
        });
    }
    Ok(delta)
}

/// Applies a delta schema, evolving the stored table in place.
///
/// May adjust data types in `cmd`: a column whose stored type is Text
/// stays Text, and the command's column is rewritten so its literal is
/// encoded as text.
pub async fn apply_delta_schema(
    ebuf: &mut ExecBuffer<'_>,
    cat: &dyn Catalog,
    cmd: &mut Command,
    mut delta: DeltaSchema,
) -> ExecResult<()> {
    let table = cmd.table();
    for col in &mut delta.columns {
        if col.new_column {
            trace!(table = %table, column = %col.name,
                dtype = %col.new_type.to_sql(col.new_type_size), "new column");
            flush_for(ebuf, &table, &col.name, "adding column").await?;
            cat.add_column(&table, &col.name, col.new_type, col.new_type_size)
                .await
                .map_err(|e| ExecError::schema(format!("adding column {:?}", col.name), e))?;
            obs::record_schema_change(&table.to_string(), &col.name);
            continue;
        }

        // If the type is changing from text to another type, keep the type
        // as text and let the executor cast the data. This prevents poorly
        // typed JSON fields from causing runaway type changes.
        if col.old_type == DataType::Text && col.new_type != DataType::Text {
            let mut type_size: i64 = -1;
            for c in cmd.columns.iter_mut() {
                if c.name == col.name {
                    type_size = c.sql_data.as_ref().map_or(0, |s| s.len() as i64);
                    c.dtype = DataType::Text;
                    c.dtype_size = type_size;
                    break;
                }
            }
            if type_size == -1 {
                return Err(ExecError::Internal(format!(
                    "column not found in command: {}.{} ({})",
                    table.schema, table.table, col.name
                )));
            }
            if type_size <= col.old_type_size {
                continue;
            }
            // Carry the adjustment into the delta so the width is widened
            // below.
            col.new_type = DataType::Text;
            col.new_type_size = type_size;
        }

        // Don't change a UUID type on a null value; UUID may have been
        // inferred from data.
        if col.old_type == DataType::Uuid
            && col.new_type == DataType::Text
            && col.new_data.is_none()
        {
            continue;
        }

        // Same-type size growth: widen in place.
        if col.old_type == DataType::Integer && col.new_type == DataType::Integer {
            alter(ebuf, cat, &table, &col.name, DataType::Integer, col.new_type_size).await?;
            continue;
        }
        if col.old_type == DataType::Float && col.new_type == DataType::Float {
            alter(ebuf, cat, &table, &col.name, DataType::Float, col.new_type_size).await?;
            continue;
        }

        // Integer to float converts with a cast.
        if col.old_type == DataType::Integer && col.new_type == DataType::Float {
            alter(ebuf, cat, &table, &col.name, DataType::Float, col.new_type_size).await?;
            continue;
        }

        // Integer or float to numeric converts with a cast.
        if (col.old_type == DataType::Integer || col.old_type == DataType::Float)
            && col.new_type == DataType::Numeric
        {
            alter(ebuf, cat, &table, &col.name, DataType::Numeric, 0).await?;
            continue;
        }

        // Float to integer widens to numeric instead, preserving any
        // fractional data already stored.
        if col.old_type == DataType::Float && col.new_type == DataType::Integer {
            alter(ebuf, cat, &table, &col.name, DataType::Numeric, 0).await?;
            continue;
        }

        // Never narrow numeric.
        if col.old_type == DataType::Numeric
            && (col.new_type == DataType::Integer || col.new_type == DataType::Float)
        {
            continue;
        }

        // Text width growth, including widths adjusted by the text-clash
        // rule above.
        if col.old_type == DataType::Text && col.new_type == DataType::Text {
            if col.new_type_size > col.old_type_size {
                alter(ebuf, cat, &table, &col.name, DataType::Text, col.new_type_size).await?;
            }
            continue;
        }

        // Any remaining incompatible change falls back to text.
        if col.old_type != DataType::Text {
            trace!(table = %table, column = %col.name, old = %col.old_type,
                new = %col.new_type, "incompatible type change, converting to text");
            alter(ebuf, cat, &table, &col.name, DataType::Text, 0).await?;
        }
    }
    Ok(())
}

async fn alter(
    ebuf: &mut ExecBuffer<'_>,
    cat: &dyn Catalog,
    table: &Table,
    name: &str,
    dtype: DataType,
    size: i64,
) -> ExecResult<()> {
    flush_for(ebuf, table, name, "altering column").await?;
    cat.alter_column_type(table, name, dtype, size, false)
        .await
        .map_err(|e| ExecError::schema(format!("altering column {name:?} to {dtype}"), e))?;
    obs::record_schema_change(&table.to_string(), name);
    Ok(())
}

async fn flush_for(
    ebuf: &mut ExecBuffer<'_>,
    table: &Table,
    name: &str,
    action: &str,
) -> ExecResult<()> {
    ebuf.flush().await.map_err(|e| match e {
        ExecError::Store { source, .. } => ExecError::Store {
            context: format!("delta schema: {action} {name:?} in table {table}"),
            source,
        },
        other => other,
    })
}
