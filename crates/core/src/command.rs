//! Change commands produced by a source adapter and consumed by the executor.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::encode::EncodeError;
use crate::relation::Table;

/// Operation carried by a change command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    /// Upsert a new version of a row.
    Merge,
    /// Close the current version of a row.
    Delete,
    /// Close all current rows of the command's origin.
    Truncate,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Merge => write!(f, "merge"),
            Op::Delete => write!(f, "delete"),
            Op::Truncate => write!(f, "truncate"),
        }
    }
}

/// Logical column types understood by the executor.
///
/// Sizes are carried separately: for `Integer` and `Float` the size is the
/// width in bytes (2/4/8), for `Text` it is the byte length of the encoded
/// literal, and for the remaining types it is unused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Character data of any length.
    Text,
    /// Integer of 2, 4, or 8 bytes.
    Integer,
    /// Floating point of 4 or 8 bytes.
    Float,
    /// Arbitrary-precision numeric.
    Numeric,
    /// Boolean.
    Boolean,
    /// Calendar date.
    Date,
    /// Time of day.
    Time,
    /// Time of day with time zone.
    Timetz,
    /// Timestamp without time zone.
    Timestamp,
    /// Timestamp with time zone.
    Timestamptz,
    /// Universally unique identifier.
    Uuid,
    /// JSON document.
    Json,
}

impl DataType {
    /// Returns the SQL type name for a column of this type and size.
    pub fn to_sql(self, size: i64) -> String {
        match self {
            DataType::Text => {
                if size > 0 {
                    format!("varchar({size})")
                } else {
                    "text".to_string()
                }
            }
            DataType::Integer => match size {
                2 => "smallint".to_string(),
                4 => "integer".to_string(),
                _ => "bigint".to_string(),
            },
            DataType::Float => match size {
                4 => "real".to_string(),
                _ => "double precision".to_string(),
            },
            DataType::Numeric => "numeric".to_string(),
            DataType::Boolean => "boolean".to_string(),
            DataType::Date => "date".to_string(),
            DataType::Time => "time without time zone".to_string(),
            DataType::Timetz => "time with time zone".to_string(),
            DataType::Timestamp => "timestamp without time zone".to_string(),
            DataType::Timestamptz => "timestamp with time zone".to_string(),
            DataType::Uuid => "uuid".to_string(),
            DataType::Json => "jsonb".to_string(),
        }
    }

    /// Maps an `information_schema` type name back to a logical type and
    /// size. Returns `None` for type names the executor does not manage.
    pub fn from_sql(name: &str) -> Option<(DataType, i64)> {
        match name {
            "text" | "character varying" => Some((DataType::Text, 0)),
            "smallint" => Some((DataType::Integer, 2)),
            "integer" => Some((DataType::Integer, 4)),
            "bigint" => Some((DataType::Integer, 8)),
            "real" => Some((DataType::Float, 4)),
            "double precision" => Some((DataType::Float, 8)),
            "numeric" => Some((DataType::Numeric, 0)),
            "boolean" => Some((DataType::Boolean, 0)),
            "date" => Some((DataType::Date, 0)),
            "time without time zone" => Some((DataType::Time, 0)),
            "time with time zone" => Some((DataType::Timetz, 0)),
            "timestamp without time zone" => Some((DataType::Timestamp, 0)),
            "timestamp with time zone" => Some((DataType::Timestamptz, 0)),
            "uuid" => Some((DataType::Uuid, 0)),
            "json" | "jsonb" => Some((DataType::Json, 0)),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Text => "text",
            DataType::Integer => "integer",
            DataType::Float => "float",
            DataType::Numeric => "numeric",
            DataType::Boolean => "boolean",
            DataType::Date => "date",
            DataType::Time => "time",
            DataType::Timetz => "timetz",
            DataType::Timestamp => "timestamp",
            DataType::Timestamptz => "timestamptz",
            DataType::Uuid => "uuid",
            DataType::Json => "json",
        };
        write!(f, "{name}")
    }
}

impl FromStr for DataType {
    type Err = EncodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(DataType::Text),
            "integer" => Ok(DataType::Integer),
            "float" => Ok(DataType::Float),
            "numeric" => Ok(DataType::Numeric),
            "boolean" => Ok(DataType::Boolean),
            "date" => Ok(DataType::Date),
            "time" => Ok(DataType::Time),
            "timetz" => Ok(DataType::Timetz),
            "timestamp" => Ok(DataType::Timestamp),
            "timestamptz" => Ok(DataType::Timestamptz),
            "uuid" => Ok(DataType::Uuid),
            "json" => Ok(DataType::Json),
            other => Err(EncodeError::UnknownType(other.to_string())),
        }
    }
}

/// Synchronization mode for a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// An identity hit is a no-op.
    Normal,
    /// An identity hit records the matching `__id` for the sync side table.
    Resync,
}

/// One column of a change command.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommandColumn {
    /// Column name.
    pub name: String,
    /// Logical column type.
    pub dtype: DataType,
    /// Type size; see [`DataType`] for its meaning per type.
    #[serde(default)]
    pub dtype_size: i64,
    /// Primary-key ordinal; 0 if the column is not part of the key.
    #[serde(default)]
    pub primary_key: i32,
    /// Logical value; `None` means SQL NULL.
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    /// Pre-encoded SQL literal; `None` exactly when the value is NULL.
    #[serde(default)]
    pub sql_data: Option<String>,
    /// The upstream did not resend this value; read it back from the
    /// current row at write time.
    #[serde(default)]
    pub unavailable: bool,
}

/// A unit of upstream change addressed to one destination table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Command {
    /// Operation to perform.
    pub op: Op,
    /// Destination schema name.
    pub schema_name: String,
    /// Destination table name.
    pub table_name: String,
    /// Transform-source table, set when the destination is derived from
    /// another table.
    #[serde(default)]
    pub parent_table: Option<Table>,
    /// Identifier of the upstream system; scopes every statement so that
    /// multiple origins can share one destination table.
    #[serde(default)]
    pub origin: String,
    /// Source timestamp, monotonically non-decreasing within one origin.
    pub source_timestamp: String,
    /// The destination is a transform target.
    #[serde(default)]
    pub transformed: bool,
    /// Ordered column list; each name appears once.
    pub columns: Vec<CommandColumn>,
}

impl Command {
    /// Destination table of the command.
    pub fn table(&self) -> Table {
        Table::new(&self.schema_name, &self.table_name)
    }

    /// Index of the command's columns by name.
    pub fn column_map(&self) -> HashMap<&str, &CommandColumn> {
        self.columns
            .iter()
            .map(|c| (c.name.as_str(), c))
            .collect()
    }
}

/// Ordered list of commands from one source batch.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CommandList {
    /// The commands, in stream order.
    pub cmd: Vec<Command>,
}
