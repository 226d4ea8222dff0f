//! Relation identifiers and their SQL renderings.
//!
//! Every destination table is backed by a bitemporal history table named
//! with a `__` suffix; the unsuffixed name is a view over the rows with
//! `__current = true`. Resync bookkeeping lives in a `__sync` side table.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Renders a quoted SQL identifier, doubling embedded double quotes.
pub fn identifier_sql(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    out.push('"');
    for c in name.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// A schema-qualified table name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Table {
    /// Schema name.
    pub schema: String,
    /// Table name.
    pub table: String,
}

impl Table {
    /// Creates a table identifier.
    pub fn new(schema: &str, table: &str) -> Table {
        Table {
            schema: schema.to_string(),
            table: table.to_string(),
        }
    }

    /// Quoted name of the current-row view.
    pub fn sql(&self) -> String {
        format!(
            "{}.{}",
            identifier_sql(&self.schema),
            identifier_sql(&self.table)
        )
    }

    /// Quoted name of the bitemporal history table.
    pub fn history_sql(&self) -> String {
        format!(
            "{}.{}",
            identifier_sql(&self.schema),
            identifier_sql(&self.history_name())
        )
    }

    /// Quoted name of the resync side table.
    pub fn sync_sql(&self) -> String {
        format!(
            "{}.{}",
            identifier_sql(&self.schema),
            identifier_sql(&format!("{}__sync", self.table))
        )
    }

    /// Unquoted name of the history table.
    pub fn history_name(&self) -> String {
        format!("{}__", self.table)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// A fully qualified column name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Column {
    /// Schema name.
    pub schema: String,
    /// Table name (the logical table, without the history suffix).
    pub table: String,
    /// Column name.
    pub column: String,
}

impl Column {
    /// Creates a column identifier for a column of `table`.
    pub fn new(table: &Table, column: &str) -> Column {
        Column {
            schema: table.schema.clone(),
            table: table.table.clone(),
            column: column.to_string(),
        }
    }

    /// The table this column belongs to.
    pub fn table(&self) -> Table {
        Table::new(&self.schema, &self.table)
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.schema, self.table, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_renderings() {
        let t = Table::new("library", "patron");
        assert_eq!(t.sql(), r#""library"."patron""#);
        assert_eq!(t.history_sql(), r#""library"."patron__""#);
        assert_eq!(t.sync_sql(), r#""library"."patron__sync""#);
        assert_eq!(t.to_string(), "library.patron");
    }

    #[test]
    fn identifier_quoting() {
        assert_eq!(identifier_sql("plain"), "\"plain\"");
        assert_eq!(identifier_sql("odd\"name"), "\"odd\"\"name\"");
    }
}
