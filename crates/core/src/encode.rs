//! SQL literal encoding.

use crate::command::DataType;

/// Errors raised while encoding or classifying values.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// A type name outside the supported dtype set.
    #[error("unknown data type: {0}")]
    UnknownType(String),
}

/// Encodes a string as a single-quoted SQL literal, doubling embedded
/// single quotes.
pub fn encode_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push('\'');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

/// Encodes a column value as a SQL literal.
///
/// `None` encodes as `NULL`. Text and JSON are quoted with escaping;
/// date/time types and UUIDs are quoted unchanged; numeric and boolean
/// values pass through verbatim.
pub fn encode_sql_data(sql_data: Option<&str>, dtype: DataType) -> String {
    let Some(data) = sql_data else {
        return "NULL".to_string();
    };
    match dtype {
        DataType::Text | DataType::Json => encode_string(data),
        DataType::Date
        | DataType::Time
        | DataType::Timetz
        | DataType::Timestamp
        | DataType::Timestamptz
        | DataType::Uuid => format!("'{data}'"),
        DataType::Integer | DataType::Float | DataType::Numeric | DataType::Boolean => {
            data.to_string()
        }
    }
}
