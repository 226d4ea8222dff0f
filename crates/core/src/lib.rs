//! metadb-core
//!
//! Core data model for the metadb stream-to-store executor: change commands
//! and their columns, relation identifiers with dialect formatting, and SQL
//! literal encoding.

#![warn(missing_docs)]

pub mod command;
pub mod encode;
pub mod relation;

pub use command::{Command, CommandColumn, CommandList, DataType, Op, SyncMode};
pub use encode::{encode_sql_data, encode_string, EncodeError};
pub use relation::{identifier_sql, Column, Table};
