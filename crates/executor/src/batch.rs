//! Batch partitioner.
//!
//! Splits an ordered command list into maximal sub-batches within which no
//! schema change is needed from one command to the next, so that each
//! sub-batch can run against a settled schema and flush once.

use std::ops::Range;

use metadb_catalog::Catalog;
use metadb_core::{Command, DataType, Op};

/// Partitions `commands` into schema-homogeneous sub-batches.
///
/// The returned ranges are in input order and their concatenation covers
/// the whole list. Delete and truncate commands never open a new
/// sub-batch; the previous merge command remains the comparison point
/// across them.
pub fn partition_commands(cat: &dyn Catalog, commands: &[Command]) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    if commands.is_empty() {
        return ranges;
    }
    let mut start = 0;
    let mut prev: Option<&Command> = None;
    for (i, cur) in commands.iter().enumerate() {
        if cur.op != Op::Merge {
            continue;
        }
        if let Some(p) = prev {
            if requires_schema_change(cat, p, cur) {
                ranges.push(start..i);
                start = i;
            }
        }
        prev = Some(cur);
    }
    ranges.push(start..commands.len());
    ranges
}

/// Whether executing `cur` after `prev` may require a schema change.
pub fn requires_schema_change(cat: &dyn Catalog, prev: &Command, cur: &Command) -> bool {
    if cur.op != Op::Merge {
        return false;
    }
    if prev.op != cur.op
        || prev.schema_name != cur.schema_name
        || prev.table_name != cur.table_name
    {
        return true;
    }
    if prev.columns.len() != cur.columns.len() {
        return true;
    }
    let schema = cat
        .select_table_schema(&cur.table())
        .unwrap_or_default();
    for (p, c) in prev.columns.iter().zip(cur.columns.iter()) {
        if p.name != c.name || p.dtype != c.dtype || p.primary_key != c.primary_key {
            return true;
        }
        if c.dtype == DataType::Text {
            // Text widening depends on the stored varchar width, not on
            // the previous command.
            match schema.column(&c.name).and_then(|s| s.char_max_len) {
                Some(max) if max >= c.dtype_size => {}
                _ => return true,
            }
        } else if p.dtype_size != c.dtype_size {
            return true;
        }
    }
    false
}
