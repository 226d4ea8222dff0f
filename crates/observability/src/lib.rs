//! metadb-observability
//!
//! Process totals for the executor, emitted as structured log entries.

#![warn(missing_docs)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::info;

static RECORDS_PROCESSED_TOTAL: AtomicU64 = AtomicU64::new(0);
static FLUSHES_TOTAL: AtomicU64 = AtomicU64::new(0);
static SCHEMA_CHANGES_TOTAL: AtomicU64 = AtomicU64::new(0);

fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Records the completion of one command batch.
pub fn record_batch(source: &str, records: usize, duration: Duration) {
    let total = RECORDS_PROCESSED_TOTAL.fetch_add(records as u64, Ordering::Relaxed) + records as u64;
    info!(
        metric = "batch_latency_ms",
        source,
        records,
        latency_ms = duration_ms(duration),
        records_processed_total = total
    );
}

/// Records one execution-buffer flush.
pub fn record_flush(tables: usize, statements: usize) {
    let total = FLUSHES_TOTAL.fetch_add(1, Ordering::Relaxed) + 1;
    info!(
        metric = "flush",
        tables,
        statements,
        flushes_total = total
    );
}

/// Records one schema evolution step.
pub fn record_schema_change(table: &str, column: &str) {
    let total = SCHEMA_CHANGES_TOTAL.fetch_add(1, Ordering::Relaxed) + 1;
    info!(
        metric = "schema_change",
        table,
        column,
        schema_changes_total = total
    );
}
