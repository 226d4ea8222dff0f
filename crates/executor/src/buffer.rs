//! Execution buffer.
//!
//! Merge statements are not executed one at a time; they accumulate per
//! destination table and are flushed as one transaction. A schema DDL in
//! the middle of a batch must not interleave with in-flight DML against
//! the same table, so every schema transition flushes first.

use std::collections::HashMap;

use metadb_core::{SyncMode, Table};
use metadb_observability as obs;
use metadb_store::Store;
use tracing::trace;

use crate::error::{ExecError, ExecResult};

struct MergePair {
    update: String,
    insert: String,
}

/// Accumulates per-table statements between schema transitions and tracks
/// resync ids.
pub struct ExecBuffer<'a> {
    store: &'a dyn Store,
    sync_mode: SyncMode,
    merge_data: HashMap<Table, Vec<MergePair>>,
    sync_ids: HashMap<Table, Vec<i64>>,
}

impl<'a> ExecBuffer<'a> {
    /// Creates an empty buffer writing through `store`.
    pub fn new(store: &'a dyn Store, sync_mode: SyncMode) -> ExecBuffer<'a> {
        ExecBuffer {
            store,
            sync_mode,
            merge_data: HashMap::new(),
            sync_ids: HashMap::new(),
        }
    }

    /// The store this buffer writes through. Delete and truncate bypass
    /// the merge queue and execute directly against it.
    pub fn store(&self) -> &'a dyn Store {
        self.store
    }

    /// The buffer's sync mode.
    pub fn sync_mode(&self) -> SyncMode {
        self.sync_mode
    }

    /// Queues the update/insert pair of one merge.
    pub fn queue_merge_data(&mut self, table: &Table, update: String, insert: String) {
        self.merge_data
            .entry(table.clone())
            .or_default()
            .push(MergePair { update, insert });
    }

    /// Records an identity-hit `__id` for the table's sync side table.
    pub fn queue_sync_id(&mut self, table: &Table, id: i64) {
        self.sync_ids.entry(table.clone()).or_default().push(id);
    }

    /// Runs all pending work in one transaction and resets the buffer.
    ///
    /// For each table, queued updates run before queued inserts, each in
    /// the order appended. Tables are not ordered with respect to each
    /// other within a flush.
    pub async fn flush(&mut self) -> ExecResult<()> {
        let mut stmts = Vec::new();
        for pairs in self.merge_data.values() {
            for pair in pairs {
                stmts.push(pair.update.clone());
            }
            for pair in pairs {
                stmts.push(pair.insert.clone());
            }
        }
        for (table, ids) in &self.sync_ids {
            for id in ids {
                stmts.push(format!(
                    "INSERT INTO {}(__id)VALUES({id}) ON CONFLICT (__id) DO NOTHING",
                    table.sync_sql()
                ));
            }
        }
        if stmts.is_empty() {
            return Ok(());
        }
        let tables = self.merge_data.len() + self.sync_ids.len();
        trace!(tables, statements = stmts.len(), "flush");
        self.store
            .exec_transaction(&stmts)
            .await
            .map_err(|e| ExecError::store("flush", e))?;
        obs::record_flush(tables, stmts.len());
        self.merge_data.clear();
        self.sync_ids.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metadb_store::mocks::MockStore;

    #[tokio::test]
    async fn flush_orders_updates_before_inserts_per_table() {
        let store = MockStore::new();
        let mut ebuf = ExecBuffer::new(&store, SyncMode::Normal);
        let table = Table::new("s", "t");
        ebuf.queue_merge_data(&table, "u1".into(), "i1".into());
        ebuf.queue_merge_data(&table, "u2".into(), "i2".into());
        ebuf.flush().await.unwrap();

        let batches = store.transactions();
        assert_eq!(batches, vec![vec!["u1", "u2", "i1", "i2"]]);
    }

    #[tokio::test]
    async fn flush_resets_buffers() {
        let store = MockStore::new();
        let mut ebuf = ExecBuffer::new(&store, SyncMode::Normal);
        let table = Table::new("s", "t");
        ebuf.queue_merge_data(&table, "u".into(), "i".into());
        ebuf.flush().await.unwrap();
        ebuf.flush().await.unwrap();
        // second flush has nothing to do
        assert_eq!(store.transactions().len(), 1);
    }

    #[tokio::test]
    async fn flush_writes_sync_ids_as_upserts() {
        let store = MockStore::new();
        let mut ebuf = ExecBuffer::new(&store, SyncMode::Resync);
        let table = Table::new("s", "t");
        ebuf.queue_sync_id(&table, 99);
        ebuf.flush().await.unwrap();

        let batches = store.transactions();
        assert_eq!(
            batches[0],
            vec![r#"INSERT INTO "s"."t__sync"(__id)VALUES(99) ON CONFLICT (__id) DO NOTHING"#]
        );
    }
}
