//! In-memory `Store` implementation for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{JsonRow, Store, StoreError};

/// Mock store for testing.
///
/// Records every executed statement and transactional batch, and serves
/// queries from a queue of canned responses. A query with no queued
/// response returns no rows.
#[derive(Clone, Default)]
pub struct MockStore {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    executed: Vec<String>,
    transactions: Vec<Vec<String>>,
    queries: Vec<String>,
    responses: VecDeque<Vec<JsonRow>>,
}

impl MockStore {
    /// Creates an empty mock store.
    pub fn new() -> MockStore {
        MockStore::default()
    }

    /// Queues a multi-row response for the next query.
    pub fn push_rows(&self, rows: Vec<JsonRow>) {
        self.state.lock().unwrap().responses.push_back(rows);
    }

    /// Queues a single-row response for the next query.
    pub fn push_row(&self, row: JsonRow) {
        self.push_rows(vec![row]);
    }

    /// Queues an empty response for the next query.
    pub fn push_empty(&self) {
        self.push_rows(Vec::new());
    }

    /// Statements run through [`Store::exec`], in order.
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().unwrap().executed.clone()
    }

    /// Batches run through [`Store::exec_transaction`], in order.
    pub fn transactions(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().transactions.clone()
    }

    /// Queries run through [`Store::query_json`], in order.
    pub fn queries(&self) -> Vec<String> {
        self.state.lock().unwrap().queries.clone()
    }
}

#[async_trait]
impl Store for MockStore {
    async fn exec(&self, sql: &str) -> Result<u64, StoreError> {
        self.state.lock().unwrap().executed.push(sql.to_string());
        Ok(1)
    }

    async fn exec_transaction(&self, stmts: &[String]) -> Result<(), StoreError> {
        self.state
            .lock()
            .unwrap()
            .transactions
            .push(stmts.to_vec());
        Ok(())
    }

    async fn query_json(&self, sql: &str) -> Result<Vec<JsonRow>, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.queries.push(sql.to_string());
        Ok(state.responses.pop_front().unwrap_or_default())
    }
}

/// Builds a [`JsonRow`] from column name/value pairs.
pub fn json_row(pairs: &[(&str, serde_json::Value)]) -> JsonRow {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn serves_queued_responses_in_order() {
        let store = MockStore::new();
        store.push_row(json_row(&[("__id", json!(7))]));
        store.push_empty();

        let first = store.query_one_json("SELECT 1").await.unwrap();
        assert_eq!(first.unwrap()["__id"], json!(7));
        let second = store.query_one_json("SELECT 2").await.unwrap();
        assert!(second.is_none());
        let third = store.query_one_json("SELECT 3").await.unwrap();
        assert!(third.is_none());

        assert_eq!(store.queries().len(), 3);
    }

    #[tokio::test]
    async fn records_statements_and_transactions() {
        let store = MockStore::new();
        store.exec("UPDATE x").await.unwrap();
        store
            .exec_transaction(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(store.executed(), vec!["UPDATE x"]);
        assert_eq!(store.transactions(), vec![vec!["a", "b"]]);
    }
}
