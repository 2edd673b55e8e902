use super::{conflict_value, MirrorStore, UpsertBatch};
use crate::models::{AccountState, EntityKind};
use crate::{Error, Result};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One upsert request as seen by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertCall {
    pub table: &'static str,
    pub rows: usize,
}

/// In-memory `MirrorStore` for local runs and tests.
///
/// Rows are merged column-by-column on conflict, so columns the pipeline
/// never writes (the account `active` flag) survive re-syncs.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<DashMap<&'static str, BTreeMap<String, serde_json::Value>>>,
    calls: Arc<Mutex<Vec<UpsertCall>>>,
    rejected: Arc<DashSet<&'static str>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows currently stored in `kind`'s table, ordered by conflict key.
    pub fn rows(&self, kind: EntityKind) -> Vec<serde_json::Value> {
        self.tables
            .get(kind.table())
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn row_count(&self, kind: EntityKind) -> usize {
        self.tables.get(kind.table()).map(|t| t.len()).unwrap_or(0)
    }

    /// Every upsert request received so far (primarily for tests).
    pub async fn calls(&self) -> Vec<UpsertCall> {
        self.calls.lock().await.clone()
    }

    /// Set the stored `active` flag of an account, creating the row if needed.
    pub fn set_active(&self, account_id: &str, active: bool) {
        let mut table = self.tables.entry(EntityKind::AdAccount.table()).or_default();
        let row = table
            .entry(account_id.to_string())
            .or_insert_with(|| serde_json::json!({ "id": account_id }));
        if let Some(obj) = row.as_object_mut() {
            obj.insert("active".to_string(), serde_json::Value::Bool(active));
        }
    }

    /// Make every subsequent upsert into `kind`'s table fail.
    pub fn reject(&self, kind: EntityKind) {
        self.rejected.insert(kind.table());
    }
}

#[async_trait]
impl MirrorStore for MemoryStore {
    #[tracing::instrument(level = "debug", skip(self, batch), fields(table = batch.table(), rows = batch.len()))]
    async fn upsert(&self, batch: UpsertBatch) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        let table_name = batch.table();
        self.calls.lock().await.push(UpsertCall {
            table: table_name,
            rows: batch.len(),
        });

        if self.rejected.contains(table_name) {
            return Err(Error::Write {
                table: table_name.to_string(),
                status: None,
                message: "table rejected writes".to_string(),
            });
        }

        // Resolve every key first so a bad row rejects the whole batch.
        let keyed = batch
            .rows
            .into_iter()
            .map(|row| conflict_value(batch.kind, &row).map(|k| (k, row)))
            .collect::<Result<Vec<_>>>()?;

        let written = keyed.len();
        let mut table = self.tables.entry(table_name).or_default();
        for (key, row) in keyed {
            match table.get_mut(&key) {
                Some(serde_json::Value::Object(existing)) if row.is_object() => {
                    if let serde_json::Value::Object(incoming) = row {
                        existing.extend(incoming);
                    }
                }
                _ => {
                    table.insert(key, row);
                }
            }
        }
        Ok(written)
    }

    async fn account_states(&self) -> Result<Vec<AccountState>> {
        let Some(table) = self.tables.get(EntityKind::AdAccount.table()) else {
            return Ok(Vec::new());
        };
        Ok(table
            .iter()
            .map(|(id, row)| AccountState {
                id: id.clone(),
                active: row
                    .get("active")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(true),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn batch(rows: Vec<serde_json::Value>) -> UpsertBatch {
        UpsertBatch {
            kind: EntityKind::AdAccount,
            rows,
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_keeps_unwritten_columns() {
        let store = MemoryStore::new();
        store.set_active("act_1", false);

        let rows = vec![json!({"id": "act_1", "name": "Main"}), json!({"id": "act_2"})];
        assert_eq!(store.upsert(batch(rows.clone())).await.unwrap(), 2);
        assert_eq!(store.upsert(batch(rows)).await.unwrap(), 2);

        assert_eq!(store.row_count(EntityKind::AdAccount), 2);
        let mut states = store.account_states().await.unwrap();
        states.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(
            states,
            vec![
                AccountState { id: "act_1".into(), active: false },
                AccountState { id: "act_2".into(), active: true },
            ]
        );
    }

    #[tokio::test]
    async fn empty_batch_issues_no_request() {
        let store = MemoryStore::new();
        assert_eq!(store.upsert(batch(vec![])).await.unwrap(), 0);
        assert!(store.calls().await.is_empty());
    }

    #[tokio::test]
    async fn rejected_table_fails_whole_batch() {
        let store = MemoryStore::new();
        store.reject(EntityKind::AdAccount);
        let err = store
            .upsert(batch(vec![json!({"id": "act_1"})]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Write { .. }));
        assert_eq!(store.row_count(EntityKind::AdAccount), 0);
    }
}
