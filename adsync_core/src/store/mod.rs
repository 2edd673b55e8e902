//! Write side of the pipeline: idempotent batch upserts into mirror tables.

pub mod memory;

pub use memory::MemoryStore;

use crate::models::{AccountState, EntityKind};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;

/// Rows destined for one table, written in a single upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertBatch {
    pub kind: EntityKind,
    pub rows: Vec<serde_json::Value>,
}

impl UpsertBatch {
    pub fn from_rows<T: Serialize>(kind: EntityKind, rows: &[T]) -> Result<Self> {
        let rows = rows
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::backend(format!("serialize {kind} rows"), e))?;
        Ok(Self { kind, rows })
    }

    pub fn table(&self) -> &'static str {
        self.kind.table()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Conflict-key value of a serialized row, e.g. `"123"` or `"123|2024-01-01"`.
pub fn conflict_value(kind: EntityKind, row: &serde_json::Value) -> Result<String> {
    let mut parts = Vec::with_capacity(kind.conflict_columns().len());
    for col in kind.conflict_columns() {
        let part = match row.get(*col) {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => {
                return Err(Error::Write {
                    table: kind.table().to_string(),
                    status: None,
                    message: format!("row is missing conflict column '{col}'"),
                })
            }
        };
        parts.push(part);
    }
    Ok(parts.join("|"))
}

/// Relational destination of the mirror.
///
/// `upsert` inserts or fully replaces rows by the batch's conflict key. A
/// rejection fails the whole batch; partial writes are not reported.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// Returns the number of rows written. Empty batches issue no request.
    async fn upsert(&self, batch: UpsertBatch) -> Result<usize>;

    /// Known ad accounts with their stored `active` flag.
    async fn account_states(&self) -> Result<Vec<AccountState>>;
}
