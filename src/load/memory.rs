// src/load/memory.rs
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{row_timestamp, StoredRow, TableStore};
use crate::error::{EtlError, EtlResult};
use crate::record::Record;

/// In-process store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Vec<StoredRow>>>,
    /// When set, every append fails; simulates a dropped connection.
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Inserts rows with explicit timestamps, bypassing `append`.
    pub fn seed(&self, table: &str, rows: Vec<StoredRow>) {
        let mut g = self.tables.lock().expect("memory store mutex poisoned");
        g.entry(table.to_string()).or_default().extend(rows);
    }
}

#[async_trait]
impl TableStore for MemoryStore {
    async fn append(&self, table: &str, rows: &[Record]) -> EtlResult<usize> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(EtlError::StoreWrite {
                table: table.to_string(),
                reason: "simulated write failure".to_string(),
            });
        }
        let now = Utc::now();
        let mut g = self.tables.lock().expect("memory store mutex poisoned");
        let t = g.entry(table.to_string()).or_default();
        t.extend(rows.iter().map(|r| StoredRow {
            collected_at: row_timestamp(r, now),
            record: r.clone(),
        }));
        Ok(rows.len())
    }

    async fn read_ordered(&self, table: &str) -> EtlResult<Vec<StoredRow>> {
        let g = self.tables.lock().expect("memory store mutex poisoned");
        let mut rows = g.get(table).cloned().unwrap_or_default();
        rows.sort_by_key(|r| r.collected_at);
        Ok(rows)
    }

    async fn count(&self, table: &str) -> EtlResult<Option<usize>> {
        let g = self.tables.lock().expect("memory store mutex poisoned");
        Ok(g.get(table).map(Vec::len))
    }

    async fn close(&self) {}
}
