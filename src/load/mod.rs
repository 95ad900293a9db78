// src/load/mod.rs
//! Sink and the table-oriented store it appends to.

pub mod memory;
pub mod sql;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use once_cell::sync::OnceCell;
use regex::Regex;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{EtlError, EtlResult};
use crate::record::{Batch, Record};

pub use memory::MemoryStore;
pub use sql::SqlStore;

/// A row as read back from a table.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub collected_at: DateTime<Utc>,
    pub record: Record,
}

/// Append-only named tables. Created on first write, never dropped here.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Appends all rows in one unit; returns the number written.
    async fn append(&self, table: &str, rows: &[Record]) -> EtlResult<usize>;

    /// All rows of `table` ordered by `collected_at`. A missing table has no rows.
    async fn read_ordered(&self, table: &str) -> EtlResult<Vec<StoredRow>>;

    /// Row count, or `None` when the table does not exist yet.
    async fn count(&self, table: &str) -> EtlResult<Option<usize>>;

    /// Releases connections. Further calls may fail.
    async fn close(&self);
}

pub type SharedStore = Arc<dyn TableStore>;

/// Table names end up in SQL text, so only plain identifiers are accepted.
pub fn check_table_name(table: &str) -> EtlResult<()> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("table regex"));
    if re.is_match(table) {
        Ok(())
    } else {
        Err(EtlError::InvalidTableName(table.to_string()))
    }
}

/// Collection time of a record; rows without one are stamped at write time.
pub(crate) fn row_timestamp(rec: &Record, fallback: DateTime<Utc>) -> DateTime<Utc> {
    rec.collected_at().unwrap_or(fallback)
}

/// Writes batches to a store handle that may be absent.
#[derive(Clone)]
pub struct Sink {
    store: Option<SharedStore>,
}

impl Sink {
    pub fn new(store: Option<SharedStore>) -> Self {
        Self { store }
    }

    pub fn connected(store: SharedStore) -> Self {
        Self { store: Some(store) }
    }

    pub fn disconnected() -> Self {
        Self { store: None }
    }

    pub fn store_handle(&self) -> Option<&SharedStore> {
        self.store.as_ref()
    }

    /// Like [`Sink::store`] but keeps the failure reason.
    ///
    /// An empty batch is `Ok(0)` and never touches the store.
    pub async fn try_store(&self, batch: &Batch, table: &str) -> EtlResult<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        let store = self.store.as_ref().ok_or(EtlError::StoreUnavailable)?;
        check_table_name(table)?;
        store.append(table, batch.records()).await
    }

    /// Appends the batch to `table`. False when there was nothing to write or the write failed.
    pub async fn store(&self, batch: &Batch, table: &str) -> bool {
        if batch.is_empty() {
            warn!(table, "no records to load");
            return false;
        }
        match self.try_store(batch, table).await {
            Ok(n) => {
                info!(table, rows = n, "loaded {n} records into '{table}'");
                counter!("etl_records_stored_total").increment(n as u64);
                true
            }
            Err(EtlError::StoreUnavailable) => {
                error!(table, "store connection is not available");
                false
            }
            Err(e) => {
                error!(table, error = %e, "load failed");
                false
            }
        }
    }
}
