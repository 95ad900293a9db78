// src/load/sql.rs
//! Relational backend over `sqlx::AnyPool` (PostgreSQL or SQLite, chosen by URL).

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::{AnyPool, Row};
use std::time::Duration;
use tracing::{info, warn};

use super::{check_table_name, row_timestamp, StoredRow, TableStore};
use crate::error::{EtlError, EtlResult};
use crate::record::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    fn from_url(url: &str) -> Self {
        if url.starts_with("sqlite:") {
            Dialect::Sqlite
        } else {
            Dialect::Postgres
        }
    }

    fn table_exists_sql(self) -> &'static str {
        match self {
            // SQLite table names match case-insensitively even when quoted
            Dialect::Sqlite => {
                "SELECT COUNT(*) AS n FROM sqlite_master \
                 WHERE type = 'table' AND name = $1 COLLATE NOCASE"
            }
            Dialect::Postgres => {
                "SELECT COUNT(*) AS n FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = $1"
            }
        }
    }
}

/// Quoted so PostgreSQL keeps the name's case. `check_table_name` rules out quotes.
fn quoted(table: &str) -> String {
    format!("\"{table}\"")
}

/// One pool per process, shared by Sink and Aggregator.
pub struct SqlStore {
    pool: AnyPool,
    dialect: Dialect,
}

impl SqlStore {
    pub async fn connect(url: &str, max_connections: u32) -> EtlResult<Self> {
        install_default_drivers();
        let dialect = Dialect::from_url(url);
        // every in-memory SQLite connection is its own database
        let max = if url.contains(":memory:") {
            1
        } else {
            max_connections.max(1)
        };
        let pool = AnyPoolOptions::new()
            .max_connections(max)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await
            .map_err(|e| {
                warn!(error = %e, "store connection failed");
                EtlError::StoreUnavailable
            })?;
        info!(?dialect, "store connected");
        Ok(Self { pool, dialect })
    }

    async fn table_exists(&self, table: &str) -> EtlResult<bool> {
        let row = sqlx::query(self.dialect.table_exists_sql())
            .bind(table.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| read_err(table, e))?;
        let n: i64 = row.try_get("n").map_err(|e| read_err(table, e))?;
        Ok(n > 0)
    }
}

fn stamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn write_err(table: &str, e: impl ToString) -> EtlError {
    EtlError::StoreWrite {
        table: table.to_string(),
        reason: e.to_string(),
    }
}

fn read_err(table: &str, e: impl ToString) -> EtlError {
    EtlError::StoreRead {
        table: table.to_string(),
        reason: e.to_string(),
    }
}

#[async_trait]
impl TableStore for SqlStore {
    async fn append(&self, table: &str, rows: &[Record]) -> EtlResult<usize> {
        check_table_name(table)?;
        let now = Utc::now();

        let ident = quoted(table);

        let mut tx = self.pool.begin().await.map_err(|e| write_err(table, e))?;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {ident} (collected_at TEXT NOT NULL, record TEXT NOT NULL)"
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| write_err(table, e))?;

        let insert = format!("INSERT INTO {ident} (collected_at, record) VALUES ($1, $2)");
        for rec in rows {
            let payload = serde_json::to_string(rec).map_err(|e| write_err(table, e))?;
            sqlx::query(&insert)
                .bind(stamp(row_timestamp(rec, now)))
                .bind(payload)
                .execute(&mut *tx)
                .await
                .map_err(|e| write_err(table, e))?;
        }
        tx.commit().await.map_err(|e| write_err(table, e))?;
        Ok(rows.len())
    }

    async fn read_ordered(&self, table: &str) -> EtlResult<Vec<StoredRow>> {
        check_table_name(table)?;
        if !self.table_exists(table).await? {
            return Ok(Vec::new());
        }
        // fixed-width UTC text, so lexical order is time order
        let rows = sqlx::query(&format!(
            "SELECT collected_at, record FROM {} ORDER BY collected_at",
            quoted(table)
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| read_err(table, e))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let ts: String = row.try_get("collected_at").map_err(|e| read_err(table, e))?;
            let payload: String = row.try_get("record").map_err(|e| read_err(table, e))?;
            let collected_at = DateTime::parse_from_rfc3339(&ts)
                .map_err(|e| read_err(table, e))?
                .with_timezone(&Utc);
            let record: Record =
                serde_json::from_str(&payload).map_err(|e| read_err(table, e))?;
            out.push(StoredRow {
                collected_at,
                record,
            });
        }
        Ok(out)
    }

    async fn count(&self, table: &str) -> EtlResult<Option<usize>> {
        check_table_name(table)?;
        if !self.table_exists(table).await? {
            return Ok(None);
        }
        let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {}", quoted(table)))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| read_err(table, e))?;
        let n: i64 = row.try_get("n").map_err(|e| read_err(table, e))?;
        Ok(Some(n.max(0) as usize))
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("store connection closed");
    }
}
