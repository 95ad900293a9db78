// src/aggregate.rs
//! # Aggregator
//! Reads stored rows back and summarizes numeric fields per time bucket.
//!
//! Buckets are derived from each row's stored `collected_at` (UTC). Values that
//! are null or not numeric are skipped per field, so a group may report fewer
//! samples for one field than it has rows.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use crate::error::{EtlError, EtlResult};
use crate::load::{SharedStore, StoredRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Daily,
    Weekly,
    Monthly,
}

impl Period {
    /// First day of the bucket containing `ts`. Weeks start on Monday.
    pub fn bucket_start(self, ts: DateTime<Utc>) -> NaiveDate {
        let d = ts.date_naive();
        match self {
            Period::Daily => d,
            Period::Weekly => d - Duration::days(i64::from(d.weekday().num_days_from_monday())),
            Period::Monthly => d.with_day(1).unwrap_or(d),
        }
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" | "day" | "d" => Ok(Period::Daily),
            "weekly" | "week" | "w" => Ok(Period::Weekly),
            "monthly" | "month" | "m" => Ok(Period::Monthly),
            other => Err(format!("unknown period {other:?} (daily|weekly|monthly)")),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Daily => write!(f, "daily"),
            Period::Weekly => write!(f, "weekly"),
            Period::Monthly => write!(f, "monthly"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FieldStats {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl FieldStats {
    fn single(v: f64) -> Self {
        Self {
            count: 1,
            mean: v,
            min: v,
            max: v,
        }
    }

    fn push(&mut self, v: f64) {
        // running mean keeps large sums from losing precision
        self.count += 1;
        self.mean += (v - self.mean) / self.count as f64;
        self.min = self.min.min(v);
        self.max = self.max.max(v);
    }
}

/// Statistics for one time bucket of one table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub table: String,
    pub period: Period,
    pub bucket_start: NaiveDate,
    pub rows: usize,
    pub fields: BTreeMap<String, FieldStats>,
}

/// Groups rows (assumed time-ordered) into buckets and folds numeric fields.
pub fn summarize(
    table: &str,
    rows: &[StoredRow],
    period: Period,
    numeric_fields: &[String],
) -> Vec<GroupSummary> {
    let mut groups: BTreeMap<NaiveDate, GroupSummary> = BTreeMap::new();
    for row in rows {
        let start = period.bucket_start(row.collected_at);
        let g = groups.entry(start).or_insert_with(|| GroupSummary {
            table: table.to_string(),
            period,
            bucket_start: start,
            rows: 0,
            fields: BTreeMap::new(),
        });
        g.rows += 1;
        for field in numeric_fields {
            let Some(v) = row.record.get(field).and_then(|v| v.as_f64()) else {
                continue;
            };
            if !v.is_finite() {
                continue;
            }
            g.fields
                .entry(field.clone())
                .and_modify(|s| s.push(v))
                .or_insert_with(|| FieldStats::single(v));
        }
    }
    groups.into_values().collect()
}

pub struct Aggregator {
    store: SharedStore,
    numeric_fields: Vec<String>,
    read_timeout: Option<std::time::Duration>,
}

impl Aggregator {
    pub fn new(store: SharedStore, numeric_fields: Vec<String>) -> Self {
        Self {
            store,
            numeric_fields,
            read_timeout: None,
        }
    }

    pub fn with_read_timeout(mut self, timeout: Option<std::time::Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    async fn read(&self, table: &str) -> EtlResult<Vec<StoredRow>> {
        match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, self.store.read_ordered(table))
                .await
                .map_err(|_| EtlError::QueryTimeout {
                    table: table.to_string(),
                    secs: limit.as_secs(),
                })?,
            None => self.store.read_ordered(table).await,
        }
    }

    /// Summaries for one table; an empty or missing table yields none.
    pub async fn aggregate(&self, table: &str, period: Period) -> EtlResult<Vec<GroupSummary>> {
        let rows = self.read(table).await?;
        let out = summarize(table, &rows, period, &self.numeric_fields);
        info!(
            table,
            %period,
            rows = rows.len(),
            groups = out.len(),
            "aggregated {} rows into {} groups",
            rows.len(),
            out.len()
        );
        Ok(out)
    }

    /// Per-table summaries; `NoData` when every table came back empty.
    pub async fn aggregate_all(
        &self,
        tables: &[String],
        period: Period,
    ) -> EtlResult<Vec<(String, Vec<GroupSummary>)>> {
        let mut out = Vec::with_capacity(tables.len());
        for t in tables {
            out.push((t.clone(), self.aggregate(t, period).await?));
        }
        if out.iter().all(|(_, groups)| groups.is_empty()) {
            warn!(tables = ?tables, "no data to aggregate");
            return Err(EtlError::NoData);
        }
        Ok(out)
    }

    /// Row count per table; `None` for tables that were never written.
    pub async fn row_counts(&self, tables: &[String]) -> Vec<(String, Option<usize>)> {
        let mut out = Vec::with_capacity(tables.len());
        for t in tables {
            let n = match self.store.count(t).await {
                Ok(n) => n,
                Err(e) => {
                    warn!(table = %t, error = %e, "row count failed");
                    None
                }
            };
            match n {
                Some(n) => info!("  - {t}: {n} records"),
                None => info!("  - {t}: no table"),
            }
            out.push((t.clone(), n));
        }
        out
    }
}
