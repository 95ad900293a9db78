// src/transform/validate.rs
//! Batch quality checks: schema presence is fatal, nulls are only reported.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::error::{EtlError, EtlResult};
use crate::record::{schema_of, Record};

/// Per-field null counts for required fields. Empty when the batch is clean.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub records: usize,
    pub null_counts: BTreeMap<String, usize>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.null_counts.is_empty()
    }

    pub fn total_nulls(&self) -> usize {
        self.null_counts.values().sum()
    }
}

/// Fails with `Schema` when a required field appears in no record at all.
///
/// An empty batch has nothing to check and yields a clean report.
pub fn validate(records: &[Record], required: &[String]) -> EtlResult<ValidationReport> {
    if records.is_empty() {
        return Ok(ValidationReport::default());
    }

    let schema = schema_of(records);
    let missing: Vec<String> = required
        .iter()
        .filter(|f| !schema.contains(f.as_str()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        warn!(missing = ?missing, "required fields missing");
        return Err(EtlError::Schema { missing });
    }

    let mut null_counts = BTreeMap::new();
    for field in required {
        let nulls = records
            .iter()
            .filter(|r| r.get(field).map_or(true, |v| v.is_null()))
            .count();
        if nulls > 0 {
            null_counts.insert(field.clone(), nulls);
        }
    }

    let report = ValidationReport {
        records: records.len(),
        null_counts,
    };
    if report.is_clean() {
        info!(records = report.records, "validation passed");
    } else {
        warn!(
            records = report.records,
            nulls = ?report.null_counts,
            "validation found null values"
        );
    }
    Ok(report)
}
