// src/record.rs
//! Records and batches flowing between pipeline stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::transform::validate::ValidationReport;

/// Field name stamped on every parsed record.
pub const COLLECTED_AT: &str = "collected_at";

/// Scalar field value. Stored as plain JSON, except timestamps, which are
/// wrapped as `{"$ts": "..."}` so date-like text reads back as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Number(f64),
    Timestamp(#[serde(with = "tagged_ts")] DateTime<Utc>),
    Text(String),
}

mod tagged_ts {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Tagged {
        #[serde(rename = "$ts")]
        ts: DateTime<Utc>,
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        Tagged { ts: *ts }.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        Tagged::deserialize(d).map(|t| t.ts)
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    /// Canonical string form used for equality-based deduplication.
    pub(crate) fn dedup_key(&self) -> String {
        match self {
            Value::Null => "\u{0}null".to_string(),
            Value::Number(n) => format!("n:{n}"),
            Value::Timestamp(t) => format!("t:{}", t.to_rfc3339()),
            Value::Text(s) => format!("s:{s}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Value::Timestamp(t)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One observation: a news item, a weather reading, an exchange-rate snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, handy in tests and presets.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn collected_at(&self) -> Option<DateTime<Utc>> {
        self.get(COLLECTED_AT).and_then(Value::as_timestamp)
    }
}

/// Union of field names across records.
pub fn schema_of(records: &[Record]) -> BTreeSet<String> {
    records
        .iter()
        .flat_map(|r| r.field_names().map(str::to_string))
        .collect()
}

/// One run's processed records. All records carry the same field set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    records: Vec<Record>,
    report: Option<ValidationReport>,
}

impl Batch {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a batch, filling fields missing from individual records with null.
    pub fn from_records(mut records: Vec<Record>) -> Self {
        let schema = schema_of(&records);
        for r in records.iter_mut() {
            for name in &schema {
                if !r.contains(name) {
                    r.insert(name.clone(), Value::Null);
                }
            }
        }
        Self {
            records,
            report: None,
        }
    }

    pub fn with_report(mut self, report: ValidationReport) -> Self {
        self.report = Some(report);
        self
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn report(&self) -> Option<&ValidationReport> {
        self.report.as_ref()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn schema(&self) -> BTreeSet<String> {
        schema_of(&self.records)
    }
}
