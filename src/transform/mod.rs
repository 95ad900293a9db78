// src/transform/mod.rs
//! Transformer: dedup, derive computed fields, then validate.

pub mod validate;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};
use tracing::{info, warn};

use crate::error::EtlResult;
use crate::record::{Batch, Record, Value};
pub use validate::{validate, ValidationReport};

fn default_separator() -> String {
    ",".to_string()
}

/// A computed field, written to `target` from the value in `source`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Derivation {
    /// Character count of a text field.
    Length { source: String, target: String },
    /// RFC 2822 or RFC 3339 date string to a UTC timestamp.
    Timestamp { source: String, target: String },
    /// Number of non-empty items in a separated list.
    SplitCount {
        source: String,
        target: String,
        #[serde(default = "default_separator")]
        separator: String,
    },
}

impl Derivation {
    pub fn length(source: impl Into<String>, target: impl Into<String>) -> Self {
        Derivation::Length {
            source: source.into(),
            target: target.into(),
        }
    }

    pub fn timestamp(source: impl Into<String>, target: impl Into<String>) -> Self {
        Derivation::Timestamp {
            source: source.into(),
            target: target.into(),
        }
    }

    fn fields(&self) -> (&str, &str) {
        match self {
            Derivation::Length { source, target }
            | Derivation::Timestamp { source, target }
            | Derivation::SplitCount { source, target, .. } => (source.as_str(), target.as_str()),
        }
    }

    /// Writes `target` only when `source` is present, so an absent column stays absent.
    fn apply(&self, rec: &mut Record) {
        let (source, target) = self.fields();
        let Some(found) = rec.get(source) else {
            return;
        };
        let v: Value = match self {
            Derivation::Length { .. } => found.as_str().map(|s| s.chars().count() as f64).into(),
            Derivation::Timestamp { .. } => Value::from(match found {
                Value::Timestamp(t) => Some(*t),
                Value::Text(s) => parse_timestamp(s),
                _ => None,
            }),
            Derivation::SplitCount { separator, .. } => found
                .as_str()
                .map(|s| {
                    s.split(separator.as_str())
                        .filter(|p| !p.trim().is_empty())
                        .count() as f64
                })
                .into(),
        };
        rec.insert(target.to_string(), v);
    }
}

/// Feed dates are RFC 2822; API timestamps are usually RFC 3339.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc2822) {
        return DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), dt.nanosecond());
    }
    DateTime::parse_from_rfc2822(s)
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Keeps the first record for each distinct value of `key`.
///
/// Records lacking the key share one bucket with nulls.
pub fn dedup_by_key(records: Vec<Record>, key: &str) -> Vec<Record> {
    let mut seen: HashSet<String> = HashSet::new();
    records
        .into_iter()
        .filter(|r| {
            let k = r.get(key).unwrap_or(&Value::Null).dedup_key();
            seen.insert(k)
        })
        .collect()
}

pub fn derive_fields(records: &mut [Record], derivations: &[Derivation]) {
    for rec in records.iter_mut() {
        for d in derivations {
            d.apply(rec);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transformer {
    pub dedup_key: Option<String>,
    pub derivations: Vec<Derivation>,
    pub required: Vec<String>,
}

impl Transformer {
    /// Dedup, derive, validate. A schema failure discards the whole batch.
    pub fn transform(&self, raw: Vec<Record>) -> EtlResult<Batch> {
        if raw.is_empty() {
            warn!("nothing to transform");
            return Ok(Batch::empty());
        }
        let deduped = self.dedup(raw);
        self.finish(deduped)
    }

    /// Step 1 on its own, for callers that report the post-dedup count.
    pub fn dedup(&self, raw: Vec<Record>) -> Vec<Record> {
        let before = raw.len();
        let records = match &self.dedup_key {
            Some(key) => dedup_by_key(raw, key),
            None => raw,
        };
        let after = records.len();
        info!("dedup: {before} -> {after} records");
        counter!("etl_records_deduplicated_total").increment((before - after) as u64);
        records
    }

    /// Derive and validate already-deduplicated records.
    pub fn finish(&self, mut records: Vec<Record>) -> EtlResult<Batch> {
        if records.is_empty() {
            return Ok(Batch::empty());
        }
        derive_fields(&mut records, &self.derivations);

        let batch = Batch::from_records(records);
        let report = validate(batch.records(), &self.required)?;
        info!(records = batch.len(), "transform complete");
        Ok(batch.with_report(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn news(title: &str) -> Record {
        Record::new()
            .with("title", title)
            .with("link", format!("https://example.test/{title}"))
            .with("pub_date", "Mon, 06 Jan 2025 09:00:00 GMT")
    }

    #[test]
    fn dedup_keeps_first_occurrence_in_order() {
        let mut second_a = news("a");
        second_a.insert("link", "dup");
        let out = dedup_by_key(vec![news("a"), news("b"), second_a, news("c")], "title");
        let titles: Vec<_> = out
            .iter()
            .map(|r| r.get("title").and_then(Value::as_str).unwrap())
            .collect();
        assert_eq!(titles, vec!["a", "b", "c"]);
        assert_eq!(
            out[0].get("link").and_then(Value::as_str),
            Some("https://example.test/a")
        );
    }

    #[test]
    fn dedup_is_idempotent() {
        let input = vec![news("a"), news("a"), news("b"), Record::new(), Record::new()];
        let once = dedup_by_key(input, "title");
        let twice = dedup_by_key(once.clone(), "title");
        assert_eq!(once, twice);
        assert_eq!(once.len(), 3);
    }

    #[test]
    fn derives_length_and_timestamp() {
        let mut recs = vec![news("héllo")];
        derive_fields(
            &mut recs,
            &[
                Derivation::length("title", "title_length"),
                Derivation::timestamp("pub_date", "pub_date"),
            ],
        );
        assert_eq!(recs[0].get("title_length").and_then(Value::as_f64), Some(5.0));
        assert_eq!(
            recs[0].get("pub_date").and_then(Value::as_timestamp),
            Some(Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap())
        );
    }

    #[test]
    fn unparseable_dates_become_null() {
        let mut recs = vec![Record::new().with("d", "yesterday-ish")];
        derive_fields(&mut recs, &[Derivation::timestamp("d", "d")]);
        assert!(recs[0].get("d").unwrap().is_null());
    }

    #[test]
    fn absent_source_leaves_target_unset() {
        let mut recs = vec![Record::new().with("title", "x")];
        derive_fields(
            &mut recs,
            &[
                Derivation::timestamp("pub_date", "pub_date"),
                Derivation::length("summary", "summary_length"),
            ],
        );
        assert!(!recs[0].contains("pub_date"));
        assert!(!recs[0].contains("summary_length"));
    }

    #[test]
    fn split_count_ignores_blank_parts() {
        let mut recs = vec![Record::new().with("cast", "A, B,, C ")];
        derive_fields(
            &mut recs,
            &[Derivation::SplitCount {
                source: "cast".into(),
                target: "num_cast".into(),
                separator: ",".into(),
            }],
        );
        assert_eq!(recs[0].get("num_cast").and_then(Value::as_f64), Some(3.0));
    }

    #[test]
    fn parses_offsets_and_rfc3339() {
        let want = Utc.with_ymd_and_hms(2025, 1, 6, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("Mon, 06 Jan 2025 09:00:00 +0900"), Some(want));
        assert_eq!(parse_timestamp("2025-01-06T00:00:00Z"), Some(want));
        assert_eq!(parse_timestamp("nope"), None);
    }

    #[test]
    fn transform_empty_input_is_empty_batch() {
        let t = Transformer::default();
        let b = t.transform(vec![]).unwrap();
        assert!(b.is_empty());
        assert!(b.report().is_none());
    }

    #[test]
    fn transform_schema_failure_propagates() {
        let t = Transformer {
            required: vec!["link".into()],
            ..Default::default()
        };
        let err = t
            .transform(vec![Record::new().with("title", "a")])
            .unwrap_err();
        assert_eq!(err.kind(), "schema");
    }

    #[test]
    fn derived_column_does_not_mask_missing_required_field() {
        let t = Transformer {
            derivations: vec![Derivation::timestamp("pub_date", "pub_date")],
            required: vec!["title".into(), "pub_date".into()],
            ..Default::default()
        };
        let err = t
            .transform(vec![Record::new().with("title", "x")])
            .unwrap_err();
        assert_eq!(err.kind(), "schema");
    }

    #[test]
    fn transform_attaches_null_report_and_continues() {
        let t = Transformer {
            dedup_key: Some("title".into()),
            derivations: vec![Derivation::timestamp("pub_date", "pub_date")],
            required: vec!["title".into(), "pub_date".into()],
        };
        let mut bad = news("b");
        bad.insert("pub_date", "garbage");
        let batch = t.transform(vec![news("a"), bad]).unwrap();
        assert_eq!(batch.len(), 2);
        let report = batch.report().unwrap();
        assert_eq!(report.null_counts.get("pub_date"), Some(&1));
    }
}
