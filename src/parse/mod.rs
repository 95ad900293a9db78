// src/parse/mod.rs
//! Parser: raw payload bytes into records, per source format.

pub mod json;
pub mod rss;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::EtlResult;
use crate::record::Record;

pub const DEFAULT_MAX_ITEMS: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PayloadFormat {
    /// RSS 2.0 `<item>` elements: `title`, `link`, `pubDate`.
    Rss {
        #[serde(default)]
        max_items: Option<usize>,
    },
    /// Named keys picked out of a JSON document.
    Json {
        /// Dot path to the array (or object) holding the records. Root when absent.
        #[serde(default)]
        records_path: Option<String>,
        #[serde(default)]
        fields: Vec<JsonField>,
        /// Copied verbatim into every record.
        #[serde(default)]
        constants: BTreeMap<String, String>,
        /// Cap on records taken from an array.
        #[serde(default)]
        max_items: Option<usize>,
    },
}

impl PayloadFormat {
    pub fn label(&self) -> &'static str {
        match self {
            PayloadFormat::Rss { .. } => "rss",
            PayloadFormat::Json { .. } => "json",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonField {
    /// Field name in the produced record.
    pub name: String,
    /// Dot path inside each JSON record, e.g. `rates.KRW`.
    pub path: String,
    #[serde(default)]
    pub kind: FieldKind,
}

impl JsonField {
    pub fn number(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            kind: FieldKind::Number,
        }
    }

    pub fn text(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            kind: FieldKind::Text,
        }
    }
}

/// Decides the default for absent keys: `0` or `""`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    Number,
    Text,
}

/// Parses `payload` according to `format`, stamping each record with `collected_at`.
///
/// Blank payloads yield no records; malformed ones fail with `EtlError::Parse`.
pub fn parse(
    payload: &[u8],
    format: &PayloadFormat,
    collected_at: DateTime<Utc>,
) -> EtlResult<Vec<Record>> {
    let t0 = std::time::Instant::now();
    let out = match format {
        PayloadFormat::Rss { max_items } => rss::parse_items(
            payload,
            max_items.unwrap_or(DEFAULT_MAX_ITEMS),
            collected_at,
        )?,
        PayloadFormat::Json {
            records_path,
            fields,
            constants,
            max_items,
        } => {
            let mut records = json::extract_records(
                payload,
                records_path.as_deref(),
                fields,
                constants,
                collected_at,
            )?;
            if let Some(cap) = max_items {
                records.truncate(*cap);
            }
            records
        }
    };

    histogram!("etl_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    counter!("etl_records_parsed_total").increment(out.len() as u64);
    Ok(out)
}

/// Decode entities, strip tags, normalize curly quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = re_tags.replace_all(&out, "").to_string();

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"));
    re_ws.replace_all(&out, " ").trim().to_string()
}

pub(crate) fn is_blank(payload: &[u8]) -> bool {
    payload.iter().all(u8::is_ascii_whitespace)
}
