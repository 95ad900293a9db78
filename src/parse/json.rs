// src/parse/json.rs
use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use std::collections::BTreeMap;

use super::{is_blank, FieldKind, JsonField};
use crate::error::{EtlError, EtlResult};
use crate::record::{Record, Value, COLLECTED_AT};

/// Walks a dot path (`rates.KRW`, `items.0.name`) through objects and arrays.
pub fn lookup<'a>(doc: &'a Json, path: &str) -> Option<&'a Json> {
    if path.is_empty() {
        return Some(doc);
    }
    path.split('.').try_fold(doc, |cur, seg| match cur {
        Json::Object(map) => map.get(seg),
        Json::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

pub fn extract_records(
    payload: &[u8],
    records_path: Option<&str>,
    fields: &[JsonField],
    constants: &BTreeMap<String, String>,
    collected_at: DateTime<Utc>,
) -> EtlResult<Vec<Record>> {
    if is_blank(payload) {
        return Ok(Vec::new());
    }
    let doc: Json = serde_json::from_slice(payload).map_err(|e| EtlError::parse("json", e))?;

    let root = match records_path {
        Some(p) => lookup(&doc, p)
            .ok_or_else(|| EtlError::parse("json", format!("path {p:?} not found")))?,
        None => &doc,
    };

    let items: Vec<&Json> = match root {
        Json::Array(items) => items.iter().collect(),
        Json::Object(_) => vec![root],
        other => {
            return Err(EtlError::parse(
                "json",
                format!("expected object or array, found {}", type_name(other)),
            ))
        }
    };

    Ok(items
        .into_iter()
        .map(|item| {
            let mut rec = Record::new();
            for (k, v) in constants {
                rec.insert(k.clone(), v.clone());
            }
            for f in fields {
                rec.insert(f.name.clone(), field_value(lookup(item, &f.path), f.kind));
            }
            rec.insert(COLLECTED_AT, collected_at);
            rec
        })
        .collect())
}

/// Absent keys default to `0` / `""`; present values of the wrong shape are null.
fn field_value(found: Option<&Json>, kind: FieldKind) -> Value {
    match (found, kind) {
        (None, FieldKind::Number) => Value::Number(0.0),
        (None, FieldKind::Text) => Value::Text(String::new()),
        (Some(Json::Number(n)), FieldKind::Number) => n.as_f64().into(),
        (Some(Json::String(s)), FieldKind::Number) => s.trim().parse::<f64>().ok().into(),
        (Some(Json::String(s)), FieldKind::Text) => Value::Text(s.clone()),
        (Some(Json::Number(n)), FieldKind::Text) => Value::Text(n.to_string()),
        (Some(Json::Bool(b)), FieldKind::Text) => Value::Text(b.to_string()),
        (Some(Json::Bool(b)), FieldKind::Number) => Value::Number(if *b { 1.0 } else { 0.0 }),
        (Some(_), _) => Value::Null,
    }
}

fn type_name(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}
