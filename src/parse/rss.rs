// src/parse/rss.rs
use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;

use super::{is_blank, normalize_text};
use crate::error::{EtlError, EtlResult};
use crate::record::{Record, Value, COLLECTED_AT};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
}

/// Maps the first `max_items` feed items to `title`/`link`/`pub_date` records.
pub fn parse_items(
    payload: &[u8],
    max_items: usize,
    collected_at: DateTime<Utc>,
) -> EtlResult<Vec<Record>> {
    if is_blank(payload) {
        return Ok(Vec::new());
    }
    let text = std::str::from_utf8(payload).map_err(|e| EtlError::parse("rss", e))?;
    let xml_clean = scrub_html_entities_for_xml(text);
    let rss: Rss = from_str(&xml_clean).map_err(|e| EtlError::parse("rss", e))?;

    let out = rss
        .channel
        .item
        .into_iter()
        .take(max_items)
        .map(|it| {
            let title = it
                .title
                .as_deref()
                .map(normalize_text)
                .filter(|t| !t.is_empty());
            Record::new()
                .with("title", title)
                .with("link", it.link.map(|l| l.trim().to_string()))
                .with("pub_date", it.pub_date.map(|d| d.trim().to_string()))
                .with(COLLECTED_AT, Value::Timestamp(collected_at))
        })
        .collect();
    Ok(out)
}

/// Feeds often carry HTML entities that are not defined in XML.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}
