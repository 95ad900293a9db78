// src/sources.rs
//! Source catalog: where to fetch, how to parse, where to store.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{FetchConfig, ENV_SOURCES_PATH};
use crate::extract::SourceDescriptor;
use crate::load::check_table_name;
use crate::parse::{JsonField, PayloadFormat};
use crate::transform::{Derivation, Transformer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    /// Destination table.
    pub table: String,
    pub format: PayloadFormat,
    #[serde(default)]
    pub dedup_key: Option<String>,
    #[serde(default)]
    pub derive: Vec<Derivation>,
    #[serde(default)]
    pub required: Vec<String>,
    /// Per-attempt timeout override.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl SourceSpec {
    pub fn descriptor(&self, fetch: &FetchConfig) -> SourceDescriptor {
        let timeout = self
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(fetch.timeout);
        let mut d = SourceDescriptor::new(&self.name, &self.url).with_timeout(timeout);
        for (k, v) in &self.query {
            d = d.with_query(k, v);
        }
        d
    }

    /// The format with the configured item cap filled in where the source leaves it open.
    pub fn effective_format(&self, fetch: &FetchConfig) -> PayloadFormat {
        match &self.format {
            PayloadFormat::Rss { max_items: None } => PayloadFormat::Rss {
                max_items: Some(fetch.max_items),
            },
            PayloadFormat::Json {
                records_path,
                fields,
                constants,
                max_items: None,
            } => PayloadFormat::Json {
                records_path: records_path.clone(),
                fields: fields.clone(),
                constants: constants.clone(),
                max_items: Some(fetch.max_items),
            },
            other => other.clone(),
        }
    }

    pub fn transformer(&self) -> Transformer {
        Transformer {
            dedup_key: self.dedup_key.clone(),
            derivations: self.derive.clone(),
            required: self.required.clone(),
        }
    }
}

/// Korean Google News top stories into `daily_news`.
pub fn google_news() -> SourceSpec {
    SourceSpec {
        name: "google_news".into(),
        url: "https://news.google.com/rss".into(),
        query: BTreeMap::from([
            ("hl".into(), "ko".into()),
            ("gl".into(), "KR".into()),
            ("ceid".into(), "KR:ko".into()),
        ]),
        table: "daily_news".into(),
        format: PayloadFormat::Rss { max_items: None },
        dedup_key: Some("title".into()),
        derive: vec![
            Derivation::length("title", "title_length"),
            Derivation::timestamp("pub_date", "pub_date"),
        ],
        required: vec!["title".into(), "link".into(), "pub_date".into()],
        timeout_secs: None,
    }
}

/// Current weather for Seoul into `weather_data`.
pub fn open_meteo_seoul() -> SourceSpec {
    SourceSpec {
        name: "open_meteo_seoul".into(),
        url: "https://api.open-meteo.com/v1/forecast".into(),
        query: BTreeMap::from([
            ("latitude".into(), "37.5665".into()),
            ("longitude".into(), "126.9780".into()),
            ("current_weather".into(), "true".into()),
        ]),
        table: "weather_data".into(),
        format: PayloadFormat::Json {
            records_path: Some("current_weather".into()),
            fields: vec![
                JsonField::number("temperature", "temperature"),
                JsonField::number("windspeed", "windspeed"),
                JsonField::number("weathercode", "weathercode"),
            ],
            constants: BTreeMap::from([("city".into(), "Seoul".into())]),
            max_items: None,
        },
        dedup_key: None,
        derive: Vec::new(),
        required: vec!["temperature".into()],
        timeout_secs: None,
    }
}

/// USD reference rates into `exchange_rate`.
pub fn exchange_rate_usd() -> SourceSpec {
    SourceSpec {
        name: "exchange_rate_usd".into(),
        url: "https://api.exchangerate-api.com/v4/latest/USD".into(),
        query: BTreeMap::new(),
        table: "exchange_rate".into(),
        format: PayloadFormat::Json {
            records_path: None,
            fields: vec![
                JsonField::number("krw_rate", "rates.KRW"),
                JsonField::number("eur_rate", "rates.EUR"),
                JsonField::number("jpy_rate", "rates.JPY"),
            ],
            constants: BTreeMap::from([("base_currency".into(), "USD".into())]),
            max_items: None,
        },
        dedup_key: None,
        derive: Vec::new(),
        required: vec!["krw_rate".into()],
        timeout_secs: None,
    }
}

pub fn builtin_sources() -> Vec<SourceSpec> {
    vec![google_news(), open_meteo_seoul(), exchange_rate_usd()]
}

/// Load a `[[sources]]` TOML file.
pub fn load_sources_from(path: &Path) -> Result<Vec<SourceSpec>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading sources from {}", path.display()))?;
    parse_sources(&content).with_context(|| format!("parsing {}", path.display()))
}

/// Load sources using env var + fallbacks:
/// 1) $ETL_SOURCES_PATH
/// 2) config/sources.toml
/// 3) built-in presets
pub fn load_sources_default() -> Result<Vec<SourceSpec>> {
    if let Ok(p) = std::env::var(ENV_SOURCES_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_sources_from(&pb);
        }
        return Err(anyhow!("{ENV_SOURCES_PATH} points to non-existent path"));
    }
    let toml_p = PathBuf::from("config/sources.toml");
    if toml_p.exists() {
        return load_sources_from(&toml_p);
    }
    Ok(builtin_sources())
}

fn parse_sources(s: &str) -> Result<Vec<SourceSpec>> {
    #[derive(Deserialize)]
    struct SourcesFile {
        #[serde(default)]
        sources: Vec<SourceSpec>,
    }
    let file: SourcesFile = toml::from_str(s)?;
    check_sources(&file.sources)?;
    Ok(file.sources)
}

fn check_sources(sources: &[SourceSpec]) -> Result<()> {
    let mut seen = HashSet::new();
    for s in sources {
        if !seen.insert(s.name.as_str()) {
            return Err(anyhow!("duplicate source name {:?}", s.name));
        }
        check_table_name(&s.table)
            .map_err(|e| anyhow!("source {:?}: {e}", s.name))?;
    }
    Ok(())
}

/// Picks sources by name, in the order asked for. Empty `names` selects all.
pub fn select<'a>(sources: &'a [SourceSpec], names: &[String]) -> Result<Vec<&'a SourceSpec>> {
    if names.is_empty() {
        return Ok(sources.iter().collect());
    }
    names
        .iter()
        .map(|n| {
            sources
                .iter()
                .find(|s| &s.name == n)
                .ok_or_else(|| anyhow!("unknown source {n:?}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    const SAMPLE: &str = r#"
[[sources]]
name = "feed"
url = "https://example.test/rss"
table = "daily_news"
dedup_key = "title"
required = ["title", "link", "pub_date"]
format = { kind = "rss", max_items = 5 }
query = { hl = "en" }
derive = [
  { kind = "length", source = "title", target = "title_length" },
  { kind = "split_count", source = "cast", target = "num_cast" },
]

[[sources]]
name = "rates"
url = "https://example.test/latest"
table = "exchange_rate"
timeout_secs = 3

[sources.format]
kind = "json"
constants = { base_currency = "USD" }
fields = [{ name = "krw_rate", path = "rates.KRW" }]
"#;

    #[test]
    fn parses_toml_catalog() {
        let v = parse_sources(SAMPLE).unwrap();
        assert_eq!(v.len(), 2);
        assert_eq!(v[0].format, PayloadFormat::Rss { max_items: Some(5) });
        assert_eq!(v[0].derive.len(), 2);
        assert!(matches!(
            &v[0].derive[1],
            Derivation::SplitCount { separator, .. } if separator == ","
        ));

        let fetch = FetchConfig::default();
        let d = v[1].descriptor(&fetch);
        assert_eq!(d.timeout, Duration::from_secs(3));
        assert_eq!(
            v[0].descriptor(&fetch).query,
            vec![("hl".to_string(), "en".to_string())]
        );
    }

    #[test]
    fn rejects_duplicates_and_bad_tables() {
        let dup = format!("{SAMPLE}\n[[sources]]\nname = \"feed\"\nurl = \"u\"\ntable = \"t\"\nformat = {{ kind = \"rss\" }}\n");
        assert!(parse_sources(&dup).is_err());
        let bad = "[[sources]]\nname = \"x\"\nurl = \"u\"\ntable = \"bad-name\"\nformat = { kind = \"rss\" }\n";
        assert!(parse_sources(bad).is_err());
    }

    #[test]
    fn item_cap_comes_from_config_when_unset() {
        let fetch = FetchConfig {
            max_items: 7,
            ..FetchConfig::default()
        };
        assert_eq!(
            google_news().effective_format(&fetch),
            PayloadFormat::Rss { max_items: Some(7) }
        );
        match exchange_rate_usd().effective_format(&fetch) {
            PayloadFormat::Json { max_items, .. } => assert_eq!(max_items, Some(7)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn presets_target_expected_tables() {
        let tables: Vec<_> = builtin_sources().into_iter().map(|s| s.table).collect();
        assert_eq!(tables, vec!["daily_news", "weather_data", "exchange_rate"]);
        assert!(check_sources(&builtin_sources()).is_ok());
    }

    #[test]
    fn select_by_name_keeps_requested_order() {
        let all = builtin_sources();
        let picked = select(&all, &["exchange_rate_usd".into(), "google_news".into()]).unwrap();
        assert_eq!(picked[0].name, "exchange_rate_usd");
        assert_eq!(select(&all, &[]).unwrap().len(), 3);
        assert!(select(&all, &["nope".into()]).is_err());
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_SOURCES_PATH);

        // no files: presets
        assert_eq!(load_sources_default().unwrap().len(), 3);

        let p = tmp.path().join("custom.toml");
        fs::write(&p, SAMPLE).unwrap();
        env::set_var(ENV_SOURCES_PATH, p.display().to_string());
        assert_eq!(load_sources_default().unwrap()[0].name, "feed");

        env::set_var(ENV_SOURCES_PATH, tmp.path().join("missing.toml").display().to_string());
        assert!(load_sources_default().is_err());
        env::remove_var(ENV_SOURCES_PATH);

        env::set_current_dir(&old).unwrap();
    }
}
