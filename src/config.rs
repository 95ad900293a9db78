// src/config.rs
//! Environment-style configuration: store connection, fetch budget, schedule.

use anyhow::{anyhow, Context, Result};
use reqwest::Url;
use std::str::FromStr;
use std::time::Duration;

use crate::extract::{RetryPolicy, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY, DEFAULT_TIMEOUT};
use crate::parse::DEFAULT_MAX_ITEMS;

/// Path to a sources TOML file; read by [`crate::sources::load_sources_default`].
pub const ENV_SOURCES_PATH: &str = "ETL_SOURCES_PATH";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoreConfig {
    /// Full connection URL; wins over the individual parts.
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
    pub max_connections: u32,
}

impl StoreConfig {
    /// `None` when neither a URL nor host/user/name are configured.
    pub fn database_url(&self) -> Option<String> {
        if let Some(url) = self.url.as_deref().filter(|u| !u.trim().is_empty()) {
            return Some(url.to_string());
        }
        let host = self.host.as_deref()?;
        let user = self.user.as_deref()?;
        let name = self.name.as_deref()?;
        let mut url = Url::parse(&format!("postgres://{host}:{}/{name}", self.port)).ok()?;
        // credentials are percent-encoded by the setters
        url.set_username(user).ok()?;
        if let Some(pw) = self.password.as_deref().filter(|pw| !pw.is_empty()) {
            url.set_password(Some(pw)).ok()?;
        }
        Some(url.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
    pub max_items: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            timeout: DEFAULT_TIMEOUT,
            max_items: DEFAULT_MAX_ITEMS,
        }
    }
}

impl FetchConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            delay: self.retry_delay,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtlConfig {
    pub store: StoreConfig,
    pub fetch: FetchConfig,
    /// Aggregation read limit; unset means wait indefinitely.
    pub query_timeout: Option<Duration>,
    /// Local wall-clock hours for `schedule` mode.
    pub schedule_hours: Vec<u32>,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                port: 5432,
                max_connections: 5,
                ..Default::default()
            },
            fetch: FetchConfig::default(),
            query_timeout: None,
            schedule_hours: vec![9, 18],
        }
    }
}

impl EtlConfig {
    /// Reads the process environment (call `dotenvy::dotenv()` first if wanted).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Same as [`EtlConfig::from_env`] over an arbitrary key lookup.
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut cfg = Self::default();

        cfg.store.url = get("DATABASE_URL");
        cfg.store.host = get("DB_HOST");
        cfg.store.user = get("DB_USER");
        cfg.store.password = get("DB_PASSWORD");
        cfg.store.name = get("DB_NAME");
        if let Some(v) = get("DB_PORT") {
            cfg.store.port = parse_var("DB_PORT", &v)?;
        }
        if let Some(v) = get("DB_MAX_CONNECTIONS") {
            cfg.store.max_connections = parse_var("DB_MAX_CONNECTIONS", &v)?;
        }

        if let Some(v) = get("ETL_MAX_RETRIES") {
            cfg.fetch.max_retries = parse_var("ETL_MAX_RETRIES", &v)?;
            if cfg.fetch.max_retries == 0 {
                return Err(anyhow!("ETL_MAX_RETRIES must be at least 1"));
            }
        }
        if let Some(v) = get("ETL_RETRY_DELAY_SECS") {
            cfg.fetch.retry_delay = Duration::from_secs(parse_var("ETL_RETRY_DELAY_SECS", &v)?);
        }
        if let Some(v) = get("ETL_TIMEOUT_SECS") {
            cfg.fetch.timeout = Duration::from_secs(parse_var("ETL_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("ETL_MAX_ITEMS") {
            cfg.fetch.max_items = parse_var("ETL_MAX_ITEMS", &v)?;
        }
        if let Some(v) = get("ETL_QUERY_TIMEOUT_SECS") {
            cfg.query_timeout = Some(Duration::from_secs(parse_var(
                "ETL_QUERY_TIMEOUT_SECS",
                &v,
            )?));
        }
        if let Some(v) = get("ETL_SCHEDULE_HOURS") {
            cfg.schedule_hours = parse_hours(&v)?;
        }
        Ok(cfg)
    }
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>()
        .with_context(|| format!("invalid value {raw:?} for {name}"))
}

/// `"9,18"` -> `[9, 18]`, sorted and deduplicated.
pub fn parse_hours(raw: &str) -> Result<Vec<u32>> {
    let mut hours = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let h: u32 = parse_var("ETL_SCHEDULE_HOURS", part)?;
        if h > 23 {
            return Err(anyhow!("schedule hour {h} out of range 0-23"));
        }
        hours.push(h);
    }
    hours.sort_unstable();
    hours.dedup();
    if hours.is_empty() {
        return Err(anyhow!("ETL_SCHEDULE_HOURS lists no hours"));
    }
    Ok(hours)
}
