// src/logging.rs
//! Tracing subscriber setup for the CLI.
//!
//! `RUST_LOG` wins over the built-in filter. `LOG_FORMAT=json` switches the
//! console layer to JSON lines; `LOG_FILE` adds a plain-text file layer.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

pub const DEFAULT_FILTER: &str = "feed_etl=info,warn";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "compact" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(anyhow!("invalid LOG_FORMAT {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Used when `RUST_LOG` is unset.
    pub default_filter: String,
    pub log_file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            default_filter: DEFAULT_FILTER.to_string(),
            log_file: None,
        }
    }
}

impl LogConfig {
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("LOG_FORMAT") {
            cfg.format = v.parse()?;
        }
        if let Ok(v) = std::env::var("LOG_FILE") {
            if !v.trim().is_empty() {
                cfg.log_file = Some(PathBuf::from(v));
            }
        }
        Ok(cfg)
    }
}

/// Installs the global subscriber. Keep the returned guard alive so the
/// file writer flushes on exit.
pub fn init_tracing(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.default_filter))
        .context("building log filter")?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    layers.push(match config.format {
        LogFormat::Text => fmt::layer().compact().boxed(),
        LogFormat::Json => fmt::layer().json().boxed(),
    });

    let mut guard = None;
    if let Some(path) = &config.log_file {
        let (dir, name) = split_log_path(path)?;
        let appender = tracing_appender::rolling::never(dir, name);
        let (writer, g) = tracing_appender::non_blocking(appender);
        layers.push(fmt::layer().with_ansi(false).with_writer(writer).boxed());
        guard = Some(g);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| anyhow!("tracing already initialized: {e}"))?;
    Ok(guard)
}

fn split_log_path(path: &Path) -> Result<(PathBuf, PathBuf)> {
    let name = path
        .file_name()
        .ok_or_else(|| anyhow!("LOG_FILE {} has no file name", path.display()))?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, PathBuf::from(name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parses() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn log_path_splits_into_dir_and_name() {
        let (d, n) = split_log_path(Path::new("logs/etl.log")).unwrap();
        assert_eq!(d, PathBuf::from("logs"));
        assert_eq!(n, PathBuf::from("etl.log"));
        let (d, _) = split_log_path(Path::new("etl.log")).unwrap();
        assert_eq!(d, PathBuf::from("."));
        assert!(split_log_path(Path::new("/")).is_err());
    }
}
