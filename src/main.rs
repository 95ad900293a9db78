//! feed-etl: Binary Entrypoint
//! Runs the configured pipelines once, on a daily schedule, or summarizes stored tables.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use feed_etl::aggregate::{Aggregator, Period};
use feed_etl::config::EtlConfig;
use feed_etl::error::EtlError;
use feed_etl::extract::HttpTransport;
use feed_etl::load::{MemoryStore, SharedStore, Sink, SqlStore};
use feed_etl::logging::{init_tracing, LogConfig};
use feed_etl::metrics::Metrics;
use feed_etl::pipeline::{build_pipelines, run_all, Pipeline, RunResult, SharedTransport};
use feed_etl::scheduler;
use feed_etl::sources::{load_sources_default, select};

#[derive(Parser, Debug)]
#[command(name = "feed-etl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch, transform and load each source once.
    Run {
        /// Source name to run; repeat for several. All sources when omitted.
        #[arg(long = "source", value_name = "NAME")]
        sources: Vec<String>,

        /// Load into an in-memory store instead of the database.
        #[arg(long)]
        dry_run: bool,
    },
    /// Run every source at the configured local hours until interrupted.
    Schedule,
    /// Summarize numeric fields of stored tables per period.
    Summary {
        #[arg(long = "table", value_name = "TABLE", required = true)]
        tables: Vec<String>,

        #[arg(long, default_value = "daily")]
        period: Period,

        /// Numeric field to summarize; repeat for several.
        #[arg(long = "field", value_name = "FIELD")]
        fields: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let log_cfg = LogConfig::from_env()?;
    let _log_guard = init_tracing(&log_cfg)?;
    let cfg = EtlConfig::from_env().context("loading configuration")?;

    match cli.command {
        Command::Run { sources, dry_run } => run_once(&cfg, &sources, dry_run).await,
        Command::Schedule => run_scheduled(&cfg).await,
        Command::Summary {
            tables,
            period,
            fields,
        } => summarize(&cfg, &tables, period, fields).await,
    }
}

/// The one store handle for this process; `None` leaves every load a soft failure.
async fn open_store(cfg: &EtlConfig, dry_run: bool) -> Option<SharedStore> {
    if dry_run {
        info!("dry run: loading into memory");
        let store: SharedStore = Arc::new(MemoryStore::new());
        return Some(store);
    }
    let Some(url) = cfg.store.database_url() else {
        warn!("no database configured (DATABASE_URL or DB_HOST/DB_USER/DB_NAME)");
        return None;
    };
    match SqlStore::connect(&url, cfg.store.max_connections).await {
        Ok(s) => {
            let store: SharedStore = Arc::new(s);
            Some(store)
        }
        Err(e) => {
            error!(error = %e, "database connection failed");
            None
        }
    }
}

fn pipelines_for(cfg: &EtlConfig, names: &[String], sink: &Sink) -> Result<Vec<Pipeline>> {
    let all = load_sources_default()?;
    let picked = select(&all, names)?;
    let transport: SharedTransport =
        Arc::new(HttpTransport::new().context("building HTTP client")?);
    Ok(build_pipelines(picked, &cfg.fetch, transport, sink))
}

fn tables_of(pipelines: &[Pipeline]) -> Vec<String> {
    let mut tables: Vec<String> = Vec::new();
    for p in pipelines {
        if !tables.iter().any(|t| t == p.table()) {
            tables.push(p.table().to_string());
        }
    }
    tables
}

async fn log_row_counts(store: Option<&SharedStore>, tables: &[String]) {
    if let Some(store) = store {
        info!("collected data:");
        Aggregator::new(store.clone(), Vec::new())
            .row_counts(tables)
            .await;
    }
}

fn exit_for(results: &[RunResult]) -> ExitCode {
    if results.iter().all(|r| r.success) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run_once(cfg: &EtlConfig, names: &[String], dry_run: bool) -> Result<ExitCode> {
    let store = open_store(cfg, dry_run).await;
    let sink = Sink::new(store.clone());
    let pipelines = pipelines_for(cfg, names, &sink)?;

    let results = run_all(&pipelines).await;
    log_row_counts(store.as_ref(), &tables_of(&pipelines)).await;

    if let Some(store) = &store {
        store.close().await;
    }
    Ok(exit_for(&results))
}

async fn run_scheduled(cfg: &EtlConfig) -> Result<ExitCode> {
    if let Ok(addr) = std::env::var("METRICS_ADDR") {
        let metrics = Metrics::init()?;
        tokio::spawn(async move {
            if let Err(e) = metrics.serve(&addr).await {
                error!(error = %e, "metrics endpoint stopped");
            }
        });
    }

    let store = open_store(cfg, false).await;
    let sink = Sink::new(store.clone());
    let pipelines = pipelines_for(cfg, &[], &sink)?;
    let tables = tables_of(&pipelines);
    info!(hours = ?cfg.schedule_hours, "scheduler started with {} pipelines", pipelines.len());

    let (pipelines, tables, store_ref) = (&pipelines, &tables, store.as_ref());
    tokio::select! {
        res = scheduler::run_at_hours(&cfg.schedule_hours, move || async move {
            run_all(pipelines).await;
            log_row_counts(store_ref, tables).await;
        }) => res?,
        _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
    }

    if let Some(store) = &store {
        store.close().await;
    }
    Ok(ExitCode::SUCCESS)
}

async fn summarize(
    cfg: &EtlConfig,
    tables: &[String],
    period: Period,
    fields: Vec<String>,
) -> Result<ExitCode> {
    let Some(store) = open_store(cfg, false).await else {
        error!("summary needs a database connection");
        return Ok(ExitCode::FAILURE);
    };
    let aggregator = Aggregator::new(store.clone(), fields).with_read_timeout(cfg.query_timeout);
    let outcome = aggregator.aggregate_all(tables, period).await;
    store.close().await;

    match outcome {
        Ok(per_table) => {
            for (table, groups) in per_table {
                info!(table = %table, "{} {period} groups", groups.len());
                println!("{}", serde_json::to_string_pretty(&groups)?);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(EtlError::NoData) => {
            warn!("nothing stored yet in {}", tables.join(", "));
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}
