// src/metrics.rs
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("etl_fetch_attempts_total", "HTTP attempts made by the fetcher.");
        describe_counter!(
            "etl_fetch_failures_total",
            "Fetches that exhausted their retry budget."
        );
        describe_counter!("etl_records_parsed_total", "Records produced by the parser.");
        describe_counter!(
            "etl_records_deduplicated_total",
            "Records dropped as duplicates."
        );
        describe_counter!("etl_records_stored_total", "Records appended to the store.");
        describe_counter!("etl_runs_total", "Pipeline runs by outcome.");
        describe_histogram!("etl_parse_ms", "Payload parse time in milliseconds.");
        describe_histogram!("etl_run_duration_ms", "Pipeline run time in milliseconds.");
        describe_gauge!("etl_last_run_ts", "Unix ts when a pipeline last finished.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the process-wide Prometheus recorder. Fails if one is already installed.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }

    /// Serve `/metrics` on `addr` until the task is dropped.
    pub async fn serve(self, addr: &str) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding metrics listener on {addr}"))?;
        tracing::info!(%addr, "metrics endpoint listening");
        axum::serve(listener, self.router())
            .await
            .context("metrics server")
    }
}
