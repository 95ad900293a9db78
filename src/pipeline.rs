// src/pipeline.rs
//! # Orchestrator
//! One run moves through `Idle -> Fetching -> Parsing -> Transforming -> Loading`
//! and ends in `Succeeded` or `Failed`. Stage errors never escape `run()`; they
//! are folded into the returned [`RunResult`].

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::FetchConfig;
use crate::error::EtlError;
use crate::extract::{Fetcher, SourceDescriptor, Transport};
use crate::load::Sink;
use crate::metrics::ensure_metrics_described;
use crate::parse::{self, PayloadFormat};
use crate::sources::SourceSpec;
use crate::transform::{Transformer, ValidationReport};

pub type SharedTransport = Arc<dyn Transport>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Fetching,
    Parsing,
    Transforming,
    Loading,
    Succeeded,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::Fetching => "fetching",
            RunState::Parsing => "parsing",
            RunState::Transforming => "transforming",
            RunState::Loading => "loading",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    /// Records parsed from the payload; 0 when the fetch failed.
    pub fetched: usize,
    pub after_dedup: usize,
    pub after_validation: usize,
    pub stored: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunFailure {
    /// Stable error label, e.g. `fetch_exhausted` or `schema`.
    pub kind: &'static str,
    pub message: String,
    /// Stage that was active when the run failed.
    pub stage: RunState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub source: String,
    pub table: String,
    pub success: bool,
    /// Terminal state: `Succeeded` or `Failed`.
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub counts: RunCounts,
    /// Null counts when the batch validated with gaps.
    pub warnings: Option<ValidationReport>,
    pub error: Option<RunFailure>,
}

/// Bookkeeping for a run in flight.
struct RunTracker<'a> {
    source: &'a str,
    table: &'a str,
    state: RunState,
    started_at: DateTime<Utc>,
    clock: Instant,
    counts: RunCounts,
    warnings: Option<ValidationReport>,
}

impl<'a> RunTracker<'a> {
    fn start(source: &'a str, table: &'a str) -> Self {
        Self {
            source,
            table,
            state: RunState::Idle,
            started_at: Utc::now(),
            clock: Instant::now(),
            counts: RunCounts::default(),
            warnings: None,
        }
    }

    fn enter(&mut self, next: RunState) {
        debug!(source = self.source, "state {} -> {}", self.state, next);
        self.state = next;
    }

    fn fail(self, kind: &'static str, message: String) -> RunResult {
        let stage = self.state;
        error!(
            source = self.source,
            stage = %stage,
            kind,
            "{} failed during {stage}: {message}",
            self.source
        );
        let failure = RunFailure {
            kind,
            message,
            stage,
        };
        self.finish(Some(failure))
    }

    fn fail_with(self, err: EtlError) -> RunResult {
        self.fail(err.kind(), err.to_string())
    }

    fn finish(mut self, failure: Option<RunFailure>) -> RunResult {
        let success = failure.is_none();
        let terminal = if success {
            RunState::Succeeded
        } else {
            RunState::Failed
        };
        self.enter(terminal);
        let elapsed = self.clock.elapsed();

        let outcome = if success { "succeeded" } else { "failed" };
        counter!("etl_runs_total", "outcome" => outcome).increment(1);
        histogram!("etl_run_duration_ms").record(elapsed.as_secs_f64() * 1_000.0);
        gauge!("etl_last_run_ts").set(Utc::now().timestamp() as f64);

        let c = self.counts;
        info!(
            source = self.source,
            table = self.table,
            success,
            fetched = c.fetched,
            after_dedup = c.after_dedup,
            after_validation = c.after_validation,
            stored = c.stored,
            elapsed_ms = elapsed.as_millis() as u64,
            "pipeline {} {outcome} in {:.2}s",
            self.source,
            elapsed.as_secs_f64()
        );

        RunResult {
            source: self.source.to_string(),
            table: self.table.to_string(),
            success,
            state: terminal,
            started_at: self.started_at,
            finished_at: Utc::now(),
            elapsed,
            counts: c,
            warnings: self.warnings,
            error: failure,
        }
    }
}

/// One source wired to its fetcher, parser, transformer and sink.
pub struct Pipeline {
    source: SourceDescriptor,
    format: PayloadFormat,
    transformer: Transformer,
    table: String,
    fetcher: Fetcher<SharedTransport>,
    sink: Sink,
}

impl Pipeline {
    pub fn new(spec: &SourceSpec, fetch: &FetchConfig, transport: SharedTransport, sink: Sink) -> Self {
        Self {
            source: spec.descriptor(fetch),
            format: spec.effective_format(fetch),
            transformer: spec.transformer(),
            table: spec.table.clone(),
            fetcher: Fetcher::new(transport, fetch.retry_policy()),
            sink,
        }
    }

    pub fn name(&self) -> &str {
        &self.source.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Runs every stage in order. Never panics on stage errors.
    pub async fn run(&self) -> RunResult {
        ensure_metrics_described();
        let mut run = RunTracker::start(&self.source.name, &self.table);
        info!(source = run.source, table = run.table, "pipeline {} started", run.source);

        run.enter(RunState::Fetching);
        let payload = match self.fetcher.fetch(&self.source).await {
            Ok(p) => p,
            Err(e) => return run.fail_with(e),
        };

        run.enter(RunState::Parsing);
        let raw = match parse::parse(&payload, &self.format, Utc::now()) {
            Ok(r) => r,
            Err(e) => return run.fail_with(e),
        };
        run.counts.fetched = raw.len();
        info!(source = run.source, "parsed {} records", raw.len());

        run.enter(RunState::Transforming);
        let deduped = self.transformer.dedup(raw);
        run.counts.after_dedup = deduped.len();
        let batch = match self.transformer.finish(deduped) {
            Ok(b) => b,
            Err(e) => return run.fail_with(e),
        };
        run.counts.after_validation = batch.len();
        run.warnings = batch.report().filter(|r| !r.is_clean()).cloned();
        if let Some(report) = &run.warnings {
            warn!(
                source = run.source,
                nulls = report.total_nulls(),
                "batch has null values: {:?}",
                report.null_counts
            );
        }

        run.enter(RunState::Loading);
        if batch.is_empty() {
            // still reported through the sink for its status line
            self.sink.store(&batch, &self.table).await;
            return run.fail("no_records", "no records to load".to_string());
        }
        if !self.sink.store(&batch, &self.table).await {
            return run.fail("load", format!("could not write to table '{}'", self.table));
        }
        run.counts.stored = batch.len();
        run.finish(None)
    }
}

/// Builds one pipeline per source, all sharing the transport and sink.
pub fn build_pipelines<'a, I>(
    specs: I,
    fetch: &FetchConfig,
    transport: SharedTransport,
    sink: &Sink,
) -> Vec<Pipeline>
where
    I: IntoIterator<Item = &'a SourceSpec>,
{
    specs
        .into_iter()
        .map(|s| Pipeline::new(s, fetch, transport.clone(), sink.clone()))
        .collect()
}

/// Runs pipelines one after another; each commits its own batch.
pub async fn run_all(pipelines: &[Pipeline]) -> Vec<RunResult> {
    let mut out = Vec::with_capacity(pipelines.len());
    for p in pipelines {
        out.push(p.run().await);
    }
    let ok = out.iter().filter(|r| r.success).count();
    info!("{ok}/{} pipelines succeeded", out.len());
    out
}
