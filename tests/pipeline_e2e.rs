// tests/pipeline_e2e.rs
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use feed_etl::aggregate::{Aggregator, Period};
use feed_etl::config::FetchConfig;
use feed_etl::error::{EtlError, TransportError};
use feed_etl::extract::{SourceDescriptor, Transport};
use feed_etl::load::{MemoryStore, SharedStore, Sink, TableStore};
use feed_etl::pipeline::{build_pipelines, run_all, Pipeline, RunState};
use feed_etl::record::Value;
use feed_etl::sources::{builtin_sources, exchange_rate_usd, google_news, open_meteo_seoul};

const NEWS_XML: &str = include_str!("fixtures/google_news_rss.xml");
const WEATHER_JSON: &str = include_str!("fixtures/open_meteo.json");
const RATES_JSON: &str = include_str!("fixtures/exchange_rate.json");

/// Serves canned bodies by URL; anything else is a 404.
struct Canned(HashMap<String, &'static str>);

impl Canned {
    fn presets() -> Self {
        let mut m = HashMap::new();
        m.insert(google_news().url, NEWS_XML);
        m.insert(open_meteo_seoul().url, WEATHER_JSON);
        m.insert(exchange_rate_usd().url, RATES_JSON);
        Self(m)
    }
}

#[async_trait]
impl Transport for Canned {
    async fn get(&self, source: &SourceDescriptor) -> Result<Vec<u8>, TransportError> {
        self.0
            .get(&source.url)
            .map(|b| b.as_bytes().to_vec())
            .ok_or(TransportError::Status(404))
    }
}

/// Always fails and counts attempts.
#[derive(Default)]
struct Down(AtomicU32);

#[async_trait]
impl Transport for Down {
    async fn get(&self, _: &SourceDescriptor) -> Result<Vec<u8>, TransportError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::Other("connection refused".into()))
    }
}

fn memory() -> (Arc<MemoryStore>, Sink) {
    let store = Arc::new(MemoryStore::new());
    let sink = Sink::connected(store.clone());
    (store, sink)
}

#[tokio::test]
async fn feed_of_25_with_one_duplicate_stores_19() {
    let (store, sink) = memory();
    let p = Pipeline::new(
        &google_news(),
        &FetchConfig::default(),
        Arc::new(Canned::presets()),
        sink,
    );

    let r = p.run().await;
    assert!(r.success, "run failed: {:?}", r.error);
    assert_eq!(r.counts.fetched, 20);
    assert_eq!(r.counts.after_dedup, 19);
    assert_eq!(r.counts.stored, 19);
    assert_eq!(store.count("daily_news").await.unwrap(), Some(19));

    let rows = store.read_ordered("daily_news").await.unwrap();
    let first = &rows[0].record;
    assert!(matches!(first.get("pub_date"), Some(Value::Timestamp(_))));
    let title = first.get("title").and_then(Value::as_str).unwrap();
    let len = first.get("title_length").and_then(Value::as_f64).unwrap();
    assert_eq!(len as usize, title.chars().count());

    // entity decoded by the XML layer
    assert!(rows.iter().any(|r| {
        r.record
            .get("title")
            .and_then(Value::as_str)
            .is_some_and(|t| t.starts_with("Hyundai & Kia"))
    }));
}

#[tokio::test]
async fn dedup_does_not_span_runs() {
    let (store, sink) = memory();
    let p = Pipeline::new(
        &google_news(),
        &FetchConfig::default(),
        Arc::new(Canned::presets()),
        sink,
    );
    assert!(p.run().await.success);
    assert!(p.run().await.success);
    assert_eq!(store.count("daily_news").await.unwrap(), Some(38));
}

#[tokio::test(start_paused = true)]
async fn three_failed_attempts_fail_the_run() {
    let (store, sink) = memory();
    let down = Arc::new(Down::default());
    let p = Pipeline::new(&google_news(), &FetchConfig::default(), down.clone(), sink);

    let r = p.run().await;
    assert!(!r.success);
    assert_eq!(r.state, RunState::Failed);
    assert_eq!(r.counts.fetched, 0);
    assert_eq!(down.0.load(Ordering::SeqCst), 3);
    // two 5s pauses between three attempts
    assert!(r.elapsed >= Duration::from_secs(10));
    assert_eq!(store.count("daily_news").await.unwrap(), None);
}

#[tokio::test]
async fn multi_source_run_fills_each_table() {
    let (store, sink) = memory();
    let sources = builtin_sources();
    let pipelines = build_pipelines(
        &sources,
        &FetchConfig::default(),
        Arc::new(Canned::presets()),
        &sink,
    );

    let results = run_all(&pipelines).await;
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.success));

    let weather = store.read_ordered("weather_data").await.unwrap();
    assert_eq!(weather.len(), 1);
    let w = &weather[0].record;
    assert_eq!(w.get("temperature").and_then(Value::as_f64), Some(-3.2));
    assert_eq!(w.get("weathercode").and_then(Value::as_f64), Some(3.0));
    assert_eq!(w.get("city").and_then(Value::as_str), Some("Seoul"));

    let rates = store.read_ordered("exchange_rate").await.unwrap();
    let x = &rates[0].record;
    assert_eq!(x.get("krw_rate").and_then(Value::as_f64), Some(1468.55));
    assert_eq!(x.get("base_currency").and_then(Value::as_str), Some("USD"));

    let shared: SharedStore = store.clone();
    let counts = Aggregator::new(shared, Vec::new())
        .row_counts(&[
            "daily_news".to_string(),
            "weather_data".to_string(),
            "public_data".to_string(),
        ])
        .await;
    assert_eq!(counts[0].1, Some(19));
    assert_eq!(counts[1].1, Some(1));
    assert_eq!(counts[2].1, None);
}

#[tokio::test]
async fn one_failing_source_does_not_stop_the_others() {
    let (store, sink) = memory();
    let mut broken = open_meteo_seoul();
    broken.url = "https://unreachable.test/forecast".into();
    let fetch = FetchConfig {
        retry_delay: Duration::ZERO,
        ..FetchConfig::default()
    };
    let sources = [broken, exchange_rate_usd()];
    let pipelines = build_pipelines(&sources, &fetch, Arc::new(Canned::presets()), &sink);

    let results = run_all(&pipelines).await;
    assert!(!results[0].success);
    assert!(results[1].success);
    assert_eq!(store.count("weather_data").await.unwrap(), None);
    assert_eq!(store.count("exchange_rate").await.unwrap(), Some(1));
}

#[tokio::test]
async fn aggregation_after_a_run() {
    let (store, sink) = memory();
    let p = Pipeline::new(
        &open_meteo_seoul(),
        &FetchConfig::default(),
        Arc::new(Canned::presets()),
        sink,
    );
    assert!(p.run().await.success);
    assert!(p.run().await.success);

    let shared: SharedStore = store.clone();
    let agg = Aggregator::new(shared, vec!["temperature".into(), "windspeed".into()]);
    let out = agg
        .aggregate_all(&["weather_data".to_string()], Period::Monthly)
        .await
        .unwrap();
    let groups = &out[0].1;
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].rows, 2);
    let t = &groups[0].fields["temperature"];
    assert_eq!((t.count, t.mean), (2, -3.2));

    let empty = agg
        .aggregate_all(&["daily_news".to_string()], Period::Daily)
        .await;
    assert!(matches!(empty, Err(EtlError::NoData)));
}
