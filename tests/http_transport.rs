// tests/http_transport.rs
use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use feed_etl::config::FetchConfig;
use feed_etl::error::{EtlError, TransportError};
use feed_etl::extract::{Fetcher, HttpTransport, RetryPolicy, SourceDescriptor};
use feed_etl::load::{MemoryStore, Sink, TableStore};
use feed_etl::pipeline::Pipeline;
use feed_etl::sources::google_news;

const NEWS_XML: &str = include_str!("fixtures/google_news_rss.xml");

fn quick_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        delay: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn retries_server_errors_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v4/latest/USD"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v4/latest/USD"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"rates":{"KRW":1400}}"#))
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(HttpTransport::new().unwrap(), quick_policy());
    let src = SourceDescriptor::new("rates", format!("{}/v4/latest/USD", server.uri()));
    let body = fetcher.fetch(&src).await.expect("third attempt succeeds");
    assert!(String::from_utf8(body).unwrap().contains("KRW"));

    let hits = server.received_requests().await.unwrap();
    assert_eq!(hits.len(), 3);
}

#[tokio::test]
async fn persistent_404_exhausts_with_last_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(HttpTransport::new().unwrap(), quick_policy());
    let src = SourceDescriptor::new("missing", format!("{}/nope", server.uri()));
    match fetcher.fetch(&src).await {
        Err(EtlError::FetchExhausted { attempts, last, .. }) => {
            assert_eq!(attempts, 3);
            assert!(matches!(last, TransportError::Status(404)));
        }
        other => panic!("expected FetchExhausted, got {other:?}"),
    }
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn slow_response_counts_as_failed_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(
        HttpTransport::new().unwrap(),
        RetryPolicy {
            max_retries: 2,
            delay: Duration::ZERO,
        },
    );
    let src = SourceDescriptor::new("slow", server.uri()).with_timeout(Duration::from_millis(50));
    let err = fetcher.fetch(&src).await.unwrap_err();
    assert_eq!(err.kind(), "fetch_exhausted");
}

#[tokio::test]
async fn news_preset_sends_locale_query_and_loads() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rss"))
        .and(query_param("hl", "ko"))
        .and(query_param("gl", "KR"))
        .and(query_param("ceid", "KR:ko"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/rss+xml; charset=utf-8")
                .set_body_string(NEWS_XML),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut spec = google_news();
    spec.url = format!("{}/rss", server.uri());
    let store = Arc::new(MemoryStore::new());
    let p = Pipeline::new(
        &spec,
        &FetchConfig::default(),
        Arc::new(HttpTransport::new().unwrap()),
        Sink::connected(store.clone()),
    );

    let r = p.run().await;
    assert!(r.success, "run failed: {:?}", r.error);
    assert_eq!(store.count("daily_news").await.unwrap(), Some(19));
}
