// src/extract.rs
//! Fetcher: one GET per attempt, bounded retries with a fixed delay.

use async_trait::async_trait;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::{EtlError, EtlResult, TransportError};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where to fetch from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub name: String,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub timeout: Duration,
}

impl SourceDescriptor {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            query: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A single network attempt. Implementations must not retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, source: &SourceDescriptor) -> Result<Vec<u8>, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn get(&self, source: &SourceDescriptor) -> Result<Vec<u8>, TransportError> {
        (**self).get(source).await
    }
}

/// `reqwest`-backed transport; non-2xx responses are errors.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("feed-etl/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, source: &SourceDescriptor) -> Result<Vec<u8>, TransportError> {
        let resp = self
            .client
            .get(&source.url)
            .query(&source.query)
            .timeout(source.timeout)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_retries: u32,
    /// Pause between consecutive attempts; none after the last.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

pub struct Fetcher<T: Transport> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: Transport> Fetcher<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Returns the raw payload, or `FetchExhausted` with the last attempt's error.
    pub async fn fetch(&self, source: &SourceDescriptor) -> EtlResult<Vec<u8>> {
        let max = self.policy.max_retries.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            info!(source = %source.name, "fetch attempt {attempt}/{max}");
            counter!("etl_fetch_attempts_total").increment(1);

            match self.transport.get(source).await {
                Ok(body) => {
                    info!(
                        source = %source.name,
                        bytes = body.len(),
                        "fetched payload on attempt {attempt}/{max}"
                    );
                    return Ok(body);
                }
                Err(e) if attempt < max => {
                    warn!(source = %source.name, error = %e, "attempt {attempt}/{max} failed");
                    if !self.policy.delay.is_zero() {
                        tokio::time::sleep(self.policy.delay).await;
                    }
                }
                Err(e) => {
                    warn!(source = %source.name, error = %e, "attempt {attempt}/{max} failed");
                    error!(source = %source.name, "retry budget exhausted");
                    counter!("etl_fetch_failures_total").increment(1);
                    return Err(EtlError::FetchExhausted {
                        source_name: source.name.clone(),
                        attempts: attempt,
                        last: e,
                    });
                }
            }
        }
    }
}
