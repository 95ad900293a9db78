// src/error.rs
//! Error kinds shared by every pipeline stage.

use thiserror::Error;

pub type EtlResult<T> = Result<T, EtlError>;

/// A single failed network attempt. Retried locally by the fetcher.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum EtlError {
    /// All attempts failed; `last` is the error of the final attempt.
    #[error("fetching {source_name} failed after {attempts} attempts: {last}")]
    FetchExhausted {
        source_name: String,
        attempts: u32,
        #[source]
        last: TransportError,
    },

    #[error("malformed {format} payload: {reason}")]
    Parse {
        format: &'static str,
        reason: String,
    },

    #[error("required fields missing from schema: {}", missing.join(", "))]
    Schema { missing: Vec<String> },

    #[error("writing to table {table} failed: {reason}")]
    StoreWrite { table: String, reason: String },

    #[error("store connection is unavailable")]
    StoreUnavailable,

    #[error("reading table {table} failed: {reason}")]
    StoreRead { table: String, reason: String },

    #[error("no rows in any requested table")]
    NoData,

    #[error("invalid table name {0:?}")]
    InvalidTableName(String),

    #[error("query on {table} exceeded {secs}s")]
    QueryTimeout { table: String, secs: u64 },
}

impl EtlError {
    pub(crate) fn parse(format: &'static str, reason: impl ToString) -> Self {
        EtlError::Parse {
            format,
            reason: reason.to_string(),
        }
    }

    /// Short stable label, used for metrics and run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            EtlError::FetchExhausted { .. } => "fetch_exhausted",
            EtlError::Parse { .. } => "parse",
            EtlError::Schema { .. } => "schema",
            EtlError::StoreWrite { .. } => "store_write",
            EtlError::StoreUnavailable => "store_unavailable",
            EtlError::StoreRead { .. } => "store_read",
            EtlError::NoData => "no_data",
            EtlError::InvalidTableName(_) => "invalid_table",
            EtlError::QueryTimeout { .. } => "query_timeout",
        }
    }
}
