// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod extract;
pub mod load;
pub mod logging;
pub mod metrics;
pub mod parse;
pub mod pipeline;
pub mod record;
pub mod scheduler;
pub mod sources;
pub mod transform;

// ---- Re-exports for stable public API ----
pub use crate::aggregate::{Aggregator, FieldStats, GroupSummary, Period};
pub use crate::config::{EtlConfig, FetchConfig, StoreConfig};
pub use crate::error::{EtlError, EtlResult, TransportError};
pub use crate::extract::{Fetcher, HttpTransport, RetryPolicy, SourceDescriptor, Transport};
pub use crate::load::{MemoryStore, SharedStore, Sink, SqlStore, StoredRow, TableStore};
pub use crate::pipeline::{run_all, Pipeline, RunCounts, RunFailure, RunResult, RunState};
pub use crate::record::{Batch, Record, Value};
pub use crate::sources::SourceSpec;
pub use crate::transform::{validate, Derivation, Transformer, ValidationReport};
