//! Lantern: a lightweight OpenTelemetry backend
//!
//! Ingests OTLP traces, logs and metrics, keeps them in a TTL'd key-value
//! store (Redis, or in-process for development) and answers the queries a
//! small observability UI needs: trace timelines, service dependency graphs,
//! RED metrics and metric series with resource/attribute filters.
//!
//! # Features
//!
//! - **OTLP normalization**: JSON trees from any OTLP/HTTP exporter flattened
//!   into canonical span, log and datapoint records
//! - **Compact storage**: MessagePack records, zstd-compressed above 512 bytes
//! - **Pipelined writes**: one atomic round trip per batch, all indices included
//! - **Cardinality accounting**: dropped metric names tracked for the stats API
//! - **Service graph and RED metrics** derived from spans and span metrics
//!
//! # Example
//!
//! ```no_run
//! use lantern::otel::ExportTraceRequest;
//! use lantern::storage::Storage;
//!
//! # async fn demo(body: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let storage = Storage::in_memory();
//!
//! let request: ExportTraceRequest = serde_json::from_str(body)?;
//! storage.store_traces(request).await;
//!
//! for trace_id in storage.recent_trace_ids(10).await {
//!     println!("{:?}", storage.trace_summary(&trace_id).await);
//! }
//! println!("{:?}", storage.service_graph(500).await);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod compaction;
pub mod otel;
pub mod query;
pub mod storage;

// Re-export commonly used types
pub use query::{RedMetrics, ServiceGraph, TraceSummary};
pub use storage::{Storage, StorageConfig, StorageError};
