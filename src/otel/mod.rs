//! OpenTelemetry data handling
//!
//! Turns OTLP/JSON export requests into the canonical records persisted by
//! [`crate::storage`].
//!
//! ## Ingest
//!
//! Send telemetry via OTLP/HTTP with JSON encoding:
//! ```bash
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:5002
//! OTEL_EXPORTER_OTLP_PROTOCOL=http/json
//! ```
//!
//! Or configure an OTel Collector to forward:
//! ```yaml
//! exporters:
//!   otlphttp:
//!     endpoint: http://lantern:5002
//!     encoding: json
//! ```

pub mod model;
pub mod normalize;
pub mod numeric;
pub mod wire;

pub use model::{
    AttrMap, AttrValue, Attributes, Exemplar, HistogramData, KeyValue, LegacyMetric, LogEntry,
    MetricDatapoint, MetricMetadata, MetricType, QuantileValue, Scope, Span, SpanKind,
    SpanStatus, StatusCode, StoredDatapoint, SummaryData,
};
pub use normalize::{decode_id, normalize_logs, normalize_metrics, normalize_traces, now_secs};
pub use wire::{ExportLogsRequest, ExportMetricsRequest, ExportTraceRequest, MetricsPayload};
