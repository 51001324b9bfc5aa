//! Read paths over [`crate::storage::Storage`]
//!
//! Each submodule adds an `impl Storage` block for one family of queries.

pub mod cache;
pub mod catalog;
pub mod metrics;
pub mod red;
pub mod service_graph;
pub mod stats;
pub mod traces;

pub use cache::{CacheStats, TtlCache};
pub use catalog::ServiceInfo;
pub use metrics::{matches_filter, AttrFilter, MetricSeries, SeriesPoint};
pub use red::{compute_red, RedMetrics};
pub use service_graph::{GraphBuilder, GraphEdge, GraphNode, NodeType, ServiceGraph};
pub use stats::StorageStats;
pub use traces::{HttpView, SpanDetails, TraceSummary};

/// Round to two decimal places
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
