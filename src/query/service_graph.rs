//! Service dependency graph derived from recent traces

use std::collections::{BTreeMap, HashMap};

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use super::catalog::ServiceInfo;
use super::round2;
use crate::otel::{Attributes, Span};
use crate::storage::engine::or_default;
use crate::storage::{Storage, StorageError};

/// Traces scanned when no limit is given
pub const DEFAULT_GRAPH_TRACES: usize = 500;

const UNKNOWN_SERVICE: &str = "unknown";

// checked in order; messaging wins over database
const MESSAGING_SYSTEM: &str = "messaging.system";
const MESSAGING_TARGET_KEYS: &[&str] = &["messaging.destination", "messaging.destination.name"];
const DB_SYSTEM: &str = "db.system";
const DB_TARGET_KEYS: &[&str] = &["db.name", "db.namespace"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Service,
    Database,
    Messaging,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub metrics: Option<ServiceInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    /// Number of calls observed
    pub value: usize,
    /// 95th percentile call duration in milliseconds
    pub p95: f64,
    /// Calls per second over a one-minute window
    pub req_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Nearest-rank 95th percentile, rounded to two decimals. Sorts in place.
pub fn p95(durations: &mut [f64]) -> f64 {
    if durations.is_empty() {
        return 0.0;
    }
    durations.sort_by(|a, b| a.total_cmp(b));
    let idx = ((durations.len() as f64 * 0.95) as usize).min(durations.len() - 1);
    round2(durations[idx])
}

/// External dependency a span calls, if any
fn external_target(attributes: &Attributes) -> Option<(String, NodeType)> {
    let lookup = |system_key: &str, target_keys: &[&str], node_type: NodeType| {
        let system = attributes.get(system_key)?;
        let target = attributes.first_of(target_keys).unwrap_or(system);
        Some((target.to_string(), node_type))
    };
    lookup(MESSAGING_SYSTEM, MESSAGING_TARGET_KEYS, NodeType::Messaging)
        .or_else(|| lookup(DB_SYSTEM, DB_TARGET_KEYS, NodeType::Database))
}

/// Accumulates nodes and edge durations across traces
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: BTreeMap<String, GraphNode>,
    edges: BTreeMap<(String, String), Vec<f64>>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a service node for every catalog entry
    pub fn seed(&mut self, catalog: &[ServiceInfo]) {
        for info in catalog {
            self.nodes
                .entry(info.name.clone())
                .or_insert_with(|| GraphNode {
                    id: info.name.clone(),
                    label: info.name.clone(),
                    node_type: NodeType::Service,
                    metrics: Some(info.clone()),
                });
        }
    }

    fn add_node(&mut self, id: &str, node_type: NodeType) {
        if !self.nodes.contains_key(id) {
            self.nodes.insert(
                id.to_string(),
                GraphNode {
                    id: id.to_string(),
                    label: id.to_string(),
                    node_type,
                    metrics: None,
                },
            );
        }
    }

    fn record(&mut self, source: &str, target: &str, duration_ms: f64) {
        self.edges
            .entry((source.to_string(), target.to_string()))
            .or_default()
            .push(duration_ms);
    }

    /// Adds the calls found in one trace's spans
    pub fn add_trace(&mut self, spans: &[Span]) {
        let by_id: HashMap<&str, &Span> = spans
            .iter()
            .map(|span| (span.span_id.as_str(), span))
            .collect();
        let service_of = |span: &Span| -> String {
            if span.service_name.is_empty() {
                UNKNOWN_SERVICE.to_string()
            } else {
                span.service_name.clone()
            }
        };

        for span in spans {
            let service = service_of(span);
            if service != UNKNOWN_SERVICE {
                self.add_node(&service, NodeType::Service);
            }
            let duration_ms = span.duration_ms();

            if let Some((target, node_type)) = external_target(&span.attributes) {
                self.add_node(&target, node_type);
                self.record(&service, &target, duration_ms);
            }

            if span.is_root() {
                continue;
            }
            if let Some(parent) = by_id.get(span.parent_span_id.as_str()) {
                let parent_service = service_of(parent);
                if parent_service != service
                    && parent_service != UNKNOWN_SERVICE
                    && service != UNKNOWN_SERVICE
                {
                    self.record(&parent_service, &service, duration_ms);
                }
            }
        }
    }

    pub fn build(self) -> ServiceGraph {
        let edges = self
            .edges
            .into_iter()
            .map(|((source, target), mut durations)| GraphEdge {
                source,
                target,
                value: durations.len(),
                p95: p95(&mut durations),
                req_rate: round2(durations.len() as f64 / 60.0),
            })
            .collect();
        ServiceGraph {
            nodes: self.nodes.into_values().collect(),
            edges,
        }
    }
}

impl Storage {
    /// Dependency graph over the `limit` most recent traces
    pub async fn try_service_graph(&self, limit: usize) -> Result<ServiceGraph, StorageError> {
        if let Some(graph) = self.graph_cache.get(&limit) {
            return Ok(graph);
        }

        let mut builder = GraphBuilder::new();
        builder.seed(&self.service_catalog().await);

        let trace_ids = self.try_recent_trace_ids(limit).await?;
        let traces = join_all(trace_ids.iter().map(|id| self.try_trace_spans(id))).await;
        for spans in traces {
            builder.add_trace(&spans?);
        }

        let graph = builder.build();
        tracing::debug!(
            traces = trace_ids.len(),
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "built service graph"
        );
        self.graph_cache.put(limit, graph.clone());
        Ok(graph)
    }

    pub async fn service_graph(&self, limit: usize) -> ServiceGraph {
        or_default("service_graph", self.try_service_graph(limit).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otel::KeyValue;

    fn span(span_id: &str, parent: &str, service: &str, duration_ms: u64) -> Span {
        Span {
            trace_id: "t1".to_string(),
            span_id: span_id.to_string(),
            parent_span_id: parent.to_string(),
            service_name: service.to_string(),
            start_time_unix_nano: 1_000_000_000,
            end_time_unix_nano: 1_000_000_000 + duration_ms * 1_000_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_p95_nearest_rank() {
        let mut durations: Vec<f64> = (1..=10).rev().map(|i| (i * 10) as f64).collect();
        assert_eq!(p95(&mut durations), 100.0);

        let mut one = vec![4.567];
        assert_eq!(p95(&mut one), 4.57);
        assert_eq!(p95(&mut []), 0.0);

        let mut twenty: Vec<f64> = (1..=20).map(|i| i as f64).collect();
        assert_eq!(p95(&mut twenty), 20.0);
    }

    #[test]
    fn test_service_to_service_edge() {
        let mut builder = GraphBuilder::new();
        builder.add_trace(&[span("root", "", "frontend", 50), span("child", "root", "backend", 20)]);
        let graph = builder.build();

        assert_eq!(graph.edges.len(), 1);
        let edge = &graph.edges[0];
        assert_eq!((edge.source.as_str(), edge.target.as_str()), ("frontend", "backend"));
        assert_eq!(edge.value, 1);
        assert_eq!(edge.p95, 20.0);
        assert_eq!(edge.req_rate, 0.02);
        assert_eq!(graph.nodes.len(), 2);
    }

    #[test]
    fn test_external_dependencies() {
        let mut db_call = span("q", "root", "backend", 5);
        db_call.attributes = Attributes::List(vec![
            KeyValue::new("db.system", "postgresql"),
            KeyValue::new("db.name", "orders"),
        ]);
        let mut publish = span("p", "root", "backend", 2);
        publish.attributes = Attributes::List(vec![
            KeyValue::new("db.system", "redis"),
            KeyValue::new("messaging.system", "kafka"),
        ]);

        let mut builder = GraphBuilder::new();
        builder.add_trace(&[span("root", "", "backend", 10), db_call, publish]);
        let graph = builder.build();

        let orders = graph.nodes.iter().find(|n| n.id == "orders").unwrap();
        assert_eq!(orders.node_type, NodeType::Database);
        let kafka = graph.nodes.iter().find(|n| n.id == "kafka").unwrap();
        assert_eq!(kafka.node_type, NodeType::Messaging);

        let targets: Vec<&str> = graph.edges.iter().map(|e| e.target.as_str()).collect();
        assert_eq!(targets, vec!["kafka", "orders"]);
        assert!(graph.edges.iter().all(|e| e.source == "backend"));
    }

    #[test]
    fn test_unknown_services_skip_service_edges() {
        let mut builder = GraphBuilder::new();
        builder.add_trace(&[span("root", "", "", 10), span("child", "root", "backend", 5)]);
        let graph = builder.build();
        assert!(graph.edges.is_empty());
        assert_eq!(graph.nodes.len(), 1);
    }

    #[tokio::test]
    async fn test_service_graph_from_storage() {
        let storage = Storage::in_memory();
        storage
            .store_spans(&[span("root", "", "frontend", 50), span("child", "root", "backend", 20)])
            .await;

        let graph = storage.service_graph(DEFAULT_GRAPH_TRACES).await;
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].source, "frontend");
        assert_eq!(graph.edges[0].target, "backend");

        // seeded from the catalog
        let frontend = graph.nodes.iter().find(|n| n.id == "frontend").unwrap();
        assert_eq!(frontend.metrics.as_ref().map(|m| m.span_count), Some(1));

        storage.service_graph(DEFAULT_GRAPH_TRACES).await;
        assert_eq!(storage.graph_cache.stats().hits, 1);
    }
}
