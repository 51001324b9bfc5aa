//! Service catalog built from recent spans

use std::collections::{BTreeMap, HashSet};

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use super::red::RedMetrics;
use super::traces::decode_all;
use crate::otel::Span;
use crate::storage::engine::or_default;
use crate::storage::{keys, Storage, StorageError};

/// Spans sampled to build the catalog
pub const CATALOG_SPAN_SAMPLE: usize = 1000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub span_count: usize,
    pub trace_count: usize,
    /// Earliest span start seen, nanoseconds since epoch
    pub first_seen: u64,
    /// Latest span start seen, nanoseconds since epoch
    pub last_seen: u64,
    #[serde(flatten)]
    pub red: RedMetrics,
}

#[derive(Default)]
struct ServiceTally<'a> {
    span_count: usize,
    traces: HashSet<&'a str>,
    first_seen: u64,
    last_seen: u64,
}

/// Per-service span and trace counts, without RED metrics
pub fn tally_services(spans: &[Span]) -> Vec<ServiceInfo> {
    let mut tallies: BTreeMap<&str, ServiceTally> = BTreeMap::new();
    for span in spans {
        let name = if span.service_name.is_empty() {
            "unknown"
        } else {
            span.service_name.as_str()
        };
        let start = span.start_time_unix_nano;
        let tally = tallies.entry(name).or_insert_with(|| ServiceTally {
            first_seen: start,
            last_seen: start,
            ..Default::default()
        });
        tally.span_count += 1;
        tally.traces.insert(span.trace_id.as_str());
        tally.first_seen = tally.first_seen.min(start);
        tally.last_seen = tally.last_seen.max(start);
    }

    tallies
        .into_iter()
        .map(|(name, tally)| ServiceInfo {
            name: name.to_string(),
            span_count: tally.span_count,
            trace_count: tally.traces.len(),
            first_seen: tally.first_seen,
            last_seen: tally.last_seen,
            red: RedMetrics::default(),
        })
        .collect()
}

impl Storage {
    /// Services seen in the most recent spans, with their RED metrics
    pub async fn try_service_catalog(&self) -> Result<Vec<ServiceInfo>, StorageError> {
        if let Some(catalog) = self.catalog_cache.get(&()) {
            return Ok(catalog);
        }

        let store = self.store()?;
        let span_ids = self.try_recent_span_ids(CATALOG_SPAN_SAMPLE).await?;
        let fetches = span_ids
            .iter()
            .map(|id| async move { store.get(&keys::span(id)).await });
        let mut payloads = Vec::with_capacity(span_ids.len());
        for result in join_all(fetches).await {
            if let Some(raw) = result? {
                payloads.push(raw);
            }
        }
        let spans: Vec<Span> = decode_all("span", payloads);

        let mut catalog = tally_services(&spans);
        let red = join_all(catalog.iter().map(|info| self.red_metrics(&info.name))).await;
        for (info, red) in catalog.iter_mut().zip(red) {
            info.red = red;
        }

        self.catalog_cache.put((), catalog.clone());
        Ok(catalog)
    }

    pub async fn service_catalog(&self) -> Vec<ServiceInfo> {
        or_default("service_catalog", self.try_service_catalog().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(trace_id: &str, span_id: &str, service: &str, start: u64) -> Span {
        Span {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
            service_name: service.to_string(),
            start_time_unix_nano: start,
            end_time_unix_nano: start + 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_tally_services() {
        let spans = vec![
            span("t1", "a", "frontend", 300),
            span("t1", "b", "backend", 350),
            span("t2", "c", "frontend", 100),
            span("t2", "d", "frontend", 500),
            span("t3", "e", "", 10),
        ];
        let catalog = tally_services(&spans);
        let names: Vec<&str> = catalog.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["backend", "frontend", "unknown"]);

        let frontend = &catalog[1];
        assert_eq!(frontend.span_count, 3);
        assert_eq!(frontend.trace_count, 2);
        assert_eq!(frontend.first_seen, 100);
        assert_eq!(frontend.last_seen, 500);
    }

    #[tokio::test]
    async fn test_service_catalog() {
        let storage = Storage::in_memory();
        storage
            .store_spans(&[span("t1", "a", "frontend", 1), span("t1", "b", "backend", 2)])
            .await;

        let catalog = storage.service_catalog().await;
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[0].name, "backend");
        assert_eq!(catalog[0].red, RedMetrics::default());

        let json = serde_json::to_value(&catalog[1]).unwrap();
        assert_eq!(json["name"], "frontend");
        assert!(json["rate"].is_null());
        assert!(json.get("red").is_none());
    }
}
