//! Metric discovery and series reads

use std::collections::{BTreeMap, BTreeSet};

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use super::traces::decode_all;
use crate::otel::{
    now_secs, AttrMap, Exemplar, HistogramData, LegacyMetric, MetricMetadata, StoredDatapoint,
    SummaryData,
};
use crate::storage::engine::or_default;
use crate::storage::keys::{self, SeriesId};
use crate::storage::{KvStore, Storage, StorageError};

/// Default lookback for series queries without an explicit start
pub const DEFAULT_WINDOW_SECS: f64 = 600.0;

/// Exact-match filter on attribute values, keyed by attribute name
pub type AttrFilter = BTreeMap<String, String>;

/// True when every filter key is present with a matching value
pub fn matches_filter(filter: &AttrFilter, attrs: &AttrMap) -> bool {
    filter.iter().all(|(key, expected)| {
        attrs
            .get(key)
            .map(|value| value.matches_text(expected))
            .unwrap_or(false)
    })
}

/// One datapoint of a series, numeric fields normalized
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: f64,
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub histogram: Option<HistogramData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<SummaryData>,
}

impl From<StoredDatapoint> for SeriesPoint {
    fn from(dp: StoredDatapoint) -> Self {
        Self {
            timestamp: dp.timestamp,
            value: dp.value,
            histogram: dp.histogram,
            summary: dp.summary,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    pub name: String,
    pub resource: AttrMap,
    pub attributes: AttrMap,
    pub datapoints: Vec<SeriesPoint>,
    pub exemplars: Vec<Exemplar>,
}

/// Series keys of `name`. The key prefix also matches longer names that
/// continue with `:`, so each key is parsed back and compared.
async fn series_ids(store: &dyn KvStore, name: &str) -> Result<Vec<SeriesId>, StorageError> {
    Ok(store
        .scan_prefix(&keys::series_prefix(name))
        .await?
        .iter()
        .filter_map(|key| SeriesId::from_series_key(key))
        .filter(|id| id.name == name)
        .collect())
}

fn parse_json_members(what: &str, members: Vec<Vec<u8>>) -> Vec<AttrMap> {
    let mut parsed: Vec<AttrMap> = members
        .iter()
        .filter_map(|raw| match serde_json::from_slice(raw) {
            Ok(attrs) => Some(attrs),
            Err(e) => {
                tracing::warn!("Skipping unreadable {} entry: {}", what, e);
                None
            }
        })
        .collect();
    // set order is arbitrary
    parsed.sort_by_cached_key(|attrs| serde_json::to_string(attrs).unwrap_or_default());
    parsed
}

impl Storage {
    /// Known metric names, sorted. The OTLP name set wins; the legacy set is
    /// only read when it is empty.
    pub async fn try_metric_names(&self, limit: Option<usize>) -> Result<Vec<String>, StorageError> {
        if let Some(names) = self.metric_names_cache.get(&limit) {
            return Ok(names);
        }

        let store = self.store()?;
        let mut raw = store.smembers(keys::METRIC_NAMES).await?;
        if raw.is_empty() {
            raw = store.smembers(keys::LEGACY_METRIC_NAMES).await?;
        }

        let mut names: Vec<String> = raw
            .into_iter()
            .map(|n| String::from_utf8_lossy(&n).into_owned())
            .collect();
        names.sort();
        if let Some(limit) = limit {
            names.truncate(limit);
        }

        self.metric_names_cache.put(limit, names.clone());
        Ok(names)
    }

    pub async fn metric_names(&self, limit: Option<usize>) -> Vec<String> {
        or_default("metric_names", self.try_metric_names(limit).await)
    }

    pub async fn try_metric_metadata(&self, name: &str) -> Result<MetricMetadata, StorageError> {
        let raw = self.store()?.get(&keys::metric_meta(name)).await?;
        Ok(match raw {
            Some(raw) => serde_json::from_slice(&raw).unwrap_or_else(|e| {
                tracing::warn!(metric = name, "Unreadable metric metadata: {}", e);
                MetricMetadata::default()
            }),
            None => MetricMetadata::default(),
        })
    }

    pub async fn metric_metadata(&self, name: &str) -> MetricMetadata {
        or_default("metric_metadata", self.try_metric_metadata(name).await)
    }

    /// Series of `name` with datapoints in `[start, end]`.
    ///
    /// `end` defaults to now and `start` to ten minutes before now. A series
    /// is kept when its first datapoint in the window matches both filters.
    pub async fn try_metric_series(
        &self,
        name: &str,
        resource_filter: &AttrFilter,
        attr_filter: &AttrFilter,
        start: Option<f64>,
        end: Option<f64>,
    ) -> Result<Vec<MetricSeries>, StorageError> {
        let store = self.store()?;
        let now = now_secs();
        let start = start.unwrap_or(now - DEFAULT_WINDOW_SECS);
        let end = end.unwrap_or(now);

        let ids = series_ids(store, name).await?;
        let ranges = join_all(
            ids.iter()
                .map(|id| async move { store.zrangebyscore(&id.series_key(), start, end).await }),
        )
        .await;

        let mut series = Vec::new();
        for (id, raw) in ids.iter().zip(ranges) {
            let points: Vec<StoredDatapoint> = decode_all("datapoint", raw?);
            let Some(first) = points.first() else {
                continue;
            };
            if !matches_filter(resource_filter, &first.resource)
                || !matches_filter(attr_filter, &first.attributes)
            {
                continue;
            }

            let exemplars = decode_all(
                "exemplar",
                store.zrangebyscore(&id.exemplar_key(), start, end).await?,
            );
            let resource = first.resource.clone();
            let attributes = first.attributes.clone();
            series.push(MetricSeries {
                name: name.to_string(),
                resource,
                attributes,
                datapoints: points.into_iter().map(SeriesPoint::from).collect(),
                exemplars,
            });
        }
        Ok(series)
    }

    pub async fn metric_series(
        &self,
        name: &str,
        resource_filter: &AttrFilter,
        attr_filter: &AttrFilter,
        start: Option<f64>,
        end: Option<f64>,
    ) -> Vec<MetricSeries> {
        or_default(
            "metric_series",
            self.try_metric_series(name, resource_filter, attr_filter, start, end)
                .await,
        )
    }

    /// Distinct resource attribute sets seen for a metric
    pub async fn try_all_resources(&self, name: &str) -> Result<Vec<AttrMap>, StorageError> {
        let members = self.store()?.smembers(&keys::metric_resources(name)).await?;
        Ok(parse_json_members("resource", members))
    }

    pub async fn all_resources(&self, name: &str) -> Vec<AttrMap> {
        or_default("all_resources", self.try_all_resources(name).await)
    }

    /// Distinct label sets seen for a metric.
    ///
    /// Without a resource filter this reads the discovery set. With one, it
    /// samples the oldest datapoint of every series instead.
    pub async fn try_all_attributes(
        &self,
        name: &str,
        resource_filter: &AttrFilter,
    ) -> Result<Vec<AttrMap>, StorageError> {
        let store = self.store()?;
        let attributes_key = keys::metric_attributes(name);
        if resource_filter.is_empty() && store.exists(&attributes_key).await? {
            return Ok(parse_json_members("attribute", store.smembers(&attributes_key).await?));
        }

        let mut seen = BTreeSet::new();
        let mut combos = Vec::new();
        for id in series_ids(store, name).await? {
            let sample: Vec<StoredDatapoint> =
                decode_all("datapoint", store.zrange(&id.series_key(), 0, 0).await?);
            let Some(dp) = sample.into_iter().next() else {
                continue;
            };
            if !matches_filter(resource_filter, &dp.resource) {
                continue;
            }
            if seen.insert(serde_json::to_string(&dp.attributes).unwrap_or_default()) {
                combos.push(dp.attributes);
            }
        }
        Ok(combos)
    }

    pub async fn all_attributes(&self, name: &str, resource_filter: &AttrFilter) -> Vec<AttrMap> {
        or_default(
            "all_attributes",
            self.try_all_attributes(name, resource_filter).await,
        )
    }

    /// Legacy metrics of `name` with timestamps in `[start, end]`
    pub async fn try_legacy_metric_data(
        &self,
        name: &str,
        start: Option<f64>,
        end: Option<f64>,
    ) -> Result<Vec<LegacyMetric>, StorageError> {
        let raw = self
            .store()?
            .zrangebyscore(
                &keys::legacy_metric(name),
                start.unwrap_or(f64::NEG_INFINITY),
                end.unwrap_or(f64::INFINITY),
            )
            .await?;
        Ok(decode_all("legacy metric", raw))
    }

    pub async fn legacy_metric_data(
        &self,
        name: &str,
        start: Option<f64>,
        end: Option<f64>,
    ) -> Vec<LegacyMetric> {
        or_default(
            "legacy_metric_data",
            self.try_legacy_metric_data(name, start, end).await,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otel::{AttrValue, MetricDatapoint, MetricType, MetricsPayload};
    use serde_json::json;

    fn attrs(pairs: &[(&str, &str)]) -> AttrMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), AttrValue::from(*v)))
            .collect()
    }

    fn filter(pairs: &[(&str, &str)]) -> AttrFilter {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn gauge(name: &str, service: &str, route: &str, ts: f64, value: f64) -> MetricDatapoint {
        MetricDatapoint {
            name: name.to_string(),
            metric_type: MetricType::Gauge,
            unit: "ms".to_string(),
            resource: attrs(&[("service.name", service)]),
            attributes: attrs(&[("route", route)]),
            timestamp: ts,
            value: Some(value),
            ..Default::default()
        }
    }

    #[test]
    fn test_matches_filter() {
        let mut target = attrs(&[("service.name", "api")]);
        target.insert("code".to_string(), AttrValue::Int(200));

        assert!(matches_filter(&AttrFilter::new(), &target));
        assert!(matches_filter(&filter(&[("service.name", "api")]), &target));
        assert!(matches_filter(&filter(&[("code", "200")]), &target));
        assert!(!matches_filter(&filter(&[("service.name", "web")]), &target));
        assert!(!matches_filter(&filter(&[("missing", "x")]), &target));
    }

    #[tokio::test]
    async fn test_metric_names_sorted_and_cached() {
        let storage = Storage::in_memory();
        storage
            .store_metric_datapoints(&[gauge("b.metric", "api", "/", 10.0, 1.0), gauge("a.metric", "api", "/", 10.0, 1.0)])
            .await;

        assert_eq!(storage.metric_names(None).await, vec!["a.metric", "b.metric"]);
        assert_eq!(storage.metric_names(Some(1)).await, vec!["a.metric"]);

        // served from cache until the entry expires
        storage
            .store_metric_datapoints(&[gauge("c.metric", "api", "/", 10.0, 1.0)])
            .await;
        assert_eq!(storage.metric_names(None).await.len(), 2);
        assert!(storage.metric_names_cache.stats().hits >= 1);
    }

    #[tokio::test]
    async fn test_metric_names_legacy_fallback() {
        let storage = Storage::in_memory();
        let payload = MetricsPayload::from_json(json!([{"name": "old.metric", "value": 1}])).unwrap();
        storage.store_metrics(payload).await;
        assert_eq!(storage.metric_names(None).await, vec!["old.metric"]);

        let data = storage.legacy_metric_data("old.metric", None, None).await;
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].fields["value"], json!(1));
    }

    #[tokio::test]
    async fn test_metric_metadata() {
        let storage = Storage::in_memory();
        assert_eq!(storage.metric_metadata("none").await, MetricMetadata::default());

        storage.store_metric_datapoints(&[gauge("latency", "api", "/", 10.0, 1.0)]).await;
        let meta = storage.metric_metadata("latency").await;
        assert_eq!(meta.metric_type, MetricType::Gauge);
        assert_eq!(meta.unit, "ms");
        assert_eq!(meta.temporality, "N/A");
    }

    #[tokio::test]
    async fn test_metric_series_filters_and_window() {
        let storage = Storage::in_memory();
        storage
            .store_metric_datapoints(&[
                gauge("latency", "api", "/a", 100.0, 1.0),
                gauge("latency", "api", "/a", 110.0, 2.0),
                gauge("latency", "api", "/b", 100.0, 3.0),
                gauge("latency", "web", "/a", 100.0, 4.0),
                gauge("latency:p99", "api", "/a", 100.0, 5.0),
            ])
            .await;

        let all = storage
            .metric_series("latency", &AttrFilter::new(), &AttrFilter::new(), Some(0.0), Some(200.0))
            .await;
        assert_eq!(all.len(), 3);

        let api_a = storage
            .metric_series(
                "latency",
                &filter(&[("service.name", "api")]),
                &filter(&[("route", "/a")]),
                Some(0.0),
                Some(200.0),
            )
            .await;
        assert_eq!(api_a.len(), 1);
        let values: Vec<Option<f64>> = api_a[0].datapoints.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![Some(1.0), Some(2.0)]);

        let windowed = storage
            .metric_series(
                "latency",
                &filter(&[("service.name", "api")]),
                &filter(&[("route", "/a")]),
                Some(105.0),
                Some(200.0),
            )
            .await;
        assert_eq!(windowed[0].datapoints.len(), 1);

        // default window ends now, far after these timestamps
        let recent = storage
            .metric_series("latency", &AttrFilter::new(), &AttrFilter::new(), None, None)
            .await;
        assert!(recent.is_empty());
    }

    #[tokio::test]
    async fn test_metric_series_exemplars() {
        let storage = Storage::in_memory();
        let mut dp = gauge("latency", "api", "/", 100.0, 1.0);
        dp.exemplars = vec![
            Exemplar {
                timestamp: 100.0,
                value: Some(9.0),
                trace_id: "abc".to_string(),
                ..Default::default()
            },
            Exemplar {
                timestamp: 500.0,
                ..Default::default()
            },
        ];
        storage.store_metric_datapoints(&[dp]).await;

        let series = storage
            .metric_series("latency", &AttrFilter::new(), &AttrFilter::new(), Some(0.0), Some(200.0))
            .await;
        assert_eq!(series[0].exemplars.len(), 1);
        assert_eq!(series[0].exemplars[0].trace_id, "abc");
    }

    #[tokio::test]
    async fn test_resources_and_attributes() {
        let storage = Storage::in_memory();
        storage
            .store_metric_datapoints(&[
                gauge("latency", "api", "/a", 100.0, 1.0),
                gauge("latency", "api", "/b", 100.0, 1.0),
                gauge("latency", "web", "/c", 100.0, 1.0),
            ])
            .await;

        let resources = storage.all_resources("latency").await;
        assert_eq!(
            resources,
            vec![attrs(&[("service.name", "api")]), attrs(&[("service.name", "web")])]
        );

        assert_eq!(storage.all_attributes("latency", &AttrFilter::new()).await.len(), 3);

        let web_only = storage
            .all_attributes("latency", &filter(&[("service.name", "web")]))
            .await;
        assert_eq!(web_only, vec![attrs(&[("route", "/c")])]);
    }
}
