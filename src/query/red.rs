//! Rate, error and duration metrics per service
//!
//! Computed from the span-metrics connector output: a duration histogram
//! and a call counter, both labelled with the service's resource.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::metrics::{AttrFilter, MetricSeries};
use super::round2;
use crate::otel::{now_secs, AttrValue, HistogramData};
use crate::storage::engine::or_default;
use crate::storage::{Storage, StorageError};

pub const DURATION_METRIC: &str = "traces.span.metrics.duration";
pub const CALLS_METRIC: &str = "traces.span.metrics.calls";

/// Lookback covered by RED metrics
pub const RED_WINDOW_SECS: f64 = 60.0;
/// Datapoints are grouped into buckets of this width
pub const BUCKET_SECS: f64 = 15.0;

const STATUS_KEYS: &[&str] = &["status.code", "http.response.status_code", "http.status_code"];
const ERROR_STATUSES: &[&str] = &["STATUS_CODE_ERROR", "ERROR"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RedMetrics {
    /// Requests per second, rounded up
    pub rate: Option<u64>,
    /// Percentage of calls with an error status
    pub error_rate: Option<f64>,
    pub duration_p50: Option<f64>,
    pub duration_p95: Option<f64>,
    pub duration_p99: Option<f64>,
}

#[derive(Default)]
struct Bucket<'a> {
    count: u64,
    histograms: Vec<&'a HistogramData>,
}

fn bucket_start(timestamp: f64) -> i64 {
    (timestamp / BUCKET_SECS).floor() as i64 * BUCKET_SECS as i64
}

fn is_error_status(status: &AttrValue) -> bool {
    if let Some(text) = status.as_str() {
        if ERROR_STATUSES.contains(&text) {
            return true;
        }
    }
    status.as_i64().map(|code| code >= 400).unwrap_or(false)
}

/// Derive RED metrics from already-windowed duration and call series
pub fn compute_red(duration_series: &[MetricSeries], calls_series: &[MetricSeries]) -> RedMetrics {
    let mut buckets: BTreeMap<i64, Bucket> = BTreeMap::new();
    for series in duration_series {
        for point in &series.datapoints {
            if let Some(hist) = &point.histogram {
                let bucket = buckets.entry(bucket_start(point.timestamp)).or_default();
                bucket.count += hist.count;
                bucket.histograms.push(hist);
            }
        }
    }

    let mut red = RedMetrics {
        rate: rate(&buckets),
        error_rate: error_rate(calls_series),
        ..Default::default()
    };

    if let Some(latest) = buckets.values().next_back() {
        if let Some((bounds, counts)) = sum_buckets(&latest.histograms) {
            red.duration_p50 = percentile(&bounds, &counts, 0.50);
            red.duration_p95 = percentile(&bounds, &counts, 0.95);
            red.duration_p99 = percentile(&bounds, &counts, 0.99);
        }
    }
    red
}

/// Cumulative-count delta between the two latest buckets, or the single
/// bucket's count spread over its width
fn rate(buckets: &BTreeMap<i64, Bucket>) -> Option<u64> {
    let mut newest = buckets.iter().rev();
    let (latest_ts, latest) = newest.next()?;
    match newest.next() {
        Some((prev_ts, prev)) => {
            let elapsed = (latest_ts - prev_ts) as f64;
            if elapsed > 0.0 && latest.count > prev.count {
                Some(((latest.count - prev.count) as f64 / elapsed).ceil() as u64)
            } else {
                None
            }
        }
        None => Some((latest.count as f64 / BUCKET_SECS).ceil() as u64),
    }
}

fn error_rate(calls_series: &[MetricSeries]) -> Option<f64> {
    let mut total = 0.0;
    let mut errors = 0.0;
    for series in calls_series {
        let is_error = STATUS_KEYS
            .iter()
            .find_map(|key| series.attributes.get(*key))
            .map(is_error_status)
            .unwrap_or(false);

        let sum: f64 = series.datapoints.iter().filter_map(|p| p.value).sum();
        total += sum;
        if is_error {
            errors += sum;
        }
    }

    if total > 0.0 {
        Some(round2(errors / total * 100.0))
    } else {
        None
    }
}

/// Element-wise sum of bucket counts over histograms shaped like the first
fn sum_buckets(histograms: &[&HistogramData]) -> Option<(Vec<f64>, Vec<u64>)> {
    let bounds = histograms.first()?.explicit_bounds.clone();
    if bounds.is_empty() {
        return None;
    }

    let width = bounds.len() + 1;
    let mut counts = vec![0u64; width];
    for hist in histograms {
        if hist.bucket_counts.len() != width {
            continue;
        }
        for (total, count) in counts.iter_mut().zip(&hist.bucket_counts) {
            *total += count;
        }
    }
    Some((bounds, counts))
}

/// Midpoint of the bucket where the cumulative fraction first reaches
/// `target`. The overflow bucket reports the last finite bound.
fn percentile(bounds: &[f64], counts: &[u64], target: f64) -> Option<f64> {
    let total: u64 = counts.iter().sum();
    if total == 0 {
        return None;
    }

    let mut cumulative = 0;
    let mut prev_bound = 0.0;
    for (i, count) in counts.iter().enumerate() {
        cumulative += count;
        let bound = bounds.get(i).copied();
        if cumulative as f64 / total as f64 >= target {
            return Some(match bound {
                Some(bound) => round2((prev_bound + bound) / 2.0),
                None => round2(prev_bound),
            });
        }
        if let Some(bound) = bound {
            prev_bound = bound;
        }
    }
    None
}

impl Storage {
    pub async fn try_red_metrics(&self, service: &str) -> Result<RedMetrics, StorageError> {
        self.try_red_metrics_at(service, now_secs()).await
    }

    /// RED metrics for `service` over the window ending at `now`
    pub async fn try_red_metrics_at(&self, service: &str, now: f64) -> Result<RedMetrics, StorageError> {
        let names = self.try_metric_names(None).await?;
        if !names.iter().any(|n| n == DURATION_METRIC) {
            return Ok(RedMetrics::default());
        }

        let mut resource = AttrFilter::new();
        resource.insert("service.name".to_string(), service.to_string());
        let no_labels = AttrFilter::new();
        let start = Some(now - RED_WINDOW_SECS);
        let end = Some(now);

        let duration = self
            .try_metric_series(DURATION_METRIC, &resource, &no_labels, start, end)
            .await?;
        if duration.is_empty() {
            return Ok(RedMetrics::default());
        }

        let calls = if names.iter().any(|n| n == CALLS_METRIC) {
            self.try_metric_series(CALLS_METRIC, &resource, &no_labels, start, end)
                .await?
        } else {
            Vec::new()
        };

        Ok(compute_red(&duration, &calls))
    }

    pub async fn red_metrics(&self, service: &str) -> RedMetrics {
        or_default("red_metrics", self.try_red_metrics(service).await)
    }

    pub async fn red_metrics_at(&self, service: &str, now: f64) -> RedMetrics {
        or_default("red_metrics", self.try_red_metrics_at(service, now).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otel::{AttrMap, MetricDatapoint, MetricType};
    use crate::query::metrics::SeriesPoint;

    fn hist_point(ts: f64, count: u64, bounds: &[f64], counts: &[u64]) -> SeriesPoint {
        SeriesPoint {
            timestamp: ts,
            histogram: Some(HistogramData {
                count,
                sum: 0.0,
                bucket_counts: counts.to_vec(),
                explicit_bounds: bounds.to_vec(),
            }),
            ..Default::default()
        }
    }

    fn series(points: Vec<SeriesPoint>) -> MetricSeries {
        MetricSeries {
            datapoints: points,
            ..Default::default()
        }
    }

    fn call_series(status: Option<AttrValue>, values: &[f64]) -> MetricSeries {
        let mut attributes = AttrMap::new();
        if let Some(status) = status {
            attributes.insert("status.code".to_string(), status);
        }
        MetricSeries {
            attributes,
            datapoints: values
                .iter()
                .map(|v| SeriesPoint {
                    value: Some(*v),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_rate_from_bucket_delta() {
        let duration = vec![series(vec![
            hist_point(1000.0, 100, &[10.0], &[100, 0]),
            hist_point(1015.0, 150, &[10.0], &[150, 0]),
        ])];
        assert_eq!(compute_red(&duration, &[]).rate, Some(4));
    }

    #[test]
    fn test_rate_single_bucket() {
        let duration = vec![series(vec![hist_point(1000.0, 31, &[10.0], &[31, 0])])];
        assert_eq!(compute_red(&duration, &[]).rate, Some(3));
    }

    #[test]
    fn test_rate_absent_when_counter_resets() {
        let duration = vec![series(vec![
            hist_point(1000.0, 150, &[10.0], &[150, 0]),
            hist_point(1015.0, 20, &[10.0], &[20, 0]),
        ])];
        assert_eq!(compute_red(&duration, &[]).rate, None);
    }

    #[test]
    fn test_percentiles() {
        let duration = vec![series(vec![hist_point(
            1000.0,
            20,
            &[10.0, 50.0, 100.0],
            &[5, 10, 3, 2],
        )])];
        let red = compute_red(&duration, &[]);
        assert_eq!(red.duration_p50, Some(30.0));
        assert_eq!(red.duration_p95, Some(100.0));
        assert_eq!(red.duration_p99, Some(100.0));
    }

    #[test]
    fn test_percentiles_skip_mismatched_shapes() {
        let duration = vec![
            series(vec![hist_point(1000.0, 4, &[10.0, 50.0], &[4, 0, 0])]),
            series(vec![hist_point(1001.0, 9, &[10.0], &[0, 9])]),
        ];
        let red = compute_red(&duration, &[]);
        assert_eq!(red.duration_p50, Some(5.0));
        assert_eq!(red.duration_p99, Some(5.0));
    }

    #[test]
    fn test_error_rate() {
        let calls = vec![
            call_series(Some(AttrValue::from("STATUS_CODE_ERROR")), &[5.0]),
            call_series(Some(AttrValue::Int(503)), &[5.0]),
            call_series(Some(AttrValue::from("STATUS_CODE_OK")), &[80.0]),
            call_series(None, &[10.0]),
        ];
        let red = compute_red(&[], &calls);
        assert_eq!(red.error_rate, Some(10.0));
        assert_eq!(red.rate, None);
        assert_eq!(compute_red(&[], &[]).error_rate, None);
    }

    fn duration_datapoint(service: &str, ts: f64, count: u64, counts: &[u64]) -> MetricDatapoint {
        let mut resource = AttrMap::new();
        resource.insert("service.name".to_string(), AttrValue::from(service));
        MetricDatapoint {
            name: DURATION_METRIC.to_string(),
            metric_type: MetricType::Histogram,
            resource,
            timestamp: ts,
            histogram: Some(HistogramData {
                count,
                sum: 0.0,
                bucket_counts: counts.to_vec(),
                explicit_bounds: vec![10.0, 50.0, 100.0],
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_red_metrics_from_storage() {
        let storage = Storage::in_memory();
        let now = 10_000.0;
        assert_eq!(storage.red_metrics_at("checkout", now).await, RedMetrics::default());

        storage
            .store_metric_datapoints(&[
                duration_datapoint("checkout", now - 20.0, 100, &[50, 30, 10, 10]),
                duration_datapoint("checkout", now - 5.0, 150, &[75, 45, 15, 15]),
                duration_datapoint("other", now - 5.0, 9000, &[9000, 0, 0, 0]),
            ])
            .await;
        // names are cached; start from a fresh read
        storage.metric_names_cache.invalidate_all();

        let red = storage.red_metrics_at("checkout", now).await;
        assert_eq!(red.rate, Some(4));
        assert_eq!(red.duration_p50, Some(5.0));
        assert_eq!(red.error_rate, None);
        assert_eq!(storage.red_metrics_at("missing", now).await, RedMetrics::default());
    }

    #[tokio::test]
    async fn test_red_metrics_from_otlp_histogram() {
        use crate::otel::MetricsPayload;

        let storage = Storage::in_memory();
        let now = 10_000.0;
        let payload = MetricsPayload::from_json(serde_json::json!({
            "resourceMetrics": [{
                "resource": {"attributes": [
                    {"key": "service.name", "value": {"stringValue": "checkout"}}
                ]},
                "scopeMetrics": [{"metrics": [{
                    "name": DURATION_METRIC,
                    "unit": "ms",
                    "histogram": {
                        "aggregationTemporality": 2,
                        "dataPoints": [
                            {
                                "timeUnixNano": "9980000000000",
                                "count": "100",
                                "bucketCounts": ["50", "30", "10", "10"],
                                "explicitBounds": ["10", "50", 100]
                            },
                            {
                                "timeUnixNano": "9995000000000",
                                "count": "150",
                                "bucketCounts": ["75", "45", "15", "15"],
                                "explicitBounds": [10, "50", "100"]
                            }
                        ]
                    }
                }]}]
            }]
        }))
        .unwrap();
        assert_eq!(storage.store_metrics(payload).await, 2);

        let red = storage.red_metrics_at("checkout", now).await;
        assert_eq!(red.rate, Some(4));
        assert_eq!(red.duration_p50, Some(5.0));
        assert_eq!(red.duration_p99, Some(100.0));
    }
}
