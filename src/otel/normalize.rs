//! Flattening of OTLP resource/scope/record trees into canonical records
//!
//! All functions are pure. Records missing their identity (span: trace and
//! span ID, metric: name) are skipped so the rest of the batch still lands.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::model::{
    AttrMap, Attributes, Exemplar, HistogramData, KeyValue, LogEntry, MetricDatapoint,
    MetricType, Scope, Span, SpanStatus, SummaryData,
};
use super::numeric::Numeric;
use super::wire::{
    number_value, AnyValue, ExportLogsRequest, ExportMetricsRequest, ExportTraceRequest,
    InstrumentationScope, RawId, Resource, WireExemplar, WireKeyValue,
};

pub const TRACE_ID_BYTES: usize = 16;
pub const SPAN_ID_BYTES: usize = 8;

const UNKNOWN_SERVICE: &str = "unknown";
const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Current wall-clock time in fractional seconds
pub fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Decodes an OTLP identifier to lowercase hex.
///
/// OTLP/HTTP JSON sends hex, protobuf-to-JSON converters send base64. A
/// string of exactly `byte_len * 2` hex digits is taken as hex; anything
/// else is tried as base64. Returns `None` for empty or undecodable input.
pub fn decode_id(raw: &str, byte_len: usize) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.len() == byte_len * 2 && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Some(raw.to_ascii_lowercase());
    }
    match STANDARD.decode(raw) {
        Ok(bytes) if !bytes.is_empty() => Some(hex::encode(bytes)),
        _ => None,
    }
}

pub fn attribute_map(pairs: Vec<WireKeyValue>) -> AttrMap {
    pairs
        .into_iter()
        .map(|kv| (kv.key, kv.value.into_attr_value()))
        .collect()
}

fn resource_attributes(resource: Option<Resource>) -> AttrMap {
    resource.map(|r| attribute_map(r.attributes)).unwrap_or_default()
}

fn service_name(resource: &AttrMap) -> String {
    resource
        .get("service.name")
        .map(|v| v.to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| UNKNOWN_SERVICE.to_string())
}

fn scope_of(scope: Option<InstrumentationScope>) -> Scope {
    scope
        .map(|s| Scope {
            name: s.name,
            version: s.version,
        })
        .unwrap_or_default()
}

fn nanos_to_secs(nanos: u64) -> f64 {
    nanos as f64 / NANOS_PER_SEC
}

// ============================================================================
// Traces
// ============================================================================

pub fn normalize_traces(request: ExportTraceRequest) -> Vec<Span> {
    let mut spans = Vec::new();

    for resource_spans in request.resource_spans {
        let resource = resource_attributes(resource_spans.resource);
        let service = service_name(&resource);

        for scope_spans in resource_spans.scope_spans {
            let scope = scope_of(scope_spans.scope);

            for span in scope_spans.spans {
                let (Some(trace_id), Some(span_id)) = (
                    decode_id(&span.trace_id, TRACE_ID_BYTES),
                    decode_id(&span.span_id, SPAN_ID_BYTES),
                ) else {
                    tracing::debug!(name = %span.name, "dropping span without trace or span id");
                    continue;
                };

                spans.push(Span {
                    trace_id,
                    span_id,
                    parent_span_id: decode_id(&span.parent_span_id, SPAN_ID_BYTES)
                        .unwrap_or_default(),
                    name: span.name,
                    kind: span.kind,
                    start_time_unix_nano: span.start_time_unix_nano,
                    end_time_unix_nano: span.end_time_unix_nano,
                    attributes: Attributes::List(
                        span.attributes
                            .into_iter()
                            .map(|kv| KeyValue {
                                key: kv.key,
                                value: kv.value.into_attr_value(),
                            })
                            .collect(),
                    ),
                    status: SpanStatus {
                        code: span.status.code,
                        message: span.status.message.filter(|m| !m.is_empty()),
                    },
                    service_name: service.clone(),
                    resource: resource.clone(),
                    scope: scope.clone(),
                });
            }
        }
    }

    spans
}

// ============================================================================
// Logs
// ============================================================================

pub fn normalize_logs(request: ExportLogsRequest) -> Vec<LogEntry> {
    normalize_logs_at(request, now_secs())
}

/// Same as [`normalize_logs`], with an explicit fallback clock
pub fn normalize_logs_at(request: ExportLogsRequest, now: f64) -> Vec<LogEntry> {
    let mut logs = Vec::new();

    for resource_logs in request.resource_logs {
        let resource = resource_attributes(resource_logs.resource);
        let service = service_name(&resource);

        for scope_logs in resource_logs.scope_logs {
            let scope = scope_of(scope_logs.scope);

            for record in scope_logs.log_records {
                let timestamp = [record.time_unix_nano, record.observed_time_unix_nano]
                    .into_iter()
                    .find(|ns| *ns > 0)
                    .map(nanos_to_secs)
                    .unwrap_or(now);

                logs.push(LogEntry {
                    log_id: String::new(),
                    timestamp,
                    severity: severity(record.severity_text, record.severity_number.as_ref()),
                    message: body_text(record.body),
                    trace_id: decode_id(&record.trace_id, TRACE_ID_BYTES),
                    span_id: decode_id(&record.span_id, SPAN_ID_BYTES),
                    service_name: service.clone(),
                    attributes: attribute_map(record.attributes),
                    resource: resource.clone(),
                    scope: scope.clone(),
                });
            }
        }
    }

    logs
}

fn severity(text: Option<String>, number: Option<&Numeric>) -> String {
    if let Some(text) = text.filter(|t| !t.is_empty()) {
        return text;
    }
    let level = match number.and_then(Numeric::as_i64).unwrap_or(0) {
        1..=4 => "TRACE",
        5..=8 => "DEBUG",
        13..=16 => "WARN",
        17..=20 => "ERROR",
        21..=24 => "FATAL",
        _ => "INFO",
    };
    level.to_string()
}

fn body_text(body: Option<serde_json::Value>) -> String {
    match body {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s,
        Some(value @ serde_json::Value::Object(_)) => serde_json::from_value::<AnyValue>(value)
            .map(|v| v.into_attr_value().to_string())
            .unwrap_or_default(),
        Some(other) => other.to_string(),
    }
}

// ============================================================================
// Metrics
// ============================================================================

pub fn normalize_metrics(request: ExportMetricsRequest) -> Vec<MetricDatapoint> {
    normalize_metrics_at(request, now_secs())
}

/// Same as [`normalize_metrics`], with an explicit fallback clock
pub fn normalize_metrics_at(request: ExportMetricsRequest, now: f64) -> Vec<MetricDatapoint> {
    let mut datapoints = Vec::new();

    for resource_metrics in request.resource_metrics {
        let resource = resource_attributes(resource_metrics.resource);

        for scope_metrics in resource_metrics.scope_metrics {
            for metric in scope_metrics.metrics {
                let Some(name) = metric.name.filter(|n| !n.is_empty()) else {
                    continue;
                };

                let base = MetricDatapoint {
                    name,
                    unit: metric.unit,
                    description: metric.description,
                    resource: resource.clone(),
                    ..Default::default()
                };
                let at = |nanos: u64| if nanos > 0 { nanos_to_secs(nanos) } else { now };

                if let Some(gauge) = metric.gauge {
                    for dp in gauge.data_points {
                        let timestamp = at(dp.time_unix_nano);
                        datapoints.push(MetricDatapoint {
                            metric_type: MetricType::Gauge,
                            attributes: attribute_map(dp.attributes),
                            timestamp,
                            value: number_value(&dp.as_int, &dp.as_double),
                            exemplars: exemplars(dp.exemplars, timestamp),
                            ..base.clone()
                        });
                    }
                } else if let Some(sum) = metric.sum {
                    let temporality = temporality_name(sum.aggregation_temporality.as_ref());
                    for dp in sum.data_points {
                        let timestamp = at(dp.time_unix_nano);
                        datapoints.push(MetricDatapoint {
                            metric_type: MetricType::Sum,
                            temporality: Some(temporality.clone()),
                            attributes: attribute_map(dp.attributes),
                            timestamp,
                            value: number_value(&dp.as_int, &dp.as_double),
                            exemplars: exemplars(dp.exemplars, timestamp),
                            ..base.clone()
                        });
                    }
                } else if let Some(histogram) = metric.histogram {
                    let temporality = temporality_name(histogram.aggregation_temporality.as_ref());
                    for dp in histogram.data_points {
                        let timestamp = at(dp.time_unix_nano);
                        let sum = dp.sum.unwrap_or(0.0);
                        datapoints.push(MetricDatapoint {
                            metric_type: MetricType::Histogram,
                            temporality: Some(temporality.clone()),
                            attributes: attribute_map(dp.attributes),
                            timestamp,
                            value: Some(sum),
                            histogram: Some(HistogramData {
                                count: dp.count,
                                sum,
                                bucket_counts: dp.bucket_counts,
                                explicit_bounds: dp.explicit_bounds,
                            }),
                            exemplars: exemplars(dp.exemplars, timestamp),
                            ..base.clone()
                        });
                    }
                } else if let Some(summary) = metric.summary {
                    for dp in summary.data_points {
                        let timestamp = at(dp.time_unix_nano);
                        datapoints.push(MetricDatapoint {
                            metric_type: MetricType::Summary,
                            attributes: attribute_map(dp.attributes),
                            timestamp,
                            value: Some(dp.sum),
                            summary: Some(SummaryData {
                                count: dp.count,
                                sum: dp.sum,
                                quantile_values: dp.quantile_values,
                            }),
                            exemplars: exemplars(dp.exemplars, timestamp),
                            ..base.clone()
                        });
                    }
                } else if metric.exponential_histogram.is_some() {
                    tracing::debug!(metric = %base.name, "exponential histograms are not stored");
                }
            }
        }
    }

    datapoints
}

/// OTLP enum name for an aggregation temporality given as ordinal or name;
/// cumulative when absent.
fn temporality_name(raw: Option<&Numeric>) -> String {
    let name = match raw {
        None => "AGGREGATION_TEMPORALITY_CUMULATIVE",
        Some(n) => match (n.as_i64(), n.as_text()) {
            (Some(1), _) => "AGGREGATION_TEMPORALITY_DELTA",
            (Some(2), _) => "AGGREGATION_TEMPORALITY_CUMULATIVE",
            (Some(_), _) => "AGGREGATION_TEMPORALITY_UNSPECIFIED",
            (None, Some(text)) => return text.to_string(),
            (None, None) => "AGGREGATION_TEMPORALITY_UNSPECIFIED",
        },
    };
    name.to_string()
}

fn exemplars(raw: Vec<WireExemplar>, fallback_ts: f64) -> Vec<Exemplar> {
    raw.into_iter()
        .map(|ex| Exemplar {
            timestamp: if ex.time_unix_nano > 0 {
                nanos_to_secs(ex.time_unix_nano)
            } else {
                fallback_ts
            },
            value: number_value(&ex.as_int, &ex.as_double),
            trace_id: raw_id_hex(ex.trace_id, TRACE_ID_BYTES),
            span_id: raw_id_hex(ex.span_id, SPAN_ID_BYTES),
            filtered_attributes: attribute_map(ex.filtered_attributes),
        })
        .collect()
}

fn raw_id_hex(raw: Option<RawId>, byte_len: usize) -> String {
    match raw {
        None => String::new(),
        Some(RawId::Bytes(bytes)) => hex::encode(bytes),
        Some(RawId::Text(text)) => decode_id(&text, byte_len).unwrap_or(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otel::model::{AttrValue, SpanKind, StatusCode};
    use serde_json::json;

    fn trace_request(spans: serde_json::Value) -> ExportTraceRequest {
        serde_json::from_value(json!({
            "resourceSpans": [{
                "resource": {"attributes": [
                    {"key": "service.name", "value": {"stringValue": "checkout"}}
                ]},
                "scopeSpans": [{
                    "scope": {"name": "io.opentelemetry.http", "version": "1.2"},
                    "spans": spans
                }]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_decode_id_base64_and_hex() {
        // 0x0102030405060708 as base64
        assert_eq!(
            decode_id("AQIDBAUGBwg=", SPAN_ID_BYTES),
            Some("0102030405060708".to_string())
        );
        assert_eq!(
            decode_id("5B8EFFF798038103D269B633813FC60C", TRACE_ID_BYTES),
            Some("5b8efff798038103d269b633813fc60c".to_string())
        );
        assert_eq!(decode_id("", SPAN_ID_BYTES), None);
        assert_eq!(decode_id("not base64!", SPAN_ID_BYTES), None);
    }

    #[test]
    fn test_normalize_traces() {
        let request = trace_request(json!([{
            "traceId": "5b8efff798038103d269b633813fc60c",
            "spanId": "eee19b7ec3c1b174",
            "parentSpanId": "",
            "name": "GET /cart",
            "kind": 2,
            "startTimeUnixNano": "1544712660000000000",
            "endTimeUnixNano": "1544712661000000000",
            "attributes": [{"key": "http.method", "value": {"stringValue": "GET"}}],
            "status": {"code": "STATUS_CODE_OK"}
        }]));

        let spans = normalize_traces(request);
        assert_eq!(spans.len(), 1);
        let span = &spans[0];
        assert_eq!(span.service_name, "checkout");
        assert_eq!(span.kind, SpanKind::Server);
        assert_eq!(span.status.code, StatusCode::Ok);
        assert!(span.is_root());
        assert_eq!(span.duration_ms(), 1000.0);
        assert_eq!(span.scope.version, "1.2");
        assert_eq!(span.attributes.get("http.method"), Some(&AttrValue::from("GET")));
    }

    #[test]
    fn test_spans_without_ids_are_dropped() {
        let request = trace_request(json!([
            {"traceId": "5b8efff798038103d269b633813fc60c", "spanId": "", "name": "no-span-id"},
            {"traceId": "", "spanId": "eee19b7ec3c1b174", "name": "no-trace-id"},
            {"traceId": "5b8efff798038103d269b633813fc60c", "spanId": "eee19b7ec3c1b174", "name": "ok"}
        ]));

        let spans = normalize_traces(request);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "ok");
        assert!(spans.iter().all(|s| !s.span_id.is_empty()));
    }

    #[test]
    fn test_missing_service_name_is_unknown() {
        let request: ExportTraceRequest = serde_json::from_value(json!({
            "resourceSpans": [{"scopeSpans": [{"spans": [
                {"traceId": "AAAAAAAAAAAAAAAAAAAAAQ==", "spanId": "AAAAAAAAAAE="}
            ]}]}]
        }))
        .unwrap();

        let spans = normalize_traces(request);
        assert_eq!(spans[0].service_name, "unknown");
        assert_eq!(spans[0].trace_id, "00000000000000000000000000000001");
    }

    #[test]
    fn test_normalize_logs() {
        let request: ExportLogsRequest = serde_json::from_value(json!({
            "resourceLogs": [{
                "resource": {"attributes": [
                    {"key": "service.name", "value": {"stringValue": "payments"}}
                ]},
                "scopeLogs": [{"logRecords": [
                    {
                        "timeUnixNano": "1700000000500000000",
                        "severityNumber": 17,
                        "body": {"stringValue": "card declined"},
                        "traceId": "5b8efff798038103d269b633813fc60c",
                        "attributes": [{"key": "retry", "value": {"intValue": "2"}}]
                    },
                    {"observedTimeUnixNano": "1700000001000000000", "body": "plain"},
                    {"severityText": "DEBUG"}
                ]}]
            }]
        }))
        .unwrap();

        let logs = normalize_logs_at(request, 42.0);
        assert_eq!(logs.len(), 3);

        assert_eq!(logs[0].severity, "ERROR");
        assert_eq!(logs[0].message, "card declined");
        assert_eq!(logs[0].timestamp, 1_700_000_000.5);
        assert_eq!(logs[0].service_name, "payments");
        assert_eq!(
            logs[0].trace_id.as_deref(),
            Some("5b8efff798038103d269b633813fc60c")
        );
        assert_eq!(logs[0].attributes["retry"], AttrValue::Int(2));

        assert_eq!(logs[1].timestamp, 1_700_000_001.0);
        assert_eq!(logs[1].message, "plain");
        assert_eq!(logs[1].severity, "INFO");
        assert!(logs[1].trace_id.is_none());

        assert_eq!(logs[2].timestamp, 42.0);
        assert_eq!(logs[2].severity, "DEBUG");
    }

    #[test]
    fn test_normalize_metrics_by_type() {
        let request: ExportMetricsRequest = serde_json::from_value(json!({
            "resourceMetrics": [{
                "resource": {"attributes": [
                    {"key": "service.name", "value": {"stringValue": "api"}}
                ]},
                "scopeMetrics": [{"metrics": [
                    {"name": "cpu", "gauge": {"dataPoints": [
                        {"timeUnixNano": "2000000000", "asDouble": 0.25}
                    ]}},
                    {"name": "requests", "unit": "1", "sum": {
                        "aggregationTemporality": 2,
                        "isMonotonic": true,
                        "dataPoints": [{"asInt": "12", "attributes": [
                            {"key": "route", "value": {"stringValue": "/"}}
                        ]}]
                    }},
                    {"name": "latency", "histogram": {"dataPoints": [{
                        "timeUnixNano": "3000000000",
                        "count": "20", "sum": 900.5,
                        "bucketCounts": ["5", "10", "3", "2"],
                        "explicitBounds": [10, 50, 100],
                        "exemplars": [{
                            "asDouble": 42.0,
                            "traceId": "5b8efff798038103d269b633813fc60c",
                            "spanId": "AQIDBAUGBwg="
                        }]
                    }]}},
                    {"name": "rpc", "summary": {"dataPoints": [{
                        "count": 4, "sum": "8",
                        "quantileValues": [{"quantile": 0.5, "value": "2"}]
                    }]}},
                    {"name": "", "gauge": {"dataPoints": [{"asInt": 1}]}},
                    {"gauge": {"dataPoints": [{"asInt": 1}]}},
                    {"name": "expo", "exponentialHistogram": {"dataPoints": [{}]}}
                ]}]
            }]
        }))
        .unwrap();

        let points = normalize_metrics_at(request, 99.0);
        let names: Vec<&str> = points.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["cpu", "requests", "latency", "rpc"]);

        let cpu = &points[0];
        assert_eq!(cpu.metric_type, MetricType::Gauge);
        assert_eq!(cpu.timestamp, 2.0);
        assert_eq!(cpu.value, Some(0.25));
        assert_eq!(cpu.temporality, None);

        let requests = &points[1];
        assert_eq!(requests.value, Some(12.0));
        assert_eq!(requests.timestamp, 99.0);
        assert_eq!(
            requests.temporality.as_deref(),
            Some("AGGREGATION_TEMPORALITY_CUMULATIVE")
        );
        assert_eq!(requests.attributes["route"], AttrValue::from("/"));

        let latency = &points[2];
        let histogram = latency.histogram.as_ref().unwrap();
        assert_eq!(histogram.count, 20);
        assert_eq!(histogram.bucket_counts, vec![5, 10, 3, 2]);
        assert_eq!(histogram.explicit_bounds, vec![10.0, 50.0, 100.0]);
        assert_eq!(latency.value, Some(900.5));
        assert_eq!(latency.exemplars.len(), 1);
        assert_eq!(latency.exemplars[0].timestamp, 3.0);
        assert_eq!(latency.exemplars[0].span_id, "0102030405060708");

        let rpc = &points[3];
        let summary = rpc.summary.as_ref().unwrap();
        assert_eq!(summary.sum, 8.0);
        assert_eq!(summary.quantile_values[0].value, 2.0);
        assert_eq!(rpc.resource["service.name"], AttrValue::from("api"));
    }
}
