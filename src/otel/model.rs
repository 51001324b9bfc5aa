//! Canonical telemetry records
//!
//! These are the flat shapes produced by normalization and persisted by the
//! storage codec. Spans keep OTLP camelCase field names, logs keep snake_case,
//! matching what query consumers expect for each signal.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::numeric::{de_f64, de_opt_f64, de_u64, de_vec_f64, de_vec_u64, Numeric};

/// Attribute mapping, key-sorted so equal sets serialize identically
pub type AttrMap = BTreeMap<String, AttrValue>;

/// Typed attribute value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Array(Vec<AttrValue>),
    Map(BTreeMap<String, AttrValue>),
}

/// OTLP AnyValue field names, in the order they are probed
const ANY_VALUE_FIELDS: &[&str] = &["stringValue", "intValue", "boolValue", "doubleValue"];

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Integer view, accepting integral doubles and decimal strings
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(i) => Some(*i),
            AttrValue::Double(d) => Numeric::Float(*d).as_i64(),
            AttrValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Exact match against a textual filter value
    pub fn matches_text(&self, expected: &str) -> bool {
        match self {
            AttrValue::String(s) => s == expected,
            other => other.to_string() == expected,
        }
    }

    /// Unwraps a raw OTLP `{"stringValue": ...}` object written by producers
    /// that stored attribute lists without converting them.
    fn unwrap_any_value(&self) -> &AttrValue {
        if let AttrValue::Map(fields) = self {
            for name in ANY_VALUE_FIELDS {
                if let Some(inner) = fields.get(*name) {
                    return inner;
                }
            }
        }
        self
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Null => Ok(()),
            AttrValue::Bool(b) => write!(f, "{}", b),
            AttrValue::Int(i) => write!(f, "{}", i),
            AttrValue::Double(d) => write!(f, "{}", d),
            AttrValue::String(s) => f.write_str(s),
            other => f.write_str(&serde_json::to_string(other).unwrap_or_default()),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::String(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::String(s)
    }
}

impl From<i64> for AttrValue {
    fn from(i: i64) -> Self {
        AttrValue::Int(i)
    }
}

/// One ordered attribute pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    #[serde(default)]
    pub value: AttrValue,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Span attributes, either as the ordered OTLP pair list or a flat mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Attributes {
    List(Vec<KeyValue>),
    Map(AttrMap),
}

impl Default for Attributes {
    fn default() -> Self {
        Attributes::List(Vec::new())
    }
}

impl Attributes {
    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        let found = match self {
            Attributes::List(pairs) => pairs.iter().find(|kv| kv.key == key).map(|kv| &kv.value),
            Attributes::Map(map) => map.get(key),
        };
        found.map(AttrValue::unwrap_any_value)
    }

    /// First value present among `keys`, probed in order
    pub fn first_of(&self, keys: &[&str]) -> Option<&AttrValue> {
        keys.iter().find_map(|key| self.get(key))
    }

    pub fn len(&self) -> usize {
        match self {
            Attributes::List(pairs) => pairs.len(),
            Attributes::Map(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Span kind from OTel spec, persisted as its ordinal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", from = "Numeric")]
pub enum SpanKind {
    #[default]
    Unspecified,
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Unspecified => "UNSPECIFIED",
            SpanKind::Internal => "INTERNAL",
            SpanKind::Server => "SERVER",
            SpanKind::Client => "CLIENT",
            SpanKind::Producer => "PRODUCER",
            SpanKind::Consumer => "CONSUMER",
        }
    }

    pub fn from_i32(v: i32) -> Self {
        match v {
            1 => SpanKind::Internal,
            2 => SpanKind::Server,
            3 => SpanKind::Client,
            4 => SpanKind::Producer,
            5 => SpanKind::Consumer,
            _ => SpanKind::Unspecified,
        }
    }

    /// Accepts `SPAN_KIND_SERVER` as well as the bare `SERVER`
    pub fn from_name(name: &str) -> Self {
        match name.trim_start_matches("SPAN_KIND_") {
            "INTERNAL" => SpanKind::Internal,
            "SERVER" => SpanKind::Server,
            "CLIENT" => SpanKind::Client,
            "PRODUCER" => SpanKind::Producer,
            "CONSUMER" => SpanKind::Consumer,
            _ => SpanKind::Unspecified,
        }
    }
}

impl From<SpanKind> for i32 {
    fn from(kind: SpanKind) -> i32 {
        match kind {
            SpanKind::Unspecified => 0,
            SpanKind::Internal => 1,
            SpanKind::Server => 2,
            SpanKind::Client => 3,
            SpanKind::Producer => 4,
            SpanKind::Consumer => 5,
        }
    }
}

impl From<Numeric> for SpanKind {
    fn from(n: Numeric) -> Self {
        match n.as_text() {
            Some(name) if n.as_i64().is_none() => SpanKind::from_name(name),
            _ => SpanKind::from_i32(n.as_i64().unwrap_or(0) as i32),
        }
    }
}

/// Span status code from OTel spec, persisted as its ordinal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", from = "Numeric")]
pub enum StatusCode {
    #[default]
    Unset,
    Ok,
    Error,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Unset => "UNSET",
            StatusCode::Ok => "OK",
            StatusCode::Error => "ERROR",
        }
    }

    pub fn from_i32(v: i32) -> Self {
        match v {
            1 => StatusCode::Ok,
            2 => StatusCode::Error,
            _ => StatusCode::Unset,
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name.trim_start_matches("STATUS_CODE_") {
            "OK" => StatusCode::Ok,
            "ERROR" => StatusCode::Error,
            _ => StatusCode::Unset,
        }
    }
}

impl From<StatusCode> for i32 {
    fn from(code: StatusCode) -> i32 {
        match code {
            StatusCode::Unset => 0,
            StatusCode::Ok => 1,
            StatusCode::Error => 2,
        }
    }
}

impl From<Numeric> for StatusCode {
    fn from(n: Numeric) -> Self {
        match n.as_text() {
            Some(name) if n.as_i64().is_none() => StatusCode::from_name(name),
            _ => StatusCode::from_i32(n.as_i64().unwrap_or(0) as i32),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanStatus {
    pub code: StatusCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Instrumentation scope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scope {
    pub name: String,
    pub version: String,
}

/// A flattened span ready for storage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Span {
    /// 32 hex character trace ID
    pub trace_id: String,
    /// 16 hex character span ID
    pub span_id: String,
    /// Parent span ID (empty string if root)
    pub parent_span_id: String,
    pub name: String,
    pub kind: SpanKind,
    #[serde(deserialize_with = "de_u64")]
    pub start_time_unix_nano: u64,
    #[serde(deserialize_with = "de_u64")]
    pub end_time_unix_nano: u64,
    pub attributes: Attributes,
    pub status: SpanStatus,
    /// `service.name` resource attribute, `unknown` when absent
    pub service_name: String,
    pub resource: AttrMap,
    pub scope: Scope,
}

impl Span {
    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_empty()
    }

    pub fn duration_ns(&self) -> u64 {
        self.end_time_unix_nano
            .saturating_sub(self.start_time_unix_nano)
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration_ns() as f64 / 1_000_000.0
    }
}

/// A flattened log record ready for storage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogEntry {
    /// Generated on write when absent
    pub log_id: String,
    /// Event time in seconds since epoch
    #[serde(deserialize_with = "de_f64")]
    pub timestamp: f64,
    pub severity: String,
    pub message: String,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub service_name: String,
    pub attributes: AttrMap,
    pub resource: AttrMap,
    pub scope: Scope,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Gauge,
    Sum,
    Histogram,
    Summary,
    #[default]
    #[serde(other)]
    Unknown,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Gauge => "gauge",
            MetricType::Sum => "sum",
            MetricType::Histogram => "histogram",
            MetricType::Summary => "summary",
            MetricType::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistogramData {
    #[serde(deserialize_with = "de_u64")]
    pub count: u64,
    #[serde(deserialize_with = "de_f64")]
    pub sum: f64,
    #[serde(deserialize_with = "de_vec_u64")]
    pub bucket_counts: Vec<u64>,
    #[serde(deserialize_with = "de_vec_f64")]
    pub explicit_bounds: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantileValue {
    #[serde(deserialize_with = "de_f64")]
    pub quantile: f64,
    #[serde(deserialize_with = "de_f64")]
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SummaryData {
    #[serde(deserialize_with = "de_u64")]
    pub count: u64,
    #[serde(deserialize_with = "de_f64")]
    pub sum: f64,
    pub quantile_values: Vec<QuantileValue>,
}

/// Sampled raw measurement linking a metric point to a trace
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Exemplar {
    #[serde(deserialize_with = "de_f64")]
    pub timestamp: f64,
    #[serde(deserialize_with = "de_opt_f64")]
    pub value: Option<f64>,
    pub trace_id: String,
    pub span_id: String,
    pub filtered_attributes: AttrMap,
}

/// One normalized metric datapoint with its metric-level context
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricDatapoint {
    pub name: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    pub unit: String,
    pub description: String,
    pub temporality: Option<String>,
    pub resource: AttrMap,
    pub attributes: AttrMap,
    /// Seconds since epoch
    #[serde(deserialize_with = "de_f64")]
    pub timestamp: f64,
    #[serde(deserialize_with = "de_opt_f64")]
    pub value: Option<f64>,
    pub histogram: Option<HistogramData>,
    pub summary: Option<SummaryData>,
    pub exemplars: Vec<Exemplar>,
}

/// Series member as persisted: the datapoint without metric-level metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredDatapoint {
    pub resource: AttrMap,
    pub attributes: AttrMap,
    #[serde(deserialize_with = "de_opt_f64")]
    pub value: Option<f64>,
    #[serde(deserialize_with = "de_f64")]
    pub timestamp: f64,
    pub histogram: Option<HistogramData>,
    pub summary: Option<SummaryData>,
}

impl From<&MetricDatapoint> for StoredDatapoint {
    fn from(dp: &MetricDatapoint) -> Self {
        Self {
            resource: dp.resource.clone(),
            attributes: dp.attributes.clone(),
            value: dp.value,
            timestamp: dp.timestamp,
            histogram: dp.histogram.clone(),
            summary: dp.summary.clone(),
        }
    }
}

/// Per-name metric metadata, last write wins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricMetadata {
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "not_applicable")]
    pub temporality: String,
}

fn not_applicable() -> String {
    "N/A".to_string()
}

impl Default for MetricMetadata {
    fn default() -> Self {
        Self {
            metric_type: MetricType::Unknown,
            unit: String::new(),
            description: String::new(),
            temporality: not_applicable(),
        }
    }
}

impl From<&MetricDatapoint> for MetricMetadata {
    fn from(dp: &MetricDatapoint) -> Self {
        Self {
            metric_type: dp.metric_type,
            unit: dp.unit.clone(),
            description: dp.description.clone(),
            temporality: dp.temporality.clone().unwrap_or_else(not_applicable),
        }
    }
}

/// Free-form metric from producers that predate OTLP
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacyMetric {
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub timestamp: Option<f64>,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_kind_from_i32() {
        assert_eq!(SpanKind::from_i32(0), SpanKind::Unspecified);
        assert_eq!(SpanKind::from_i32(1), SpanKind::Internal);
        assert_eq!(SpanKind::from_i32(2), SpanKind::Server);
        assert_eq!(SpanKind::from_i32(3), SpanKind::Client);
    }

    #[test]
    fn test_span_kind_accepts_names() {
        let kind: SpanKind = serde_json::from_str(r#""SPAN_KIND_CLIENT""#).unwrap();
        assert_eq!(kind, SpanKind::Client);
        let kind: SpanKind = serde_json::from_str("2").unwrap();
        assert_eq!(kind, SpanKind::Server);
        assert_eq!(serde_json::to_string(&SpanKind::Server).unwrap(), "2");
    }

    #[test]
    fn test_status_code_accepts_names() {
        let code: StatusCode = serde_json::from_str(r#""STATUS_CODE_ERROR""#).unwrap();
        assert_eq!(code, StatusCode::Error);
        assert_eq!(StatusCode::from_i32(1), StatusCode::Ok);
    }

    #[test]
    fn test_attributes_list_and_map_lookup() {
        let list = Attributes::List(vec![
            KeyValue::new("http.request.method", "GET"),
            KeyValue::new("http.method", "POST"),
        ]);
        // alias order wins over attribute order
        assert_eq!(
            list.first_of(&["http.method", "http.request.method"]),
            Some(&AttrValue::from("POST"))
        );

        let mut map = AttrMap::new();
        map.insert("url.path".to_string(), AttrValue::from("/users"));
        let map = Attributes::Map(map);
        assert_eq!(
            map.first_of(&["http.route", "http.target", "url.path"]),
            Some(&AttrValue::from("/users"))
        );
        assert!(map.first_of(&["http.url"]).is_none());
    }

    #[test]
    fn test_raw_otlp_attribute_values_unwrap() {
        let json = r#"[{"key": "db.system", "value": {"stringValue": "postgresql"}}]"#;
        let attrs: Attributes = serde_json::from_str(json).unwrap();
        assert_eq!(attrs.get("db.system").and_then(|v| v.as_str()), Some("postgresql"));
    }

    #[test]
    fn test_attr_value_text_match() {
        assert!(AttrValue::Int(200).matches_text("200"));
        assert!(AttrValue::from("checkout").matches_text("checkout"));
        assert!(!AttrValue::Bool(true).matches_text("1"));
        assert_eq!(AttrValue::from("503").as_i64(), Some(503));
    }

    #[test]
    fn test_span_duration() {
        let span = Span {
            start_time_unix_nano: 1_000_000_000,
            end_time_unix_nano: 1_050_000_000,
            ..Default::default()
        };
        assert_eq!(span.duration_ms(), 50.0);
        assert!(span.is_root());

        let inverted = Span {
            start_time_unix_nano: 10,
            end_time_unix_nano: 5,
            ..Default::default()
        };
        assert_eq!(inverted.duration_ns(), 0);
    }

    #[test]
    fn test_span_reads_string_timestamps() {
        let json = r#"{"traceId": "ab", "spanId": "cd", "startTimeUnixNano": "1544712660000000000"}"#;
        let span: Span = serde_json::from_str(json).unwrap();
        assert_eq!(span.start_time_unix_nano, 1_544_712_660_000_000_000);
        assert_eq!(span.service_name, "");
    }

    #[test]
    fn test_metric_type_unknown_fallback() {
        let t: MetricType = serde_json::from_str(r#""exponential_histogram""#).unwrap();
        assert_eq!(t, MetricType::Unknown);
        assert_eq!(MetricMetadata::default().temporality, "N/A");
    }
}
