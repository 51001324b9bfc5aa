//! OTLP/JSON request shapes
//!
//! Every struct here is lenient: unknown fields are ignored, missing fields
//! take their defaults, and top-level collections also accept snake_case
//! names as emitted by protobuf-to-dict converters.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::model::{AttrValue, LegacyMetric, QuantileValue, SpanKind, StatusCode};
use super::numeric::{de_f64, de_opt_f64, de_u64, de_vec_f64, de_vec_u64, Numeric};

// ============================================================================
// Common
// ============================================================================

/// Reads an explicit `null` as the field's default, the same as a missing field
fn null_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnyValue {
    pub string_value: Option<String>,
    pub bool_value: Option<bool>,
    pub int_value: Option<Numeric>,
    pub double_value: Option<Numeric>,
    pub bytes_value: Option<String>,
    pub array_value: Option<ArrayValue>,
    pub kvlist_value: Option<KeyValueList>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ArrayValue {
    pub values: Vec<AnyValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KeyValueList {
    pub values: Vec<WireKeyValue>,
}

impl AnyValue {
    pub fn into_attr_value(self) -> AttrValue {
        if let Some(s) = self.string_value {
            AttrValue::String(s)
        } else if let Some(i) = self.int_value {
            AttrValue::Int(i.as_i64().unwrap_or(0))
        } else if let Some(d) = self.double_value {
            AttrValue::Double(d.as_f64().unwrap_or(0.0))
        } else if let Some(b) = self.bool_value {
            AttrValue::Bool(b)
        } else if let Some(bytes) = self.bytes_value {
            AttrValue::String(bytes)
        } else if let Some(array) = self.array_value {
            AttrValue::Array(
                array
                    .values
                    .into_iter()
                    .map(AnyValue::into_attr_value)
                    .collect(),
            )
        } else if let Some(kvlist) = self.kvlist_value {
            AttrValue::Map(
                kvlist
                    .values
                    .into_iter()
                    .map(|kv| (kv.key, kv.value.into_attr_value()))
                    .collect(),
            )
        } else {
            AttrValue::Null
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WireKeyValue {
    #[serde(deserialize_with = "null_default")]
    pub key: String,
    #[serde(deserialize_with = "null_default")]
    pub value: AnyValue,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Resource {
    pub attributes: Vec<WireKeyValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InstrumentationScope {
    #[serde(deserialize_with = "null_default")]
    pub name: String,
    #[serde(deserialize_with = "null_default")]
    pub version: String,
}

// ============================================================================
// Traces
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportTraceRequest {
    #[serde(alias = "resource_spans")]
    pub resource_spans: Vec<ResourceSpans>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceSpans {
    pub resource: Option<Resource>,
    #[serde(alias = "scope_spans")]
    pub scope_spans: Vec<ScopeSpans>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScopeSpans {
    pub scope: Option<InstrumentationScope>,
    pub spans: Vec<WireSpan>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireSpan {
    #[serde(deserialize_with = "null_default")]
    pub trace_id: String,
    #[serde(deserialize_with = "null_default")]
    pub span_id: String,
    #[serde(deserialize_with = "null_default")]
    pub parent_span_id: String,
    #[serde(deserialize_with = "null_default")]
    pub name: String,
    #[serde(deserialize_with = "null_default")]
    pub kind: SpanKind,
    #[serde(deserialize_with = "de_u64")]
    pub start_time_unix_nano: u64,
    #[serde(deserialize_with = "de_u64")]
    pub end_time_unix_nano: u64,
    #[serde(deserialize_with = "null_default")]
    pub attributes: Vec<WireKeyValue>,
    #[serde(deserialize_with = "null_default")]
    pub status: WireStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WireStatus {
    #[serde(deserialize_with = "null_default")]
    pub code: StatusCode,
    pub message: Option<String>,
}

// ============================================================================
// Logs
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportLogsRequest {
    #[serde(alias = "resource_logs")]
    pub resource_logs: Vec<ResourceLogs>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceLogs {
    pub resource: Option<Resource>,
    #[serde(alias = "scope_logs")]
    pub scope_logs: Vec<ScopeLogs>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScopeLogs {
    pub scope: Option<InstrumentationScope>,
    #[serde(alias = "log_records")]
    pub log_records: Vec<WireLogRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireLogRecord {
    #[serde(deserialize_with = "de_u64")]
    pub time_unix_nano: u64,
    #[serde(deserialize_with = "de_u64")]
    pub observed_time_unix_nano: u64,
    pub severity_text: Option<String>,
    pub severity_number: Option<Numeric>,
    /// Usually an AnyValue object, but plain strings are tolerated
    pub body: Option<Value>,
    #[serde(deserialize_with = "null_default")]
    pub trace_id: String,
    #[serde(deserialize_with = "null_default")]
    pub span_id: String,
    #[serde(deserialize_with = "null_default")]
    pub attributes: Vec<WireKeyValue>,
}

// ============================================================================
// Metrics
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportMetricsRequest {
    #[serde(alias = "resource_metrics")]
    pub resource_metrics: Vec<ResourceMetrics>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceMetrics {
    pub resource: Option<Resource>,
    #[serde(alias = "scope_metrics")]
    pub scope_metrics: Vec<ScopeMetrics>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScopeMetrics {
    pub scope: Option<InstrumentationScope>,
    pub metrics: Vec<WireMetric>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireMetric {
    pub name: Option<String>,
    #[serde(deserialize_with = "null_default")]
    pub unit: String,
    #[serde(deserialize_with = "null_default")]
    pub description: String,
    pub gauge: Option<Gauge>,
    pub sum: Option<Sum>,
    pub histogram: Option<Histogram>,
    pub summary: Option<Summary>,
    pub exponential_histogram: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Gauge {
    pub data_points: Vec<NumberDataPoint>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Sum {
    pub data_points: Vec<NumberDataPoint>,
    pub aggregation_temporality: Option<Numeric>,
    pub is_monotonic: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Histogram {
    pub data_points: Vec<HistogramDataPoint>,
    pub aggregation_temporality: Option<Numeric>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Summary {
    pub data_points: Vec<SummaryDataPoint>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NumberDataPoint {
    pub attributes: Vec<WireKeyValue>,
    #[serde(deserialize_with = "de_u64")]
    pub time_unix_nano: u64,
    pub as_int: Option<Numeric>,
    pub as_double: Option<Numeric>,
    pub exemplars: Vec<WireExemplar>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistogramDataPoint {
    pub attributes: Vec<WireKeyValue>,
    #[serde(deserialize_with = "de_u64")]
    pub time_unix_nano: u64,
    #[serde(deserialize_with = "de_u64")]
    pub count: u64,
    #[serde(deserialize_with = "de_opt_f64")]
    pub sum: Option<f64>,
    #[serde(deserialize_with = "de_vec_u64")]
    pub bucket_counts: Vec<u64>,
    #[serde(deserialize_with = "de_vec_f64")]
    pub explicit_bounds: Vec<f64>,
    pub exemplars: Vec<WireExemplar>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SummaryDataPoint {
    pub attributes: Vec<WireKeyValue>,
    #[serde(deserialize_with = "de_u64")]
    pub time_unix_nano: u64,
    #[serde(deserialize_with = "de_u64")]
    pub count: u64,
    #[serde(deserialize_with = "de_f64")]
    pub sum: f64,
    pub quantile_values: Vec<QuantileValue>,
    pub exemplars: Vec<WireExemplar>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireExemplar {
    #[serde(deserialize_with = "de_u64")]
    pub time_unix_nano: u64,
    pub as_int: Option<Numeric>,
    pub as_double: Option<Numeric>,
    pub trace_id: Option<RawId>,
    pub span_id: Option<RawId>,
    pub filtered_attributes: Vec<WireKeyValue>,
}

/// Identifier as raw bytes or as a hex/base64 string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Text(String),
    Bytes(Vec<u8>),
}

/// Scalar value of a number datapoint or exemplar, integer form first
pub fn number_value(as_int: &Option<Numeric>, as_double: &Option<Numeric>) -> Option<f64> {
    as_int
        .as_ref()
        .and_then(Numeric::as_f64)
        .or_else(|| as_double.as_ref().and_then(Numeric::as_f64))
}

// ============================================================================
// Metrics payload detection
// ============================================================================

/// Body accepted by the metrics writer
#[derive(Debug, Clone)]
pub enum MetricsPayload {
    Otlp(ExportMetricsRequest),
    Legacy(Vec<LegacyMetric>),
}

impl MetricsPayload {
    /// An object carrying `resourceMetrics` is OTLP, an array is a legacy
    /// batch, and any other object is a single legacy metric.
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        match value {
            Value::Object(ref map)
                if map.contains_key("resourceMetrics") || map.contains_key("resource_metrics") =>
            {
                Ok(MetricsPayload::Otlp(serde_json::from_value(value)?))
            }
            Value::Array(_) => Ok(MetricsPayload::Legacy(serde_json::from_value(value)?)),
            other => Ok(MetricsPayload::Legacy(vec![serde_json::from_value(other)?])),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            MetricsPayload::Otlp(req) => req.resource_metrics.is_empty(),
            MetricsPayload::Legacy(metrics) => metrics.is_empty(),
        }
    }
}
