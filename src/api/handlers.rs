use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::otel::{
    AttrMap, ExportLogsRequest, ExportTraceRequest, LegacyMetric, LogEntry, MetricMetadata,
    MetricsPayload, Span,
};
use crate::query::service_graph::DEFAULT_GRAPH_TRACES;
use crate::query::{
    AttrFilter, MetricSeries, ServiceGraph, ServiceInfo, SpanDetails, StorageStats, TraceSummary,
};
use crate::storage::{CardinalityStats, Storage};

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 1000;

const RESOURCE_PARAM_PREFIX: &str = "resource.";
const ATTRIBUTE_PARAM_PREFIX: &str = "attribute.";

/// Application state shared across handlers
pub struct AppState {
    pub storage: Arc<Storage>,
}

// ============================================================================
// Query parameters
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

impl ListParams {
    fn limit(&self, default: usize) -> usize {
        self.limit.unwrap_or(default).min(MAX_LIST_LIMIT)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LogParams {
    pub trace_id: Option<String>,
    pub limit: Option<usize>,
}

/// Free-form metric query string: `name`, `start`, `end`, plus
/// `resource.<key>=<value>` and `attribute.<key>=<value>` filters
#[derive(Debug, Default)]
pub struct MetricParams {
    pub name: Option<String>,
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub resource: AttrFilter,
    pub attributes: AttrFilter,
}

impl MetricParams {
    pub fn parse(params: HashMap<String, String>) -> Result<Self, ApiError> {
        let mut parsed = MetricParams::default();
        for (key, value) in params {
            if let Some(attr) = key.strip_prefix(RESOURCE_PARAM_PREFIX) {
                parsed.resource.insert(attr.to_string(), value);
            } else if let Some(attr) = key.strip_prefix(ATTRIBUTE_PARAM_PREFIX) {
                parsed.attributes.insert(attr.to_string(), value);
            } else {
                match key.as_str() {
                    "name" => parsed.name = Some(value),
                    "start" => parsed.start = Some(parse_timestamp("start", &value)?),
                    "end" => parsed.end = Some(parse_timestamp("end", &value)?),
                    _ => {}
                }
            }
        }
        Ok(parsed)
    }
}

fn parse_timestamp(field: &str, value: &str) -> Result<f64, ApiError> {
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid {} timestamp: {}", field, value)))
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub store: &'static str,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let connected = state.storage.is_connected().await;
    let status = if connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if connected { "healthy" } else { "unhealthy" },
            version: env!("CARGO_PKG_VERSION"),
            store: state.storage.backend().backend_name(),
        }),
    )
}

// ============================================================================
// OTLP Ingest
// ============================================================================

#[derive(Serialize)]
pub struct IngestResponse {
    pub stored: usize,
}

pub async fn ingest_traces(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExportTraceRequest>,
) -> Json<IngestResponse> {
    let stored = state.storage.store_traces(request).await;
    Json(IngestResponse { stored })
}

pub async fn ingest_logs(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExportLogsRequest>,
) -> Json<IngestResponse> {
    let stored = state.storage.store_logs_otlp(request).await;
    Json(IngestResponse { stored })
}

pub async fn ingest_metrics(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<IngestResponse>, ApiError> {
    let payload = MetricsPayload::from_json(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid metrics payload: {}", e)))?;
    let stored = state.storage.store_metrics(payload).await;
    Ok(Json(IngestResponse { stored }))
}

// ============================================================================
// Traces, Spans and Logs
// ============================================================================

pub async fn list_traces(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Json<Vec<TraceSummary>> {
    let storage = &state.storage;
    let trace_ids = storage.recent_trace_ids(params.limit(DEFAULT_LIST_LIMIT)).await;
    let summaries = join_all(trace_ids.iter().map(|id| storage.trace_summary(id))).await;
    Json(summaries.into_iter().flatten().collect())
}

#[derive(Serialize)]
pub struct TraceResponse {
    #[serde(flatten)]
    pub summary: TraceSummary,
    pub spans: Vec<Span>,
}

pub async fn get_trace(
    State(state): State<Arc<AppState>>,
    Path(trace_id): Path<String>,
) -> Result<Json<TraceResponse>, ApiError> {
    let spans = state.storage.trace_spans(&trace_id).await;
    let summary = TraceSummary::from_spans(&trace_id, &spans)
        .ok_or_else(|| ApiError::NotFound(format!("Trace not found: {}", trace_id)))?;
    Ok(Json(TraceResponse { summary, spans }))
}

pub async fn list_spans(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Json<Vec<SpanDetails>> {
    let storage = &state.storage;
    let span_ids = storage.recent_span_ids(params.limit(DEFAULT_LIST_LIMIT)).await;
    let details = join_all(span_ids.iter().map(|id| storage.span_details(id))).await;
    Json(details.into_iter().flatten().collect())
}

pub async fn list_logs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LogParams>,
) -> Json<Vec<LogEntry>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    Json(state.storage.logs(params.trace_id.as_deref(), limit).await)
}

// ============================================================================
// Metrics
// ============================================================================

#[derive(Serialize)]
pub struct MetricInfo {
    pub name: String,
    #[serde(flatten)]
    pub metadata: MetricMetadata,
}

pub async fn list_metrics(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Json<Vec<MetricInfo>> {
    let storage = &state.storage;
    let names = storage.metric_names(params.limit).await;
    let metadata = join_all(names.iter().map(|name| storage.metric_metadata(name))).await;
    Json(
        names
            .into_iter()
            .zip(metadata)
            .map(|(name, metadata)| MetricInfo { name, metadata })
            .collect(),
    )
}

pub async fn query_metric(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<MetricSeries>>, ApiError> {
    let params = MetricParams::parse(params)?;
    let name = params
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing metric name".to_string()))?;

    let series = state
        .storage
        .metric_series(name, &params.resource, &params.attributes, params.start, params.end)
        .await;
    Ok(Json(series))
}

#[derive(Serialize)]
pub struct MetricDetailResponse {
    pub name: String,
    pub metadata: MetricMetadata,
    /// Points written through the pre-OTLP path
    pub legacy_data: Vec<LegacyMetric>,
}

pub async fn get_metric(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<MetricDetailResponse>, ApiError> {
    let params = MetricParams::parse(params)?;
    let metadata = state.storage.metric_metadata(&name).await;
    let legacy_data = state
        .storage
        .legacy_metric_data(&name, params.start, params.end)
        .await;
    Ok(Json(MetricDetailResponse {
        name,
        metadata,
        legacy_data,
    }))
}

pub async fn metric_resources(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Json<Vec<AttrMap>> {
    Json(state.storage.all_resources(&name).await)
}

pub async fn metric_attributes(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<AttrMap>>, ApiError> {
    let params = MetricParams::parse(params)?;
    Ok(Json(state.storage.all_attributes(&name, &params.resource).await))
}

// ============================================================================
// Services
// ============================================================================

pub async fn service_map(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Json<ServiceGraph> {
    let limit = params.limit(DEFAULT_GRAPH_TRACES);
    Json(state.storage.service_graph(limit).await)
}

pub async fn service_catalog(State(state): State<Arc<AppState>>) -> Json<Vec<ServiceInfo>> {
    Json(state.storage.service_catalog().await)
}

// ============================================================================
// Stats
// ============================================================================

#[derive(Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub counts: StorageStats,
    pub cardinality: CardinalityStats,
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        counts: state.storage.stats().await,
        cardinality: state.storage.cardinality_stats().await,
    })
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
