use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    get_metric, get_trace, health_check, ingest_logs, ingest_metrics, ingest_traces, list_logs,
    list_metrics, list_spans, list_traces, metric_attributes, metric_resources, query_metric,
    service_catalog, service_map, stats, AppState,
};
use crate::compaction::TtlWorker;
use crate::storage::{Storage, StorageConfig};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted OTLP request body
    pub body_limit_bytes: usize,
    pub purge_interval_secs: u64,
    pub storage: StorageConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5002,
            body_limit_bytes: 5 * 1024 * 1024, // 5MiB
            purge_interval_secs: 30,
            storage: StorageConfig::default(),
        }
    }
}

/// Build the application router
pub fn build_router(state: Arc<AppState>, body_limit_bytes: usize) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // OTLP/HTTP JSON receivers
        .route("/v1/traces", post(ingest_traces))
        .route("/v1/logs", post(ingest_logs))
        .route("/v1/metrics", post(ingest_metrics))
        // Traces, spans and logs
        .route("/api/traces", get(list_traces))
        .route("/api/traces/:trace_id", get(get_trace))
        .route("/api/spans", get(list_spans))
        .route("/api/logs", get(list_logs))
        // Metrics
        .route("/api/metrics", get(list_metrics))
        .route("/api/metrics/query", get(query_metric))
        .route("/api/metrics/:name", get(get_metric))
        .route("/api/metrics/:name/resources", get(metric_resources))
        .route("/api/metrics/:name/attributes", get(metric_attributes))
        // Services
        .route("/api/service-map", get(service_map))
        .route("/api/service-catalog", get(service_catalog))
        // Stats
        .route("/api/stats", get(stats))
        // Middleware
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run_server(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Connect storage
    tracing::info!(
        "Connecting to {:?} store (ttl={}s, max_metric_cardinality={})",
        config.storage.backend,
        config.storage.ttl_secs,
        config.storage.max_metric_cardinality
    );
    let storage = Arc::new(Storage::connect(config.storage.clone()).await?);

    // Initialize app state
    let state = Arc::new(AppState {
        storage: Arc::clone(&storage),
    });

    // Start background workers
    let ttl_worker = Arc::new(TtlWorker::new(
        storage.backend(),
        Duration::from_secs(config.purge_interval_secs),
    ));
    let ttl_handle = Arc::clone(&ttl_worker).start();

    // Build router
    let app = build_router(state, config.body_limit_bytes);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Starting Lantern server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(ttl_worker))
        .await?;

    // Wait for workers to stop
    ttl_handle.abort();
    storage.close();

    tracing::info!("Lantern server stopped");
    Ok(())
}

async fn shutdown_signal(ttl_worker: Arc<TtlWorker>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }

    tracing::info!("Shutdown signal received, stopping workers...");
    ttl_worker.stop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    fn create_test_app() -> (Router, Arc<Storage>) {
        let storage = Arc::new(Storage::in_memory());
        let state = Arc::new(AppState {
            storage: Arc::clone(&storage),
        });
        (build_router(state, 5 * 1024 * 1024), storage)
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> StatusCode {
        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_string(&body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap()
            .status()
    }

    fn two_service_trace() -> serde_json::Value {
        serde_json::json!({
            "resourceSpans": [
                {
                    "resource": {"attributes": [
                        {"key": "service.name", "value": {"stringValue": "frontend"}}
                    ]},
                    "scopeSpans": [{"spans": [{
                        "traceId": "5b8efff798038103d269b633813fc60c",
                        "spanId": "eee19b7ec3c1b174",
                        "name": "GET /checkout",
                        "kind": 2,
                        "startTimeUnixNano": "1700000000000000000",
                        "endTimeUnixNano": "1700000000050000000",
                        "attributes": [
                            {"key": "http.method", "value": {"stringValue": "GET"}}
                        ]
                    }]}]
                },
                {
                    "resource": {"attributes": [
                        {"key": "service.name", "value": {"stringValue": "payments"}}
                    ]},
                    "scopeSpans": [{"spans": [{
                        "traceId": "5b8efff798038103d269b633813fc60c",
                        "spanId": "eee19b7ec3c1b175",
                        "parentSpanId": "eee19b7ec3c1b174",
                        "name": "charge",
                        "kind": 2,
                        "startTimeUnixNano": "1700000000010000000",
                        "endTimeUnixNano": "1700000000030000000"
                    }]}]
                }
            ]
        })
    }

    #[tokio::test]
    async fn test_health_check() {
        let (app, storage) = create_test_app();

        let (status, body) = get_json(&app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["store"], "memory");

        storage.close();
        let (status, _) = get_json(&app, "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_trace_ingest_and_service_map() {
        let (app, _storage) = create_test_app();

        assert_eq!(post_json(&app, "/v1/traces", two_service_trace()).await, StatusCode::OK);

        let (status, traces) = get_json(&app, "/api/traces").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(traces.as_array().unwrap().len(), 1);
        assert_eq!(traces[0]["span_count"], 2);
        assert_eq!(traces[0]["duration_ms"], 50.0);
        assert_eq!(traces[0]["root_span_method"], "GET");

        let (status, trace) =
            get_json(&app, "/api/traces/5b8efff798038103d269b633813fc60c").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(trace["spans"].as_array().unwrap().len(), 2);

        let (_, graph) = get_json(&app, "/api/service-map").await;
        let edges = graph["edges"].as_array().unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0]["source"], "frontend");
        assert_eq!(edges[0]["target"], "payments");

        let (status, _) = get_json(&app, "/api/traces/unknown").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metric_ingest_and_query() {
        let (app, _storage) = create_test_app();

        let body = serde_json::json!({
            "resourceMetrics": [{
                "resource": {"attributes": [
                    {"key": "service.name", "value": {"stringValue": "api"}}
                ]},
                "scopeMetrics": [{"metrics": [{
                    "name": "http.server.duration",
                    "unit": "ms",
                    "histogram": {
                        "aggregationTemporality": 2,
                        "dataPoints": [{
                            "timeUnixNano": "1700000000000000000",
                            "count": "20",
                            "sum": 900.0,
                            "bucketCounts": ["5", "10", "3", "2"],
                            "explicitBounds": [10, 50, 100],
                            "attributes": [
                                {"key": "http.route", "value": {"stringValue": "/users"}}
                            ]
                        }]
                    }
                }]}]
            }]
        });
        assert_eq!(post_json(&app, "/v1/metrics", body).await, StatusCode::OK);

        let (_, metrics) = get_json(&app, "/api/metrics").await;
        assert_eq!(metrics[0]["name"], "http.server.duration");
        assert_eq!(metrics[0]["type"], "histogram");

        let (status, series) = get_json(
            &app,
            "/api/metrics/query?name=http.server.duration&start=0&end=2000000000&resource.service.name=api&attribute.http.route=/users",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let series = series.as_array().unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0]["datapoints"][0]["histogram"]["count"], 20);

        let (_, filtered) = get_json(
            &app,
            "/api/metrics/query?name=http.server.duration&start=0&end=2000000000&resource.service.name=web",
        )
        .await;
        assert!(filtered.as_array().unwrap().is_empty());

        let (_, resources) = get_json(&app, "/api/metrics/http.server.duration/resources").await;
        assert_eq!(resources[0]["service.name"], "api");

        let (status, _) = get_json(&app, "/api/metrics/query").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_logs_and_stats() {
        let (app, _storage) = create_test_app();

        let body = serde_json::json!({
            "resourceLogs": [{
                "resource": {"attributes": [
                    {"key": "service.name", "value": {"stringValue": "api"}}
                ]},
                "scopeLogs": [{"logRecords": [{
                    "timeUnixNano": "1700000000000000000",
                    "severityText": "ERROR",
                    "body": {"stringValue": "payment declined"},
                    "traceId": "5b8efff798038103d269b633813fc60c"
                }]}]
            }]
        });
        assert_eq!(post_json(&app, "/v1/logs", body).await, StatusCode::OK);

        let (_, logs) =
            get_json(&app, "/api/logs?trace_id=5b8efff798038103d269b633813fc60c").await;
        assert_eq!(logs[0]["message"], "payment declined");
        assert_eq!(logs[0]["severity"], "ERROR");

        let (status, stats) = get_json(&app, "/api/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["logs"], 1);
        assert_eq!(stats["cardinality"]["max"], 1000);
    }

    #[tokio::test]
    async fn test_body_limit() {
        let storage = Arc::new(Storage::in_memory());
        let app = build_router(Arc::new(AppState { storage }), 64);

        let status = post_json(&app, "/v1/traces", two_service_trace()).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }
}
