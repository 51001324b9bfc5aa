//! Lantern Server
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - LANTERN_HOST: Bind address (default: 0.0.0.0)
//! - LANTERN_PORT: Port number (default: 5002)
//! - LANTERN_BODY_LIMIT_MB: Largest OTLP request body in MB (default: 5)
//! - LANTERN_STORE: Store backend, `redis` or `memory` (default: redis)
//! - REDIS_HOST, REDIS_PORT_NUMBER, REDIS_TTL, MAX_METRIC_CARDINALITY: see
//!   `StorageConfig::from_env`
//! - RUST_LOG: Log level (default: info)

use lantern::api::{run_server, ServerConfig};
use lantern::storage::{StorageConfig, StoreBackend};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lantern=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse basic configuration from environment
    let defaults = ServerConfig::default();
    let host = std::env::var("LANTERN_HOST").unwrap_or(defaults.host);
    let port: u16 = std::env::var("LANTERN_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(defaults.port);
    let body_limit_bytes = std::env::var("LANTERN_BODY_LIMIT_MB")
        .ok()
        .and_then(|m| m.parse::<usize>().ok())
        .map(|mb| mb * 1024 * 1024)
        .unwrap_or(defaults.body_limit_bytes);

    let config = ServerConfig {
        host,
        port,
        body_limit_bytes,
        storage: StorageConfig::from_env(),
        ..defaults
    };

    tracing::info!("Lantern configuration:");
    tracing::info!("  Host: {}:{}", config.host, config.port);
    tracing::info!("  Body limit: {} MB", config.body_limit_bytes / (1024 * 1024));
    match config.storage.backend {
        StoreBackend::Redis => tracing::info!("  Store: redis at {}", config.storage.redis_url()),
        StoreBackend::Memory => tracing::info!("  Store: in-memory"),
    }
    tracing::info!("  Key TTL: {} seconds", config.storage.ttl_secs);
    tracing::info!(
        "  Max metric cardinality: {}",
        config.storage.max_metric_cardinality
    );

    println!(
        r#"
  _                 _
 | |    __ _ _ __ | |_ ___ _ __ _ __
 | |   / _` | '_ \| __/ _ \ '__| '_ \
 | |__| (_| | | | | ||  __/ |  | | | |
 |_____\__,_|_| |_|\__\___|_|  |_| |_|

 Lightweight OpenTelemetry Backend
 Version: {}
"#,
        env!("CARGO_PKG_VERSION")
    );

    run_server(config).await
}
