use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which [`super::KvStore`] implementation backs the storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl StoreBackend {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Some(StoreBackend::Redis),
            "memory" | "mem" => Some(StoreBackend::Memory),
            _ => None,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StoreBackend,
    pub redis_host: String,
    pub redis_port: u16,
    /// Expiry applied to every key, refreshed on each write
    pub ttl_secs: u64,
    /// Distinct metric names tracked before drops are reported
    pub max_metric_cardinality: u64,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub metric_names_cache_secs: u64,
    pub service_graph_cache_secs: u64,
    pub service_catalog_cache_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            redis_host: "localhost".to_string(),
            redis_port: 6579,
            ttl_secs: 1800,
            max_metric_cardinality: 1000,
            connect_timeout_secs: 5,
            command_timeout_secs: 5,
            metric_names_cache_secs: 10,
            service_graph_cache_secs: 5,
            service_catalog_cache_secs: 5,
        }
    }
}

impl StorageConfig {
    /// In-memory backend with default limits
    pub fn memory() -> Self {
        Self {
            backend: StoreBackend::Memory,
            ..Self::default()
        }
    }

    /// Create a storage config from environment variables
    /// REDIS_HOST=localhost
    /// REDIS_PORT_NUMBER=6579 (or REDIS_PORT_OVERRIDE, REDIS_PORT)
    /// REDIS_TTL=1800
    /// MAX_METRIC_CARDINALITY=1000
    /// LANTERN_STORE=redis|memory
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let backend = lookup("LANTERN_STORE")
            .and_then(|s| StoreBackend::parse(&s))
            .unwrap_or(defaults.backend);
        let redis_host = lookup("REDIS_HOST").unwrap_or(defaults.redis_host);
        let redis_port = ["REDIS_PORT_NUMBER", "REDIS_PORT_OVERRIDE", "REDIS_PORT"]
            .iter()
            .find_map(|name| lookup(name).and_then(|p| p.trim().parse().ok()))
            .unwrap_or(defaults.redis_port);
        let ttl_secs = lookup("REDIS_TTL")
            .and_then(|t| t.trim().parse().ok())
            .filter(|t| *t > 0)
            .unwrap_or(defaults.ttl_secs);
        let max_metric_cardinality = lookup("MAX_METRIC_CARDINALITY")
            .and_then(|m| m.trim().parse().ok())
            .unwrap_or(defaults.max_metric_cardinality);

        Self {
            backend,
            redis_host,
            redis_port,
            ttl_secs,
            max_metric_cardinality,
            ..defaults
        }
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}", self.redis_host, self.redis_port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}
