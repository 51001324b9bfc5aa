//! The storage service: batch writers over a [`KvStore`]
//!
//! Read paths live in [`crate::query`] as further `impl Storage` blocks.
//! Every public operation comes in two forms: `try_*` returns the
//! underlying error, the plain form logs it and returns the empty value.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use super::cardinality::{CardinalityGuard, CardinalityStats};
use super::codec::{self, CodecError};
use super::config::{StorageConfig, StoreBackend};
use super::keys::{self, SeriesId};
use super::kv::{KvStore, Pipeline, StoreError};
use super::memory::MemoryStore;
use super::redis_store::RedisStore;
use crate::otel::{
    normalize_logs, normalize_metrics, normalize_traces, now_secs, ExportLogsRequest,
    ExportTraceRequest, LegacyMetric, LogEntry, MetricDatapoint, MetricMetadata, MetricsPayload,
    Span, StoredDatapoint,
};
use crate::query::{ServiceGraph, ServiceInfo, TtlCache};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Every stored form of one datapoint, built before any of it is queued
struct EncodedDatapoint {
    meta: Vec<u8>,
    resource: Vec<u8>,
    attributes: Option<Vec<u8>>,
    point: Vec<u8>,
    exemplars: Vec<(Vec<u8>, f64)>,
}

impl EncodedDatapoint {
    fn new(dp: &MetricDatapoint) -> Result<Self, StorageError> {
        let attributes = if dp.attributes.is_empty() {
            None
        } else {
            Some(serde_json::to_vec(&dp.attributes)?)
        };
        let exemplars = dp
            .exemplars
            .iter()
            .map(|exemplar| Ok((codec::encode(exemplar)?, exemplar.timestamp)))
            .collect::<Result<Vec<_>, StorageError>>()?;

        Ok(Self {
            meta: serde_json::to_vec(&MetricMetadata::from(dp))?,
            resource: serde_json::to_vec(&dp.resource)?,
            attributes,
            point: codec::encode(&StoredDatapoint::from(dp))?,
            exemplars,
        })
    }
}

/// Maps a failed operation to its empty result, logging the cause
pub(crate) fn or_default<T: Default>(operation: &str, result: Result<T, StorageError>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Error in {}: {}", operation, e);
            T::default()
        }
    }
}

/// Telemetry storage shared by ingestion and query paths
pub struct Storage {
    store: Arc<dyn KvStore>,
    config: StorageConfig,
    cardinality: CardinalityGuard,
    closed: AtomicBool,
    pub(crate) metric_names_cache: TtlCache<Option<usize>, Vec<String>>,
    pub(crate) graph_cache: TtlCache<usize, ServiceGraph>,
    pub(crate) catalog_cache: TtlCache<(), Vec<ServiceInfo>>,
}

impl Storage {
    /// Connect to the backend selected by `config`
    pub async fn connect(config: StorageConfig) -> Result<Self, StorageError> {
        let store: Arc<dyn KvStore> = match config.backend {
            StoreBackend::Redis => Arc::new(
                RedisStore::connect(
                    &config.redis_url(),
                    config.connect_timeout(),
                    config.command_timeout(),
                )
                .await?,
            ),
            StoreBackend::Memory => {
                tracing::info!("Using in-memory store");
                Arc::new(MemoryStore::new())
            }
        };
        Ok(Self::with_store(store, config))
    }

    pub fn with_store(store: Arc<dyn KvStore>, config: StorageConfig) -> Self {
        Self {
            store,
            cardinality: CardinalityGuard::new(config.max_metric_cardinality),
            closed: AtomicBool::new(false),
            metric_names_cache: TtlCache::new(Duration::from_secs(config.metric_names_cache_secs)),
            graph_cache: TtlCache::new(Duration::from_secs(config.service_graph_cache_secs)),
            catalog_cache: TtlCache::new(Duration::from_secs(config.service_catalog_cache_secs)),
            config,
        }
    }

    /// Storage over a fresh [`MemoryStore`] with default limits
    pub fn in_memory() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), StorageConfig::memory())
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn ttl(&self) -> u64 {
        self.config.ttl_secs
    }

    pub fn backend(&self) -> Arc<dyn KvStore> {
        Arc::clone(&self.store)
    }

    /// Stop serving; later operations fail with a connection error
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.metric_names_cache.invalidate_all();
            self.graph_cache.invalidate_all();
            self.catalog_cache.invalidate_all();
            tracing::info!("Storage closed ({})", self.store.backend_name());
        }
    }

    pub(crate) fn store(&self) -> Result<&dyn KvStore, StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("storage closed".to_string()));
        }
        Ok(self.store.as_ref())
    }

    pub async fn try_ping(&self) -> Result<(), StorageError> {
        Ok(self.store()?.ping().await?)
    }

    /// Health check; false on any failure
    pub async fn is_connected(&self) -> bool {
        self.try_ping().await.is_ok()
    }

    pub async fn try_cardinality_stats(&self) -> Result<CardinalityStats, StorageError> {
        Ok(self.cardinality.stats(self.store()?).await?)
    }

    pub async fn cardinality_stats(&self) -> CardinalityStats {
        let stats = self.try_cardinality_stats().await;
        match stats {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!("Error in cardinality_stats: {}", e);
                CardinalityStats {
                    max: self.cardinality.max(),
                    ..Default::default()
                }
            }
        }
    }

    // ========================================================================
    // Traces
    // ========================================================================

    /// Normalize an OTLP trace export and write its spans
    pub async fn try_store_traces(&self, request: ExportTraceRequest) -> Result<usize, StorageError> {
        let spans = normalize_traces(request);
        self.try_store_spans(&spans).await
    }

    pub async fn store_traces(&self, request: ExportTraceRequest) -> usize {
        or_default("store_traces", self.try_store_traces(request).await)
    }

    /// Write spans and their trace/span indices in one pipeline
    pub async fn try_store_spans(&self, spans: &[Span]) -> Result<usize, StorageError> {
        if spans.is_empty() {
            return Ok(0);
        }

        let ttl = self.ttl();
        let now = now_secs();
        let mut pipe = Pipeline::new();
        let mut written = 0;

        for span in spans {
            if span.trace_id.is_empty() || span.span_id.is_empty() {
                continue;
            }
            let packed = match codec::encode(span) {
                Ok(packed) => packed,
                Err(e) => {
                    tracing::warn!(span_id = %span.span_id, "Failed to encode span: {}", e);
                    continue;
                }
            };

            let trace_key = keys::trace(&span.trace_id);
            let trace_spans_key = keys::trace_spans(&span.trace_id);

            pipe.set_ex(keys::span(&span.span_id), packed.clone(), ttl)
                .sadd(trace_key.as_str(), span.span_id.as_str())
                .expire(trace_key, ttl)
                .zadd(keys::TRACE_INDEX, span.trace_id.as_str(), now)
                .expire(keys::TRACE_INDEX, ttl)
                .rpush(trace_spans_key.as_str(), packed)
                .expire(trace_spans_key, ttl)
                .zadd(keys::SPAN_INDEX, span.span_id.as_str(), now)
                .expire(keys::SPAN_INDEX, ttl);
            written += 1;
        }

        if written > 0 {
            self.store()?.execute(pipe).await?;
            tracing::debug!(spans = written, "stored spans");
        }
        Ok(written)
    }

    pub async fn store_spans(&self, spans: &[Span]) -> usize {
        or_default("store_spans", self.try_store_spans(spans).await)
    }

    // ========================================================================
    // Logs
    // ========================================================================

    /// Normalize an OTLP log export and write its records
    pub async fn try_store_logs_otlp(&self, request: ExportLogsRequest) -> Result<usize, StorageError> {
        let logs = normalize_logs(request);
        self.try_store_logs(logs).await
    }

    pub async fn store_logs_otlp(&self, request: ExportLogsRequest) -> usize {
        or_default("store_logs_otlp", self.try_store_logs_otlp(request).await)
    }

    /// Write logs, assigning ids and timestamps where missing. The log
    /// index is scored by event time so recent-log queries follow it.
    pub async fn try_store_logs(&self, mut logs: Vec<LogEntry>) -> Result<usize, StorageError> {
        if logs.is_empty() {
            return Ok(0);
        }

        let ttl = self.ttl();
        let now = now_secs();
        let mut pipe = Pipeline::new();
        let mut written = 0;

        for log in &mut logs {
            if log.log_id.is_empty() {
                log.log_id = uuid::Uuid::new_v4().to_string();
            }
            if log.timestamp <= 0.0 {
                log.timestamp = now;
            }

            let packed = match codec::encode(log) {
                Ok(packed) => packed,
                Err(e) => {
                    tracing::warn!(log_id = %log.log_id, "Failed to encode log: {}", e);
                    continue;
                }
            };

            pipe.set_ex(keys::log(&log.log_id), packed, ttl)
                .zadd(keys::LOG_INDEX, log.log_id.as_str(), log.timestamp)
                .expire(keys::LOG_INDEX, ttl);

            if let Some(trace_id) = log.trace_id.as_deref().filter(|t| !t.is_empty()) {
                let trace_logs_key = keys::trace_logs(trace_id);
                pipe.rpush(trace_logs_key.as_str(), log.log_id.as_str())
                    .expire(trace_logs_key, ttl);
            }
            written += 1;
        }

        if written > 0 {
            self.store()?.execute(pipe).await?;
            tracing::debug!(logs = written, "stored logs");
        }
        Ok(written)
    }

    pub async fn store_logs(&self, logs: Vec<LogEntry>) -> usize {
        or_default("store_logs", self.try_store_logs(logs).await)
    }

    // ========================================================================
    // Metrics
    // ========================================================================

    /// Write an OTLP export or a legacy metric batch
    pub async fn try_store_metrics(&self, payload: MetricsPayload) -> Result<usize, StorageError> {
        match payload {
            MetricsPayload::Otlp(request) => {
                let datapoints = normalize_metrics(request);
                self.try_store_metric_datapoints(&datapoints).await
            }
            MetricsPayload::Legacy(metrics) => self.try_store_legacy_metrics(metrics).await,
        }
    }

    pub async fn store_metrics(&self, payload: MetricsPayload) -> usize {
        or_default("store_metrics", self.try_store_metrics(payload).await)
    }

    /// Write datapoints with their name, metadata, discovery and series keys
    pub async fn try_store_metric_datapoints(
        &self,
        datapoints: &[MetricDatapoint],
    ) -> Result<usize, StorageError> {
        let datapoints: Vec<&MetricDatapoint> =
            datapoints.iter().filter(|dp| !dp.name.is_empty()).collect();
        if datapoints.is_empty() {
            return Ok(0);
        }

        let store = self.store()?;
        let ttl = self.ttl();
        let sample = self.cardinality.sample(store, keys::METRIC_NAMES).await?;
        let mut pipe = Pipeline::new();
        let mut names = BTreeSet::new();
        let mut written = 0;

        for dp in &datapoints {
            let encoded = match EncodedDatapoint::new(dp) {
                Ok(encoded) => encoded,
                Err(e) => {
                    tracing::warn!(metric = %dp.name, "Failed to encode datapoint: {}", e);
                    continue;
                }
            };
            let name = dp.name.as_str();
            names.insert(name);

            pipe.sadd(keys::METRIC_NAMES, name)
                .expire(keys::METRIC_NAMES, ttl);

            let meta_key = keys::metric_meta(name);
            pipe.set(meta_key.as_str(), encoded.meta).expire(meta_key, ttl);

            let resources_key = keys::metric_resources(name);
            pipe.sadd(resources_key.as_str(), encoded.resource)
                .expire(resources_key, ttl);

            if let Some(attributes) = encoded.attributes {
                let attributes_key = keys::metric_attributes(name);
                pipe.sadd(attributes_key.as_str(), attributes)
                    .expire(attributes_key, ttl);
            }

            let series = SeriesId::new(name, &dp.resource, &dp.attributes);
            let series_key = series.series_key();
            pipe.zadd(series_key.as_str(), encoded.point, dp.timestamp)
                .expire(series_key, ttl);

            if !encoded.exemplars.is_empty() {
                let exemplar_key = series.exemplar_key();
                for (exemplar, timestamp) in encoded.exemplars {
                    pipe.zadd(exemplar_key.as_str(), exemplar, timestamp);
                }
                pipe.expire(exemplar_key, ttl);
            }
            written += 1;
        }

        if written == 0 {
            return Ok(0);
        }
        self.cardinality.record_batch(sample, &names, &mut pipe, ttl);
        store.execute(pipe).await?;
        tracing::debug!(datapoints = written, "stored metric datapoints");
        Ok(written)
    }

    pub async fn store_metric_datapoints(&self, datapoints: &[MetricDatapoint]) -> usize {
        or_default(
            "store_metric_datapoints",
            self.try_store_metric_datapoints(datapoints).await,
        )
    }

    /// Write pre-OTLP metrics to `metric:{name}` sorted sets. The cardinality
    /// cap is sampled once for the whole batch.
    pub async fn try_store_legacy_metrics(
        &self,
        metrics: Vec<LegacyMetric>,
    ) -> Result<usize, StorageError> {
        if metrics.is_empty() {
            return Ok(0);
        }

        let store = self.store()?;
        let ttl = self.ttl();
        let now = now_secs();
        let sample = self
            .cardinality
            .sample(store, keys::LEGACY_METRIC_NAMES)
            .await?;
        let mut pipe = Pipeline::new();
        let mut names = BTreeSet::new();
        let mut written = 0;

        for mut metric in metrics.into_iter().filter(|m| !m.name.is_empty()) {
            let timestamp = *metric.timestamp.get_or_insert(now);
            let packed = match codec::encode(&metric) {
                Ok(packed) => packed,
                Err(e) => {
                    tracing::warn!(metric = %metric.name, "Failed to encode legacy metric: {}", e);
                    continue;
                }
            };
            let metric_key = keys::legacy_metric(&metric.name);

            pipe.zadd(metric_key.as_str(), packed, timestamp)
                .expire(metric_key, ttl)
                .sadd(keys::LEGACY_METRIC_NAMES, metric.name.as_str())
                .expire(keys::LEGACY_METRIC_NAMES, ttl);
            names.insert(metric.name);
            written += 1;
        }

        if written == 0 {
            return Ok(0);
        }
        let names: BTreeSet<&str> = names.iter().map(String::as_str).collect();
        self.cardinality.record_batch(sample, &names, &mut pipe, ttl);
        store.execute(pipe).await?;
        Ok(written)
    }

    pub async fn store_legacy_metrics(&self, metrics: Vec<LegacyMetric>) -> usize {
        or_default("store_legacy_metrics", self.try_store_legacy_metrics(metrics).await)
    }
}
