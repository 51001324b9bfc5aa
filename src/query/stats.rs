//! Storage-wide counts for dashboards

use serde::{Deserialize, Serialize};

use crate::storage::{keys, Storage, StorageError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageStats {
    pub traces: u64,
    pub spans: u64,
    pub logs: u64,
    /// Distinct metric names currently tracked
    pub metrics: u64,
    pub metrics_max: u64,
    pub metrics_dropped: u64,
}

impl Storage {
    pub async fn try_stats(&self) -> Result<StorageStats, StorageError> {
        let store = self.store()?;
        let cardinality = self.try_cardinality_stats().await?;
        Ok(StorageStats {
            traces: store.zcard(keys::TRACE_INDEX).await?,
            spans: store.zcard(keys::SPAN_INDEX).await?,
            logs: store.zcard(keys::LOG_INDEX).await?,
            metrics: cardinality.current,
            metrics_max: cardinality.max,
            metrics_dropped: cardinality.dropped_count,
        })
    }

    pub async fn stats(&self) -> StorageStats {
        match self.try_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!("Error in stats: {}", e);
                StorageStats {
                    metrics_max: self.config().max_metric_cardinality,
                    ..Default::default()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otel::{LogEntry, Span};

    #[tokio::test]
    async fn test_stats_counts() {
        let storage = Storage::in_memory();
        let spans: Vec<Span> = (0..3)
            .map(|i| Span {
                trace_id: format!("t{}", i % 2),
                span_id: format!("s{}", i),
                ..Default::default()
            })
            .collect();
        storage.store_spans(&spans).await;
        storage.store_logs(vec![LogEntry::default()]).await;

        let stats = storage.stats().await;
        assert_eq!(stats.traces, 2);
        assert_eq!(stats.spans, 3);
        assert_eq!(stats.logs, 1);
        assert_eq!(stats.metrics, 0);
        assert_eq!(stats.metrics_max, 1000);
    }

    #[tokio::test]
    async fn test_stats_when_closed() {
        let storage = Storage::in_memory();
        storage.close();
        let stats = storage.stats().await;
        assert_eq!(stats.traces, 0);
        assert_eq!(stats.metrics_max, 1000);
    }
}
