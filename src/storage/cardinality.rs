//! Metric name cardinality accounting
//!
//! The distinct-name count is sampled once per write batch. When the sample
//! is already at the cap, the batch's names are recorded as drops for the
//! stats endpoints, but the batch is still written: checking each name for
//! existence would cost a round trip per item.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::keys;
use super::kv::{KvStore, Pipeline, StoreError};

/// Distinct-name count observed at the start of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardinalitySample {
    pub current: u64,
    pub max: u64,
}

impl CardinalitySample {
    pub fn is_over(&self) -> bool {
        self.current >= self.max
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardinalityStats {
    pub current: u64,
    pub max: u64,
    pub dropped_count: u64,
    pub dropped_names: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CardinalityGuard {
    max: u64,
}

impl CardinalityGuard {
    pub fn new(max: u64) -> Self {
        Self { max }
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub async fn sample(
        &self,
        store: &dyn KvStore,
        names_key: &str,
    ) -> Result<CardinalitySample, StoreError> {
        Ok(CardinalitySample {
            current: store.scard(names_key).await?,
            max: self.max,
        })
    }

    /// Queues drop accounting for a batch sampled over the cap. Returns the
    /// number of names recorded.
    pub fn record_batch(
        &self,
        sample: CardinalitySample,
        names: &BTreeSet<&str>,
        pipe: &mut Pipeline,
        ttl: u64,
    ) -> usize {
        if !sample.is_over() || names.is_empty() {
            return 0;
        }

        tracing::warn!(
            current = sample.current,
            max = sample.max,
            names = names.len(),
            "metric cardinality limit reached"
        );

        pipe.incr_by(keys::DROPPED_COUNT, names.len() as i64)
            .expire(keys::DROPPED_COUNT, ttl);
        for name in names {
            pipe.sadd(keys::DROPPED_NAMES, *name);
        }
        pipe.expire(keys::DROPPED_NAMES, ttl);
        names.len()
    }

    /// Current distinct names (OTLP set, else legacy set) and drop counters
    pub async fn stats(&self, store: &dyn KvStore) -> Result<CardinalityStats, StoreError> {
        let mut current = store.scard(keys::METRIC_NAMES).await?;
        if current == 0 {
            current = store.scard(keys::LEGACY_METRIC_NAMES).await?;
        }

        let dropped_count = store
            .get(keys::DROPPED_COUNT)
            .await?
            .and_then(|raw| String::from_utf8(raw).ok())
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0);

        let mut dropped_names: Vec<String> = store
            .smembers(keys::DROPPED_NAMES)
            .await?
            .into_iter()
            .map(|raw| String::from_utf8_lossy(&raw).into_owned())
            .collect();
        dropped_names.sort();

        Ok(CardinalityStats {
            current,
            max: self.max,
            dropped_count,
            dropped_names,
        })
    }
}
