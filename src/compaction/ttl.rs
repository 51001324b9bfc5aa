use crate::storage::KvStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

/// Background worker that evicts expired keys from stores without native
/// expiry. Redis expires keys itself, so the worker is a no-op there.
pub struct TtlWorker {
    store: Arc<dyn KvStore>,
    interval: Duration,
    running: Arc<AtomicBool>,
}

impl TtlWorker {
    pub fn new(store: Arc<dyn KvStore>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the background worker
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            tracing::info!(
                "TTL worker started for {} store with interval {:?}",
                self.store.backend_name(),
                self.interval
            );

            let mut interval = time::interval(self.interval);

            while self.running.load(Ordering::SeqCst) {
                interval.tick().await;

                let purged = run_ttl_purge(self.store.as_ref()).await;
                if purged > 0 {
                    tracing::debug!("TTL worker purged {} expired keys", purged);
                }
            }

            tracing::info!("TTL worker stopped");
        })
    }

    /// Stop the worker after its current tick
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Run one purge pass (for manual/testing use)
pub async fn run_ttl_purge(store: &dyn KvStore) -> usize {
    store.purge_expired().await
}
