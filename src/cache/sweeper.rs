//! Background job that periodically deletes expired cache entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::coordinator::CacheCoordinator;

pub struct SweepJob {
    cache: Arc<CacheCoordinator>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl SweepJob {
    pub fn new(cache: Arc<CacheCoordinator>, interval: Duration) -> Self {
        Self {
            cache,
            interval,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Start the job on `handle`. It runs until the token is cancelled.
    pub fn start(self, handle: &Handle) -> JoinHandle<()> {
        info!(interval_ms = self.interval.as_millis() as u64, "Starting expiry sweep job");

        handle.spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            // The first tick completes immediately; sweep on startup too.
            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        info!("SweepJob: shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let deleted = self.cache.sweep_expired().await;
                        debug!(deleted, "Periodic sweep finished");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::cache::disk::{DiskCache, DEFAULT_MAX_BYTES};
    use crate::cache::disk_queue::DiskQueue;
    use crate::cache::entry::{Document, ScreenId};
    use crate::cache::memory::MemoryCache;

    #[tokio::test]
    async fn test_job_sweeps_until_cancelled() {
        let tmp = TempDir::new().unwrap();
        let disk = DiskCache::new(tmp.path(), DEFAULT_MAX_BYTES).await.unwrap();
        let cache = Arc::new(CacheCoordinator::new(
            MemoryCache::new(8),
            DiskQueue::spawn(disk).unwrap(),
        ));

        cache.put(
            &ScreenId::new("short"),
            Document::from("{}"),
            Duration::from_millis(10),
        );

        let token = CancellationToken::new();
        let job = SweepJob::new(cache.clone(), Duration::from_millis(25))
            .with_cancellation(token.clone())
            .start(&Handle::current());

        tokio::time::sleep(Duration::from_millis(120)).await;
        let stats = cache.stats().await;
        assert_eq!(stats.memory_entries, 0);
        assert_eq!(stats.disk_entries, 0);

        token.cancel();
        job.await.unwrap();
    }
}
