//! Retrieval policy engine: the consumer-facing entry point.
//!
//! The engine:
//! 1. Receives a screen id
//! 2. Consults the cache coordinator and/or fetcher per the active policy
//! 3. Writes successful fetches through to both cache tiers
//! 4. Falls back to stale cache entries when the network fails
//!
//! It only uses the public contracts of [`CacheCoordinator`] and
//! [`Fetcher`]; tier internals stay behind the coordinator.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::coordinator::{CacheCoordinator, CachedValue};
use crate::cache::entry::{CacheStats, Document, Provenance, ScreenId};
use crate::cache::sweeper::SweepJob;
use crate::config::{CachePolicy, Config};
use crate::error::{Error, FetchError, Result};
use crate::fetch::fetcher::{Fetcher, RetryPolicy};
use crate::fetch::source::{DocumentSource, HttpSource};
use crate::runtime::WorkerPool;

/// A resolved document and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub document: Document,
    pub provenance: Provenance,
    /// Past its TTL; served only because the network failed.
    pub stale: bool,
}

impl Resolved {
    fn network(document: Document) -> Self {
        Self {
            document,
            provenance: Provenance::Network,
            stale: false,
        }
    }

    fn cached(value: CachedValue) -> Self {
        let stale = value.is_stale();
        Self {
            document: value.entry.payload,
            provenance: value.provenance,
            stale,
        }
    }
}

struct EngineInner {
    cache: Arc<CacheCoordinator>,
    fetcher: Fetcher,
    policy: CachePolicy,
    default_ttl: Duration,
    sync_timeout: Duration,
    shutdown: CancellationToken,
    // Last field: dropped after everything that runs on it.
    pool: WorkerPool,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Retrieval engine. Cheap to clone; clones share the same caches.
///
/// Keep one engine per disk cache directory for the whole process.
#[derive(Clone)]
pub struct ScreenConfigEngine {
    inner: Arc<EngineInner>,
}

/// Builds an engine on an existing worker pool.
pub struct EngineBuilder {
    config: Config,
    source: Option<Arc<dyn DocumentSource>>,
    pool: Option<WorkerPool>,
}

impl EngineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            source: None,
            pool: None,
        }
    }

    /// Use `source` instead of fetching over HTTP.
    pub fn source(mut self, source: Arc<dyn DocumentSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn pool(mut self, pool: WorkerPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Validate the configuration, open the caches and start background jobs.
    pub async fn build(self) -> Result<ScreenConfigEngine> {
        self.config.validate()?;
        let pool = match self.pool {
            Some(pool) => pool,
            None => WorkerPool::new(self.config.runtime.worker_threads)?,
        };
        let cache = CacheCoordinator::open(&self.config.cache).await?;
        ScreenConfigEngine::assemble(self.config, self.source, pool, cache)
    }
}

impl ScreenConfigEngine {
    /// Build an engine with its own worker pool, blocking until the caches
    /// are open. Usable from synchronous code.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let pool = WorkerPool::new(config.runtime.worker_threads)?;

        let cache_config = config.cache.clone();
        let cache = pool
            .block_on_timeout(
                async move { CacheCoordinator::open(&cache_config).await },
                config.network.sync_timeout(),
            )
            .unwrap_or_else(|| Err(Error::Cache("timed out opening cache".to_string())))?;

        Self::assemble(config, None, pool, cache)
    }

    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    fn assemble(
        config: Config,
        source: Option<Arc<dyn DocumentSource>>,
        pool: WorkerPool,
        cache: CacheCoordinator,
    ) -> Result<Self> {
        let source = match source {
            Some(source) => source,
            None => Arc::new(HttpSource::new(&config.network)?),
        };

        let fetcher = Fetcher::new(
            source,
            pool.handle().clone(),
            RetryPolicy::from(&config.network),
            config.network.sync_timeout(),
        );

        let cache = Arc::new(cache);
        let shutdown = CancellationToken::new();
        if let Some(interval) = config.cache.sweep_interval() {
            SweepJob::new(cache.clone(), interval)
                .with_cancellation(shutdown.child_token())
                .start(pool.handle());
        }

        info!(
            policy = ?config.cache.policy,
            base_url = %config.network.base_url,
            default_ttl_ms = config.cache.default_ttl_ms,
            max_attempts = config.network.max_attempts,
            "Screen config engine ready"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                cache,
                fetcher,
                policy: config.cache.policy,
                default_ttl: config.cache.default_ttl(),
                sync_timeout: config.network.sync_timeout(),
                shutdown,
                pool,
            }),
        })
    }

    pub fn policy(&self) -> CachePolicy {
        self.inner.policy
    }

    pub fn cache(&self) -> &Arc<CacheCoordinator> {
        &self.inner.cache
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.inner.fetcher
    }

    /// Resolve a screen under the configured policy.
    pub async fn resolve(&self, screen_id: impl Into<ScreenId>) -> Result<Resolved> {
        self.resolve_with(screen_id, self.inner.policy).await
    }

    /// Resolve a screen under an explicit policy.
    pub async fn resolve_with(
        &self,
        screen_id: impl Into<ScreenId>,
        policy: CachePolicy,
    ) -> Result<Resolved> {
        let screen_id = screen_id.into();
        let cache = &self.inner.cache;
        debug!(%screen_id, ?policy, "Resolving screen");

        match policy {
            CachePolicy::CacheFirst => {
                if let Some(hit) = cache.get(&screen_id).await {
                    return Ok(Resolved::cached(hit));
                }
                match self.fetch_and_store(&screen_id).await {
                    Ok(document) => Ok(Resolved::network(document)),
                    Err(e) => self.stale_fallback(&screen_id, e).await,
                }
            }
            CachePolicy::NetworkFirst => match self.fetch_and_store(&screen_id).await {
                Ok(document) => Ok(Resolved::network(document)),
                Err(e) => self.stale_fallback(&screen_id, e).await,
            },
            CachePolicy::CacheOnly => cache
                .get(&screen_id)
                .await
                .map(Resolved::cached)
                .ok_or_else(|| Error::Cache(format!("no cached value for {screen_id}"))),
            CachePolicy::NetworkOnly => self
                .fetch_and_store(&screen_id)
                .await
                .map(Resolved::network)
                .map_err(Error::from),
        }
    }

    /// Blocking variant of [`resolve`](Self::resolve) bounded by the sync timeout.
    pub fn resolve_blocking(&self, screen_id: impl Into<ScreenId>) -> Result<Resolved> {
        let engine = self.clone();
        let screen_id = screen_id.into();
        self.inner
            .pool
            .block_on_timeout(
                async move { engine.resolve(screen_id).await },
                self.inner.sync_timeout,
            )
            .unwrap_or_else(|| Err(FetchError::timed_out().into()))
    }

    async fn fetch_and_store(&self, screen_id: &ScreenId) -> Result<Document, FetchError> {
        let document = self.inner.fetcher.fetch(screen_id).await?;
        self.inner
            .cache
            .put(screen_id, document.clone(), self.inner.default_ttl);
        Ok(document)
    }

    async fn stale_fallback(&self, screen_id: &ScreenId, error: FetchError) -> Result<Resolved> {
        match self.inner.cache.get_stale(screen_id).await {
            Some(value) => {
                let resolved = Resolved::cached(value);
                warn!(
                    %screen_id,
                    error = %error,
                    stale = resolved.stale,
                    provenance = %resolved.provenance,
                    "Network failed, serving cached document"
                );
                Ok(resolved)
            }
            None => Err(error.into()),
        }
    }

    /// Drop one screen from both tiers.
    pub async fn invalidate(&self, screen_id: impl Into<ScreenId>) {
        self.inner.cache.remove(&screen_id.into()).await;
    }

    /// Drop every cached screen and reclaim disk space.
    pub async fn clear_all(&self) {
        self.inner.cache.clear().await;
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.cache.stats().await
    }

    /// Delete expired entries now. Returns the number removed from disk.
    pub async fn sweep_expired(&self) -> usize {
        self.inner.cache.sweep_expired().await
    }

    /// Wait for queued disk writes to complete.
    pub async fn flush(&self) {
        self.inner.cache.flush().await;
    }
}
