//! Cache coordinator: composes the memory and disk tiers into one cache.
//!
//! The coordinator is the only owner of both tiers. It:
//! - Serves reads from memory first, then disk, promoting disk hits upward
//! - Writes memory synchronously and disk through the background queue
//! - Keeps hit/miss counters for monitoring
//!
//! Memory is authoritative: a disk record may briefly lag behind the memory
//! tier while its write is still queued.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use crate::cache::disk::DiskCache;
use crate::cache::disk_queue::DiskQueue;
use crate::cache::entry::{CacheEntry, CacheStats, Document, Provenance, ScreenId};
use crate::cache::memory::MemoryCache;
use crate::config::CacheConfig;
use crate::error::{Error, Result};

/// A cache hit together with the tier that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    pub entry: CacheEntry,
    pub provenance: Provenance,
}

impl CachedValue {
    pub fn is_stale(&self) -> bool {
        self.entry.is_expired_now()
    }
}

#[derive(Debug, Default)]
struct HitCounters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
}

/// Two-tier cache keyed by screen id.
///
/// At most one coordinator may use a given disk directory at a time; keep a
/// single instance per directory and share it.
pub struct CacheCoordinator {
    memory: MemoryCache,
    disk: DiskQueue,
    counters: HitCounters,
}

impl CacheCoordinator {
    /// Open the disk tier at `config.disk_path` and start its worker thread.
    pub async fn open(config: &CacheConfig) -> Result<Self> {
        let disk = DiskCache::new(&config.disk_path, config.max_disk_bytes)
            .await
            .map_err(|e| {
                Error::Cache(format!(
                    "cannot open disk cache at {}: {e}",
                    config.disk_path.display()
                ))
            })?;

        info!(
            dir = %config.disk_path.display(),
            max_memory_entries = config.max_memory_entries,
            max_disk_bytes = config.max_disk_bytes,
            "Cache opened"
        );

        Ok(Self::new(
            MemoryCache::new(config.max_memory_entries),
            DiskQueue::spawn(disk).map_err(|e| {
                Error::Cache(format!("cannot start disk worker: {e}"))
            })?,
        ))
    }

    pub fn new(memory: MemoryCache, disk: DiskQueue) -> Self {
        Self {
            memory,
            disk,
            counters: HitCounters::default(),
        }
    }

    /// Return an unexpired entry, checking memory then disk.
    pub async fn get(&self, key: &ScreenId) -> Option<CachedValue> {
        let now = Utc::now();

        if let Some(entry) = self.memory.get(key) {
            if !entry.is_expired(now) {
                self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
                return Some(CachedValue {
                    entry,
                    provenance: Provenance::Memory,
                });
            }
            debug!(screen_id = %key, "Memory entry expired");
        }

        if let Some(entry) = self.disk.get(key.clone()).await {
            if !entry.is_expired(now) {
                self.promote(key, &entry);
                self.counters.disk_hits.fetch_add(1, Ordering::Relaxed);
                return Some(CachedValue {
                    entry,
                    provenance: Provenance::Disk,
                });
            }
            debug!(screen_id = %key, "Disk entry expired");
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn promote(&self, key: &ScreenId, entry: &CacheEntry) {
        // A newer value written while the disk read was queued wins.
        if let Some(current) = self.memory.peek(key) {
            if current.created_at > entry.created_at {
                return;
            }
        }
        self.memory.put(key.clone(), entry.clone());
        debug!(screen_id = %key, "Promoted disk entry to memory");
    }

    /// Return an entry from either tier regardless of expiry.
    ///
    /// Only for stale-while-error fallback; does not count as a hit or miss.
    pub async fn get_stale(&self, key: &ScreenId) -> Option<CachedValue> {
        if let Some(entry) = self.memory.peek(key) {
            return Some(CachedValue {
                entry,
                provenance: Provenance::Memory,
            });
        }
        self.disk.get(key.clone()).await.map(|entry| CachedValue {
            entry,
            provenance: Provenance::Disk,
        })
    }

    /// Cache `payload` for `key`.
    ///
    /// The memory tier is updated before this returns; the disk write is
    /// queued and completes in the background.
    pub fn put(&self, key: &ScreenId, payload: Document, ttl: Duration) -> CacheEntry {
        let entry = CacheEntry::new(key.clone(), payload, ttl);
        self.memory.put(key.clone(), entry.clone());
        self.disk.put(key.clone(), entry.clone());
        debug!(screen_id = %key, size = entry.size_bytes, ttl_ms = ttl.as_millis() as u64, "Cached document");
        entry
    }

    pub async fn has_valid(&self, key: &ScreenId) -> bool {
        self.get(key).await.is_some()
    }

    /// Remove `key` from both tiers.
    pub async fn remove(&self, key: &ScreenId) {
        self.memory.remove(key);
        self.disk.remove(key.clone()).await;
        debug!(screen_id = %key, "Removed from cache");
    }

    /// Remove everything from both tiers and reclaim disk space.
    ///
    /// Disk writes queued before this call are applied first and then
    /// cleared. A `put` racing this call from another task may land on
    /// either side of it.
    pub async fn clear(&self) {
        self.memory.clear();
        self.disk.clear().await;
        info!("Cache cleared");
    }

    /// Delete expired entries from both tiers. Returns the disk count.
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let from_memory = self.memory.remove_expired(now);
        let from_disk = self.disk.sweep_expired(now).await;
        debug!(from_memory, from_disk, "Expiry sweep complete");
        from_disk
    }

    /// Wait for all queued disk writes to land.
    pub async fn flush(&self) {
        self.disk.flush().await;
    }

    pub async fn stats(&self) -> CacheStats {
        let usage = self.disk.usage().await;
        CacheStats {
            memory_entries: self.memory.size(),
            disk_entries: usage.entries,
            total_disk_bytes: usage.bytes,
            memory_hits: self.counters.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.counters.disk_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use tempfile::TempDir;

    use super::*;
    use crate::cache::disk::DEFAULT_MAX_BYTES;

    async fn coordinator(tmp: &TempDir, max_entries: usize) -> CacheCoordinator {
        let disk = DiskCache::new(tmp.path(), DEFAULT_MAX_BYTES).await.unwrap();
        CacheCoordinator::new(
            MemoryCache::new(max_entries),
            DiskQueue::spawn(disk).unwrap(),
        )
    }

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_read_after_write_from_memory() {
        let tmp = TempDir::new().unwrap();
        let cache = coordinator(&tmp, 4).await;
        let key = ScreenId::new("home");

        cache.put(&key, Document::from("{\"a\":1}"), MINUTE);
        let hit = cache.get(&key).await.unwrap();

        assert_eq!(hit.provenance, Provenance::Memory);
        assert_eq!(hit.entry.payload.as_str(), "{\"a\":1}");
        assert!(!hit.is_stale());
    }

    #[tokio::test]
    async fn test_disk_hit_is_promoted() {
        let tmp = TempDir::new().unwrap();
        // One memory slot so the second put pushes "a" out of memory.
        let cache = coordinator(&tmp, 1).await;
        let a = ScreenId::new("a");
        let b = ScreenId::new("b");

        cache.put(&a, Document::from("1"), MINUTE);
        cache.put(&b, Document::from("2"), MINUTE);
        cache.flush().await;

        let hit = cache.get(&a).await.unwrap();
        assert_eq!(hit.provenance, Provenance::Disk);

        let hit = cache.get(&a).await.unwrap();
        assert_eq!(hit.provenance, Provenance::Memory);

        let stats = cache.stats().await;
        assert_eq!(stats.disk_hits, 1);
        assert_eq!(stats.memory_hits, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_miss_but_available_stale() {
        let tmp = TempDir::new().unwrap();
        let cache = coordinator(&tmp, 4).await;
        let key = ScreenId::new("home");

        cache.put(&key, Document::from("{}"), Duration::from_millis(30));
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(cache.get(&key).await.is_none());
        assert!(!cache.has_valid(&key).await);

        let stale = cache.get_stale(&key).await.unwrap();
        assert!(stale.is_stale());
        assert_eq!(cache.stats().await.misses, 2);
    }

    #[tokio::test]
    async fn test_remove_and_clear_hit_both_tiers() {
        let tmp = TempDir::new().unwrap();
        let cache = coordinator(&tmp, 4).await;
        let a = ScreenId::new("a");
        let b = ScreenId::new("b");

        cache.put(&a, Document::from("1"), MINUTE);
        cache.put(&b, Document::from("2"), MINUTE);

        cache.remove(&a).await;
        assert!(cache.get_stale(&a).await.is_none());

        cache.clear().await;
        let stats = cache.stats().await;
        assert_eq!(stats.memory_entries, 0);
        assert_eq!(stats.disk_entries, 0);
        assert_eq!(stats.total_disk_bytes, 0);
    }

    #[tokio::test]
    async fn test_sequential_puts_latest_wins() {
        let tmp = TempDir::new().unwrap();
        let cache = coordinator(&tmp, 4).await;
        let key = ScreenId::new("k");

        cache.put(&key, Document::from("1"), MINUTE);
        cache.put(&key, Document::from("2"), MINUTE);
        assert_eq!(cache.get(&key).await.unwrap().entry.payload.as_str(), "2");

        cache.flush().await;
        cache.memory.clear();
        assert_eq!(cache.get(&key).await.unwrap().entry.payload.as_str(), "2");
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let tmp = TempDir::new().unwrap();
        let cache = coordinator(&tmp, 4).await;

        cache.put(&ScreenId::new("fresh"), Document::from("1"), MINUTE);
        cache.put(&ScreenId::new("short"), Document::from("2"), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(cache.sweep_expired().await, 1);
        let stats = cache.stats().await;
        assert_eq!(stats.memory_entries, 1);
        assert_eq!(stats.disk_entries, 1);
    }

    #[tokio::test]
    async fn test_promotion_does_not_overwrite_newer_memory_value() {
        let tmp = TempDir::new().unwrap();
        let cache = coordinator(&tmp, 4).await;
        let key = ScreenId::new("k");

        let older = CacheEntry::with_created_at(
            key.clone(),
            Document::from("old"),
            Utc::now() - TimeDelta::seconds(5),
            MINUTE,
        );
        cache.put(&key, Document::from("new"), MINUTE);
        cache.promote(&key, &older);

        assert_eq!(cache.memory.peek(&key).unwrap().payload.as_str(), "new");
    }
}
