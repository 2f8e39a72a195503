//! Volatile tier: bounded in-process LRU map of screen entries.
//!
//! Recency is updated on both `get` and `put`, so the entry evicted on
//! overflow is the least recently *accessed*, not the oldest inserted.
//! Every operation runs under one lock and never exposes a partial state.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use lru::LruCache;
use tracing::debug;

use crate::cache::entry::{CacheEntry, ScreenId};

/// Default maximum number of entries.
pub const DEFAULT_MAX_ENTRIES: usize = 50;

pub struct MemoryCache {
    entries: Mutex<LruCache<ScreenId, CacheEntry>>,
    capacity: NonZeroUsize,
}

impl MemoryCache {
    /// Create a tier holding at most `max_entries` entries (minimum 1).
    pub fn new(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<ScreenId, CacheEntry>> {
        // Entries are replaced whole, so a panic while holding the lock
        // cannot leave a half-written value behind.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up an entry and mark it most recently used.
    pub fn get(&self, key: &ScreenId) -> Option<CacheEntry> {
        self.lock().get(key).cloned()
    }

    /// Look up an entry without touching recency.
    pub fn peek(&self, key: &ScreenId) -> Option<CacheEntry> {
        self.lock().peek(key).cloned()
    }

    /// Insert or replace an entry, returning the previous entry for `key`.
    ///
    /// Evicts the least recently used entry when the tier is full.
    pub fn put(&self, key: ScreenId, entry: CacheEntry) -> Option<CacheEntry> {
        let mut entries = self.lock();
        match entries.push(key.clone(), entry) {
            Some((old_key, old)) if old_key == key => Some(old),
            Some((evicted, _)) => {
                debug!(screen_id = %evicted, "Evicted least recently used entry from memory");
                None
            }
            None => None,
        }
    }

    pub fn remove(&self, key: &ScreenId) -> Option<CacheEntry> {
        self.lock().pop(key)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Point-in-time copy, safe to iterate without holding the lock.
    pub fn snapshot(&self) -> HashMap<ScreenId, CacheEntry> {
        self.lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Drop every entry expired at `now`. Returns how many were dropped.
    pub fn remove_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.lock();
        let expired: Vec<ScreenId> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    pub fn size(&self) -> usize {
        self.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::cache::entry::Document;

    fn entry(key: &str, payload: &str) -> CacheEntry {
        CacheEntry::new(
            ScreenId::new(key),
            Document::from(payload),
            Duration::from_secs(60),
        )
    }

    fn put(cache: &MemoryCache, key: &str, payload: &str) -> Option<CacheEntry> {
        cache.put(ScreenId::new(key), entry(key, payload))
    }

    #[test]
    fn test_put_returns_previous() {
        let cache = MemoryCache::new(4);
        assert!(put(&cache, "a", "1").is_none());
        let previous = put(&cache, "a", "2").unwrap();
        assert_eq!(previous.payload.as_str(), "1");
        assert_eq!(cache.get(&"a".into()).unwrap().payload.as_str(), "2");
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn test_evicts_least_recently_accessed() {
        let cache = MemoryCache::new(3);
        put(&cache, "a", "1");
        put(&cache, "b", "2");
        put(&cache, "c", "3");

        // "a" is the oldest insertion but the most recent access.
        assert!(cache.get(&"a".into()).is_some());

        put(&cache, "d", "4");
        assert!(cache.peek(&"b".into()).is_none());
        assert!(cache.peek(&"a".into()).is_some());
        assert!(cache.peek(&"c".into()).is_some());
        assert!(cache.peek(&"d".into()).is_some());
    }

    #[test]
    fn test_put_refreshes_recency() {
        let cache = MemoryCache::new(2);
        put(&cache, "a", "1");
        put(&cache, "b", "2");
        put(&cache, "a", "1b");
        put(&cache, "c", "3");

        assert!(cache.peek(&"b".into()).is_none());
        assert_eq!(cache.peek(&"a".into()).unwrap().payload.as_str(), "1b");
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = MemoryCache::new(4);
        put(&cache, "a", "1");
        put(&cache, "b", "2");

        assert_eq!(cache.remove(&"a".into()).unwrap().payload.as_str(), "1");
        assert!(cache.remove(&"a".into()).is_none());
        assert_eq!(cache.size(), 1);

        cache.clear();
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let cache = MemoryCache::new(4);
        put(&cache, "a", "1");
        let snapshot = cache.snapshot();
        cache.clear();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key(&ScreenId::new("a")));
    }

    #[test]
    fn test_remove_expired_keeps_fresh() {
        let cache = MemoryCache::new(4);
        put(&cache, "fresh", "1");
        let old = CacheEntry::with_created_at(
            ScreenId::new("old"),
            Document::from("2"),
            Utc::now() - chrono::TimeDelta::seconds(120),
            Duration::from_secs(60),
        );
        cache.put(ScreenId::new("old"), old);

        assert_eq!(cache.remove_expired(Utc::now()), 1);
        assert!(cache.peek(&"old".into()).is_none());
        assert!(cache.peek(&"fresh".into()).is_some());
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let cache = MemoryCache::new(0);
        assert_eq!(cache.capacity(), 1);
        put(&cache, "a", "1");
        put(&cache, "b", "2");
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn test_concurrent_put_get_never_torn() {
        let cache = Arc::new(MemoryCache::new(8));
        let old = "x".repeat(4096);
        let new = "y".repeat(8192);
        put(&cache, "k", &old);

        let writer = {
            let cache = cache.clone();
            let (old, new) = (old.clone(), new.clone());
            std::thread::spawn(move || {
                for i in 0..500 {
                    let payload = if i % 2 == 0 { &new } else { &old };
                    put(&cache, "k", payload);
                }
            })
        };

        for _ in 0..500 {
            let seen = cache.get(&"k".into()).unwrap();
            let text = seen.payload.as_str();
            assert!(text == old || text == new, "torn read of {} bytes", text.len());
        }
        writer.join().unwrap();
    }
}
