//! Two-tier screen document cache.
//!
//! This module contains the cache data structures and algorithms:
//! - [`entry`]: ScreenId, Document, CacheEntry, Provenance, CacheStats
//! - [`memory`]: Volatile LRU tier
//! - [`disk`]: Persistent record-per-screen tier
//! - [`evictor`]: Size-based eviction policy for the disk tier
//! - [`disk_queue`]: Serial background scheduler for disk I/O
//! - [`coordinator`]: Composes both tiers into one cache
//! - [`sweeper`]: Periodic expiry sweep job

pub mod coordinator;
pub mod disk;
pub mod disk_queue;
pub mod entry;
pub mod evictor;
pub mod memory;
pub mod sweeper;
