//! Serial scheduler for persistent-tier I/O.
//!
//! Every disk operation (reads included) is queued to one worker that owns
//! the [`DiskCache`] and executes operations strictly in arrival order.
//! This keeps concurrent writers from corrupting records and lets `put`
//! return without waiting on durable I/O.
//!
//! The worker runs on its own thread with a single-threaded runtime, so it
//! keeps draining even while a caller blocks the runtime it was called from.
//!
//! The queue is unbounded: `put` must never block or drop a write. Queued
//! writes share their payload with the memory tier (`Document` is
//! reference counted), so a backlog costs one small operation per pending
//! write. Backlogs are logged every [`BACKLOG_WARN_DEPTH`] operations.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Utc};
use tokio::runtime::Builder;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::cache::disk::DiskCache;
use crate::cache::entry::{CacheEntry, ScreenId};

/// A queued disk operation.
#[derive(Debug)]
enum DiskOp {
    Put {
        key: ScreenId,
        entry: CacheEntry,
    },
    Get {
        key: ScreenId,
        reply: oneshot::Sender<Option<CacheEntry>>,
    },
    Remove {
        key: ScreenId,
        reply: oneshot::Sender<()>,
    },
    Clear {
        reply: oneshot::Sender<()>,
    },
    Usage {
        reply: oneshot::Sender<DiskUsage>,
    },
    Sweep {
        now: DateTime<Utc>,
        reply: oneshot::Sender<usize>,
    },
    Flush {
        reply: oneshot::Sender<()>,
    },
}

/// Record count and byte total of the disk tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskUsage {
    pub entries: usize,
    pub bytes: u64,
}

/// A warning is logged each time the queue depth reaches a multiple of this.
pub const BACKLOG_WARN_DEPTH: usize = 1024;

/// Handle to the disk worker. Cheap to clone.
#[derive(Clone)]
pub struct DiskQueue {
    tx: mpsc::UnboundedSender<DiskOp>,
    pending: Arc<AtomicUsize>,
}

impl DiskQueue {
    /// Start the worker thread, taking ownership of `disk`.
    ///
    /// The worker exits once every `DiskQueue` clone has been dropped and
    /// the remaining queue has drained.
    pub fn spawn(disk: DiskCache) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));

        let worker_pending = pending.clone();
        thread::Builder::new()
            .name("screen-config-disk".to_string())
            .spawn(move || {
                match Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime.block_on(run_worker(disk, rx, worker_pending)),
                    // Dropping `rx` makes every queued operation report absent.
                    Err(e) => error!(error = %e, "Failed to start disk worker runtime"),
                }
            })?;

        Ok(Self { tx, pending })
    }

    /// Operations queued and not yet picked up by the worker.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    fn send(&self, op: DiskOp) -> bool {
        let depth = self.pending.fetch_add(1, Ordering::AcqRel) + 1;
        if self.tx.send(op).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            warn!("Disk worker is not running; dropping disk operation");
            return false;
        }
        if depth % BACKLOG_WARN_DEPTH == 0 {
            warn!(depth, "Disk queue backlog; storage is slower than the write rate");
        }
        true
    }

    /// Queue a write. Returns immediately.
    pub fn put(&self, key: ScreenId, entry: CacheEntry) {
        self.send(DiskOp::Put { key, entry });
    }

    pub async fn get(&self, key: ScreenId) -> Option<CacheEntry> {
        let (reply, rx) = oneshot::channel();
        if !self.send(DiskOp::Get { key, reply }) {
            return None;
        }
        rx.await.ok().flatten()
    }

    pub async fn remove(&self, key: ScreenId) {
        let (reply, rx) = oneshot::channel();
        if self.send(DiskOp::Remove { key, reply }) {
            let _ = rx.await;
        }
    }

    pub async fn clear(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(DiskOp::Clear { reply }) {
            let _ = rx.await;
        }
    }

    pub async fn usage(&self) -> DiskUsage {
        let (reply, rx) = oneshot::channel();
        if !self.send(DiskOp::Usage { reply }) {
            return DiskUsage::default();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let (reply, rx) = oneshot::channel();
        if !self.send(DiskOp::Sweep { now, reply }) {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Wait until every operation queued before this call has completed.
    pub async fn flush(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(DiskOp::Flush { reply }) {
            let _ = rx.await;
        }
    }
}

async fn run_worker(
    disk: DiskCache,
    mut rx: mpsc::UnboundedReceiver<DiskOp>,
    pending: Arc<AtomicUsize>,
) {
    info!(dir = %disk.dir().display(), max_bytes = disk.max_bytes(), "Disk worker started");

    // Replies are best-effort: a caller that stopped waiting is not an error.
    while let Some(op) = rx.recv().await {
        pending.fetch_sub(1, Ordering::AcqRel);
        match op {
            DiskOp::Put { key, entry } => {
                disk.put(&key, &entry).await;
            }
            DiskOp::Get { key, reply } => {
                let _ = reply.send(disk.get(&key).await);
            }
            DiskOp::Remove { key, reply } => {
                disk.remove(&key).await;
                let _ = reply.send(());
            }
            DiskOp::Clear { reply } => {
                disk.clear().await;
                let _ = reply.send(());
            }
            DiskOp::Usage { reply } => {
                let entries = disk.entry_count().await;
                let bytes = disk.total_bytes().await;
                let _ = reply.send(DiskUsage { entries, bytes });
            }
            DiskOp::Sweep { now, reply } => {
                let _ = reply.send(disk.sweep_expired(now).await);
            }
            DiskOp::Flush { reply } => {
                let _ = reply.send(());
            }
        }
    }

    debug!("Disk worker stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::cache::disk::DEFAULT_MAX_BYTES;
    use crate::cache::entry::Document;

    async fn queue(tmp: &TempDir) -> DiskQueue {
        let disk = DiskCache::new(tmp.path(), DEFAULT_MAX_BYTES).await.unwrap();
        DiskQueue::spawn(disk).unwrap()
    }

    fn entry(key: &str, payload: &str) -> CacheEntry {
        CacheEntry::new(
            ScreenId::new(key),
            Document::from(payload),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_operations_apply_in_order() {
        let tmp = TempDir::new().unwrap();
        let queue = queue(&tmp).await;

        queue.put(ScreenId::new("a"), entry("a", "1"));
        queue.put(ScreenId::new("a"), entry("a", "2"));
        queue.put(ScreenId::new("b"), entry("b", "3"));

        let read = queue.get(ScreenId::new("a")).await.unwrap();
        assert_eq!(read.payload.as_str(), "2");
        assert_eq!(queue.usage().await.entries, 2);

        queue.remove(ScreenId::new("a")).await;
        assert!(queue.get(ScreenId::new("a")).await.is_none());

        queue.clear().await;
        assert_eq!(queue.usage().await, DiskUsage::default());
    }

    #[tokio::test]
    async fn test_flush_waits_for_queued_writes() {
        let tmp = TempDir::new().unwrap();
        let queue = queue(&tmp).await;

        for i in 0..20 {
            queue.put(ScreenId::new(format!("s{i}")), entry(&format!("s{i}"), "{}"));
        }
        queue.flush().await;
        assert_eq!(queue.usage().await.entries, 20);
    }

    #[tokio::test]
    async fn test_pending_drains_to_zero() {
        let tmp = TempDir::new().unwrap();
        let queue = queue(&tmp).await;

        for i in 0..50 {
            queue.put(ScreenId::new(format!("s{i}")), entry(&format!("s{i}"), "{}"));
        }
        assert!(queue.pending() <= 50);
        queue.flush().await;
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_worker_runs_without_caller_runtime() {
        let tmp = TempDir::new().unwrap();
        let disk = tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(DiskCache::new(tmp.path(), DEFAULT_MAX_BYTES))
            .unwrap();
        let queue = DiskQueue::spawn(disk).unwrap();

        queue.put(ScreenId::new("a"), entry("a", "1"));
        // Any executor can await the reply; the worker does not need it.
        let read = futures::executor::block_on(queue.get(ScreenId::new("a")));
        assert_eq!(read.unwrap().payload.as_str(), "1");
    }
}
