//! Persistent tier: one JSON record per screen id in a cache directory.
//!
//! Records survive process restart. A record that cannot be read back
//! (truncated, corrupted, wrong schema) is treated as absent and deleted
//! when it is detected. I/O failures are logged and degrade to "absent";
//! the memory tier keeps serving in the meantime.
//!
//! Writes go to a temporary file which is then renamed over the record, so
//! readers only ever observe a complete record or none at all. Temporary
//! files left behind by an interrupted write are removed on open and on
//! every sweep.
//!
//! The byte budget counts payload bytes (`CacheEntry::size_bytes`), not the
//! size of the encoded record. An in-memory index of `(payload size, write
//! time)` per record is rebuilt from the directory on open and on sweep, and
//! kept current by every write and delete in between.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::entry::{CacheEntry, Document, ScreenId};
use crate::cache::evictor::{EvictionCandidate, Evictor};

/// Default byte budget for the disk tier (50 MiB).
pub const DEFAULT_MAX_BYTES: u64 = 50 * 1024 * 1024;

const RECORD_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

#[derive(Error, Debug)]
pub enum DiskError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt record {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

/// On-disk layout of one record.
#[derive(Debug, Serialize, Deserialize)]
struct DiskRecord {
    key: String,
    payload: String,
    created_at: DateTime<Utc>,
    ttl_ms: u64,
}

impl DiskRecord {
    fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            key: entry.key.as_str().to_string(),
            payload: entry.payload.as_str().to_string(),
            created_at: entry.created_at,
            ttl_ms: u64::try_from(entry.ttl.as_millis()).unwrap_or(u64::MAX),
        }
    }

    fn into_entry(self) -> CacheEntry {
        CacheEntry::with_created_at(
            ScreenId::new(self.key),
            Document::from(self.payload),
            self.created_at,
            Duration::from_millis(self.ttl_ms),
        )
    }
}

/// Accounting data for one record file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IndexedRecord {
    payload_bytes: u64,
    written_at: SystemTime,
}

impl IndexedRecord {
    fn for_entry(entry: &CacheEntry, written_at: SystemTime) -> Self {
        Self {
            payload_bytes: entry.size_bytes as u64,
            written_at,
        }
    }
}

/// Kind of file found in the cache directory.
enum FileKind {
    Record,
    Temp,
    Foreign,
}

fn file_kind(path: &Path) -> FileKind {
    match path.extension().and_then(|e| e.to_str()) {
        Some(RECORD_EXTENSION) => FileKind::Record,
        Some(TEMP_EXTENSION) => FileKind::Temp,
        _ => FileKind::Foreign,
    }
}

/// Disk-backed tier bounded by total payload size.
///
/// Expects to be the only writer of its directory; see
/// [`DiskQueue`](crate::cache::disk_queue::DiskQueue).
pub struct DiskCache {
    dir: PathBuf,
    evictor: Evictor,
    index: Mutex<HashMap<PathBuf, IndexedRecord>>,
}

impl DiskCache {
    /// Open (creating if needed) a cache directory and index its records.
    ///
    /// Corrupt records and leftover temporary files are deleted. Expired
    /// records are kept; they still serve stale fallbacks until swept.
    pub async fn new(dir: impl Into<PathBuf>, max_bytes: u64) -> Result<Self, DiskError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        let disk = Self {
            dir,
            evictor: Evictor::new(max_bytes),
            index: Mutex::new(HashMap::new()),
        };

        let removed = disk.reconcile(None).await;
        let records = disk.entry_count().await;
        let bytes = disk.total_bytes().await;
        info!(
            dir = %disk.dir.display(),
            records,
            bytes,
            removed,
            "Disk cache opened"
        );
        Ok(disk)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_bytes(&self) -> u64 {
        self.evictor.max_bytes()
    }

    fn index(&self) -> MutexGuard<'_, HashMap<PathBuf, IndexedRecord>> {
        // Values are replaced whole; a poisoned map is still consistent.
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_path(&self, key: &ScreenId) -> PathBuf {
        self.dir
            .join(format!("{}.{RECORD_EXTENSION}", key.storage_key()))
    }

    /// Read a record. Corrupt records are deleted and reported as absent.
    pub async fn get(&self, key: &ScreenId) -> Option<CacheEntry> {
        let path = self.record_path(key);
        match self.read_record(&path).await {
            Ok(Some(entry)) if entry.key == *key => {
                self.index()
                    .entry(path)
                    .or_insert_with(|| IndexedRecord::for_entry(&entry, entry.created_at.into()));
                Some(entry)
            }
            Ok(Some(entry)) => {
                debug!(
                    screen_id = %key,
                    stored = %entry.key,
                    "Record belongs to a different screen id"
                );
                None
            }
            Ok(None) => {
                self.index().remove(&path);
                None
            }
            Err(DiskError::Corrupt { path, reason }) => {
                warn!(path = %path.display(), reason = %reason, "Deleting corrupt cache record");
                self.delete_file(&path).await;
                None
            }
            Err(e) => {
                warn!(screen_id = %key, error = %e, "Failed to read cache record");
                None
            }
        }
    }

    async fn read_record(&self, path: &Path) -> Result<Option<CacheEntry>, DiskError> {
        let data = match fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: DiskRecord =
            serde_json::from_slice(&data).map_err(|e| DiskError::Corrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(Some(record.into_entry()))
    }

    /// Write (replace) a record, then evict if the tier is over budget.
    ///
    /// Failures are logged and swallowed.
    pub async fn put(&self, key: &ScreenId, entry: &CacheEntry) {
        if let Err(e) = self.write_record(key, entry).await {
            warn!(screen_id = %key, error = %e, "Failed to write cache record");
            return;
        }
        self.evict_if_needed().await;
    }

    async fn write_record(&self, key: &ScreenId, entry: &CacheEntry) -> Result<(), DiskError> {
        let path = self.record_path(key);
        let tmp = self.dir.join(format!(
            "{}.{}.{TEMP_EXTENSION}",
            key.storage_key(),
            Uuid::new_v4().simple()
        ));

        let data = serde_json::to_vec(&DiskRecord::from_entry(entry)).map_err(|e| {
            DiskError::Corrupt {
                path: path.clone(),
                reason: e.to_string(),
            }
        })?;

        // The directory may have been removed from outside.
        fs::create_dir_all(&self.dir).await?;
        fs::write(&tmp, &data).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            self.delete_file(&tmp).await;
            return Err(e.into());
        }

        debug!(
            screen_id = %key,
            path = %path.display(),
            payload_bytes = entry.size_bytes,
            record_bytes = data.len(),
            "Wrote cache record"
        );
        self.index()
            .insert(path, IndexedRecord::for_entry(entry, SystemTime::now()));
        Ok(())
    }

    pub async fn remove(&self, key: &ScreenId) {
        let path = self.record_path(key);
        self.delete_file(&path).await;
    }

    /// Remove every record and temporary file. Other files in the
    /// directory are left alone.
    pub async fn clear(&self) {
        let mut deleted = 0usize;
        for path in self.list_files().await {
            if matches!(file_kind(&path), FileKind::Record | FileKind::Temp) {
                self.delete_file(&path).await;
                deleted += 1;
            }
        }
        self.index().clear();
        info!(dir = %self.dir.display(), deleted, "Disk cache cleared");
    }

    /// Whether a readable record exists for `key` (regardless of expiry).
    pub async fn has(&self, key: &ScreenId) -> bool {
        self.get(key).await.is_some()
    }

    /// Total payload bytes of all records.
    pub async fn total_bytes(&self) -> u64 {
        self.index().values().map(|r| r.payload_bytes).sum()
    }

    /// Number of records on disk.
    pub async fn entry_count(&self) -> usize {
        self.index().len()
    }

    /// Delete every expired (or unreadable) record and any leftover
    /// temporary file. Idempotent.
    ///
    /// Returns the number of records deleted.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let deleted = self.reconcile(Some(now)).await;
        if deleted > 0 {
            info!(deleted, "Swept expired cache records");
        }
        deleted
    }

    /// Rescan the directory and rebuild the index from what is readable.
    ///
    /// Deletes temporary files, corrupt records and, when `expire_at` is
    /// given, records expired at that instant. Returns the number of
    /// records (not temporary files) deleted.
    async fn reconcile(&self, expire_at: Option<DateTime<Utc>>) -> usize {
        let previous = self.index().clone();
        let mut rebuilt = HashMap::new();
        let mut deleted = 0;

        for path in self.list_files().await {
            match file_kind(&path) {
                FileKind::Foreign => continue,
                FileKind::Temp => {
                    debug!(path = %path.display(), "Removing leftover temporary file");
                    self.delete_file(&path).await;
                    continue;
                }
                FileKind::Record => {}
            }

            match self.read_record(&path).await {
                Ok(Some(entry)) if expire_at.is_some_and(|now| entry.is_expired(now)) => {
                    self.delete_file(&path).await;
                    deleted += 1;
                }
                Ok(Some(entry)) => {
                    let written_at = match previous.get(&path) {
                        Some(known) => known.written_at,
                        None => file_mtime(&path)
                            .await
                            .unwrap_or_else(|| entry.created_at.into()),
                    };
                    rebuilt.insert(path, IndexedRecord::for_entry(&entry, written_at));
                }
                // Removed underneath us.
                Ok(None) => {}
                Err(DiskError::Corrupt { reason, .. }) => {
                    warn!(path = %path.display(), reason = %reason, "Deleting corrupt cache record");
                    self.delete_file(&path).await;
                    deleted += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to read record during scan");
                    if let Some(known) = previous.get(&path) {
                        rebuilt.insert(path, *known);
                    }
                }
            }
        }

        *self.index() = rebuilt;
        deleted
    }

    /// Run one eviction pass if the tier is over budget.
    ///
    /// Returns the number of records evicted.
    pub async fn evict_if_needed(&self) -> usize {
        let (candidates, total) = {
            let index = self.index();
            let total: u64 = index.values().map(|r| r.payload_bytes).sum();
            if !self.evictor.needs_eviction(total) {
                return 0;
            }
            let candidates: Vec<EvictionCandidate> = index
                .iter()
                .map(|(path, record)| EvictionCandidate {
                    path: path.clone(),
                    size: record.payload_bytes,
                    modified: record.written_at,
                })
                .collect();
            (candidates, total)
        };

        let victims = self.evictor.select_victims(candidates, total);
        let mut freed = 0u64;
        for victim in &victims {
            self.delete_file(&victim.path).await;
            freed += victim.size;
        }

        info!(
            evicted = victims.len(),
            freed,
            before = total,
            limit = self.evictor.max_bytes(),
            "Disk eviction round complete"
        );
        victims.len()
    }

    /// Regular files directly inside the cache directory.
    async fn list_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!(dir = %self.dir.display(), error = %e, "Failed to list disk cache");
                }
                return files;
            }
        };

        loop {
            let entry = match dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read disk cache directory entry");
                    break;
                }
            };
            // Deleted between listing and stat is fine.
            match entry.file_type().await {
                Ok(kind) if kind.is_file() => files.push(entry.path()),
                _ => continue,
            }
        }

        files
    }

    async fn delete_file(&self, path: &Path) {
        self.index().remove(path);
        match fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "Deleted cache file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete cache file"),
        }
    }
}

async fn file_mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).await.ok()?.modified().ok()
}
