//! Cache entry types.
//!
//! An entry is an immutable snapshot of one screen document together with
//! the time it was cached and how long it stays fresh. Entries are the unit
//! of movement between tiers: a `put` replaces an entry, it never edits one.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Identifies which remote-authored document to retrieve.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScreenId(String);

impl ScreenId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File-system safe form of the identifier.
    ///
    /// Path separators (and other characters that cannot appear in a file
    /// name on common platforms) become `_`. Distinct ids may map to the same
    /// storage key; the disk tier stores the original id in each record to
    /// detect that.
    pub fn storage_key(&self) -> String {
        let sanitized: String = self
            .0
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                c if c.is_control() => '_',
                c => c,
            })
            .collect();

        match sanitized.as_str() {
            "" | "." | ".." => format!("_{sanitized}"),
            _ => sanitized,
        }
    }
}

impl fmt::Display for ScreenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScreenId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ScreenId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A syntactically valid JSON document, treated as opaque text.
///
/// Cloning is cheap and never copies the payload, so readers always see a
/// complete value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Document(Arc<str>);

impl Document {
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Document {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for Document {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// One cached document.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: ScreenId,
    pub payload: Document,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
    /// Encoded payload length; used for disk-size accounting only.
    pub size_bytes: usize,
}

impl CacheEntry {
    /// Create an entry stamped with the current time.
    pub fn new(key: ScreenId, payload: Document, ttl: Duration) -> Self {
        Self::with_created_at(key, payload, Utc::now(), ttl)
    }

    pub fn with_created_at(
        key: ScreenId,
        payload: Document,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let size_bytes = payload.len();
        Self {
            key,
            payload,
            created_at,
            ttl,
            size_bytes,
        }
    }

    /// `now - created_at > ttl`. Monotonic in `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let ttl = TimeDelta::from_std(self.ttl).unwrap_or(TimeDelta::MAX);
        now.signed_duration_since(self.created_at) > ttl
    }

    pub fn is_expired_now(&self) -> bool {
        self.is_expired(Utc::now())
    }
}

/// Which tier (or the network) satisfied a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Memory,
    Disk,
    Network,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Memory => write!(f, "memory"),
            Provenance::Disk => write!(f, "disk"),
            Provenance::Network => write!(f, "network"),
        }
    }
}

/// Point-in-time cache statistics.
///
/// Best-effort: counts taken from the two tiers are not read atomically with
/// respect to concurrent mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub memory_entries: usize,
    pub disk_entries: usize,
    pub total_disk_bytes: u64,
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Fraction of lookups served from either tier (0.0 - 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.memory_hits + self.disk_hits;
        let total = hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }
}
