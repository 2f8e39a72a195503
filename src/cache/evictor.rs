//! Size-based eviction policy for the disk tier.
//!
//! Once the tier grows past its byte limit, records are removed oldest
//! modification time first until usage reaches half the limit:
//!
//! ```text
//! bytes_to_free = total_bytes - max_bytes / 2
//! ```
//!
//! Trimming only to the limit would evict again on almost every write under
//! steady load.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::time::SystemTime;

/// A record on disk that may be evicted.
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

// Older modification time = higher eviction priority.
impl PartialEq for EvictionCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EvictionCandidate {}

impl PartialOrd for EvictionCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EvictionCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .modified
            .cmp(&self.modified)
            .then_with(|| other.path.cmp(&self.path))
    }
}

/// Eviction policy bounded by total bytes.
#[derive(Debug, Clone, Copy)]
pub struct Evictor {
    max_bytes: u64,
}

impl Evictor {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Low-water mark eviction trims down to.
    pub fn target_bytes(&self) -> u64 {
        self.max_bytes / 2
    }

    pub fn needs_eviction(&self, total_bytes: u64) -> bool {
        total_bytes > self.max_bytes
    }

    /// Select the records to remove, oldest first.
    ///
    /// Returns an empty plan when `total_bytes` is within the limit.
    /// Otherwise returns the shortest oldest-first prefix whose sizes sum to
    /// at least `total_bytes - max_bytes / 2` (or every candidate, if even
    /// that is not enough).
    pub fn select_victims(
        &self,
        candidates: impl IntoIterator<Item = EvictionCandidate>,
        total_bytes: u64,
    ) -> Vec<EvictionCandidate> {
        if !self.needs_eviction(total_bytes) {
            return Vec::new();
        }

        let to_free = total_bytes - self.target_bytes();
        let mut heap: BinaryHeap<EvictionCandidate> = candidates.into_iter().collect();

        let mut victims = Vec::new();
        let mut freed = 0u64;
        while freed < to_free {
            match heap.pop() {
                Some(candidate) => {
                    freed += candidate.size;
                    victims.push(candidate);
                }
                None => break,
            }
        }

        victims
    }
}
