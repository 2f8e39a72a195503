//! screen-config-cache: retrieval and caching engine for server-authored screens.
//!
//! Obtains the current JSON document for a screen id, deciding per policy
//! whether to trust a cached copy or go to the network, and keeps two
//! bounded, expiring storage tiers:
//!   Memory (LRU, process lifetime) → Disk (record per screen, size bounded)
//!
//! Documents are opaque text; only JSON well-formedness is checked.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod runtime;

pub use cache::entry::{CacheStats, Document, Provenance, ScreenId};
pub use config::{CachePolicy, Config};
pub use engine::{EngineBuilder, Resolved, ScreenConfigEngine};
pub use error::{Error, FetchError, Result};
pub use fetch::source::{DocumentSource, FetchOutcome};
