//! Runtime configuration for the screen document engine.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! Endpoint, timeouts, retry, cache policy and tier bounds all live here.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "screen-config", about = "Fetch and cache server-authored screen documents")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Resolve a screen document and print it to stdout.
    Resolve {
        /// Screen identifier.
        screen: String,

        /// Override the configured cache policy.
        #[arg(long, value_enum)]
        policy: Option<CachePolicy>,
    },
    /// Print cache statistics as JSON.
    Stats,
    /// Drop one screen from both cache tiers.
    Invalidate { screen: String },
    /// Drop every cached screen.
    Clear,
    /// Delete expired entries from both tiers.
    Sweep,
}

/// Which source is consulted first when resolving a screen.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Valid cache entry, else network, else stale cache.
    #[default]
    CacheFirst,
    /// Network, else any cache entry (fresh or stale).
    NetworkFirst,
    /// Valid cache entry or an error; never touches the network.
    CacheOnly,
    /// Network only; results are still written to the cache.
    NetworkOnly,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network and retry settings.
    pub network: NetworkConfig,

    /// Cache tier settings.
    pub cache: CacheConfig,

    /// Worker pool settings.
    pub runtime: RuntimeConfig,
}

/// Fetcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Base endpoint; the screen id is appended as a path segment.
    pub base_url: String,

    /// TCP/TLS connect timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Longest wait for any single read from the connection, in milliseconds.
    pub read_timeout_ms: u64,

    /// Overall deadline for blocking entry points in milliseconds.
    pub sync_timeout_ms: u64,

    /// Attempts per fetch, including the first one.
    pub max_attempts: u32,

    /// Backoff unit: attempt n waits `base * 2^(n-1)` before retrying.
    pub retry_base_delay_ms: u64,

    /// Identity sent with every request.
    pub client: ClientInfo,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            connect_timeout_ms: 10_000,
            read_timeout_ms: 15_000,
            sync_timeout_ms: 30_000,
            max_attempts: 3,
            retry_base_delay_ms: 1_000,
            client: ClientInfo::default(),
        }
    }
}

/// Client identity reported as query parameters and headers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientInfo {
    pub platform: String,
    pub client_version: String,
    pub os_version: String,
    pub device_model: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            platform: std::env::consts::OS.to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            os_version: "unknown".to_string(),
            device_model: std::env::consts::ARCH.to_string(),
        }
    }
}

/// Cache tier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Orchestration strategy used by `resolve`.
    pub policy: CachePolicy,

    /// Time-to-live applied to newly cached documents, in milliseconds.
    pub default_ttl_ms: u64,

    /// Maximum entries in the memory tier.
    pub max_memory_entries: usize,

    /// Byte budget of the disk tier.
    pub max_disk_bytes: u64,

    /// Directory holding disk records. Must not be shared by two live engines.
    pub disk_path: PathBuf,

    /// Interval of the background expiry sweep (`None` = disabled).
    pub sweep_interval_ms: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            policy: CachePolicy::CacheFirst,
            default_ttl_ms: 60 * 60 * 1000, // 1 hour
            max_memory_entries: 50,
            max_disk_bytes: 50 * 1024 * 1024, // 50 MiB
            disk_path: std::env::temp_dir().join("screen-config-cache"),
            sweep_interval_ms: None,
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Threads in the pool running fetches and disk I/O.
    pub worker_threads: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { worker_threads: 2 }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Parse and check the base endpoint.
    pub fn base_url(&self) -> Result<Url> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| Error::Config(format!("base_url {:?}: {e}", self.base_url)))?;
        if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "base_url {:?} must be an http(s) URL",
                self.base_url
            )));
        }
        Ok(url)
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_ms.map(Duration::from_millis)
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.network.base_url()?;

        let checks = [
            (self.network.connect_timeout_ms == 0, "network.connect_timeout_ms must be positive"),
            (self.network.read_timeout_ms == 0, "network.read_timeout_ms must be positive"),
            (self.network.max_attempts == 0, "network.max_attempts must be at least 1"),
            (self.network.sync_timeout_ms == 0, "network.sync_timeout_ms must be positive"),
            (self.cache.max_memory_entries == 0, "cache.max_memory_entries must be at least 1"),
            (self.cache.max_disk_bytes == 0, "cache.max_disk_bytes must be positive"),
            (self.cache.sweep_interval_ms == Some(0), "cache.sweep_interval_ms must be positive"),
            (self.runtime.worker_threads == 0, "runtime.worker_threads must be at least 1"),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(Error::Config((*message).to_string())),
            None => Ok(()),
        }
    }
}
