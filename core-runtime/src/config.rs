//! # Engine Configuration
//!
//! Tunables for the offline engine. Every key is camelCase on the wire so a
//! host can hand over a JSON blob:
//!
//! ```json
//! {
//!   "syncIntervalMs": 30000,
//!   "maxRetries": 3,
//!   "batchSize": 5,
//!   "maxConcurrentDownloads": 3,
//!   "cacheTtlMs": { "books": 86400000, "chapters": 604800000 },
//!   "maxCacheSizeBytes": 52428800
//! }
//! ```
//!
//! Missing keys fall back to their defaults. Host capabilities (HTTP client,
//! secure store, ...) are not configuration; they are handed to the engine
//! context builder directly.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::config::EngineConfig;
//!
//! let config = EngineConfig::default()
//!     .with_api_base_url("https://api.folio.example/api")
//!     .with_max_retries(5);
//! config.validate().unwrap();
//! assert_eq!(config.ttl_for("chapters").as_secs(), 7 * 24 * 3600);
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

const MINUTE_MS: u64 = 60 * 1000;
const HOUR_MS: u64 = 60 * MINUTE_MS;
const DAY_MS: u64 = 24 * HOUR_MS;

/// Namespace used when a cache namespace has no TTL of its own.
pub const DEFAULT_TTL_NAMESPACE: &str = "default";

fn default_cache_ttls() -> HashMap<String, u64> {
    HashMap::from([
        ("books".to_string(), DAY_MS),
        ("chapters".to_string(), 7 * DAY_MS),
        ("progress".to_string(), HOUR_MS),
        (DEFAULT_TTL_NAMESPACE.to_string(), HOUR_MS),
    ])
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Periodic queue replay while online
    pub sync_interval_ms: u64,
    /// Replay attempts before an operation is dead-lettered
    pub max_retries: u32,
    /// Chapters per download batch
    pub batch_size: usize,
    /// Pause between download batches
    pub batch_delay_ms: u64,
    /// System-wide cap on concurrent chapter downloads
    pub max_concurrent_downloads: usize,
    /// TTL per cache namespace; `default` applies to unlisted namespaces
    pub cache_ttl_ms: HashMap<String, u64>,
    /// Budget for the sum of cache entry sizes
    pub max_cache_size_bytes: u64,
    /// Expired-entry sweep interval
    pub cleanup_interval_ms: u64,
    /// Deadline for remote API calls
    pub request_timeout_ms: u64,
    /// Deadline for reachability probes
    pub probe_timeout_ms: u64,
    /// Minimum spacing between reachability probes
    pub probe_debounce_ms: u64,
    /// First reconnect delay
    pub backoff_base_ms: u64,
    /// Reconnect delay cap
    pub backoff_max_ms: u64,
    /// Remote API root; required to build a live connector
    pub api_base_url: Option<String>,
    /// SQLite file; `None` keeps the store in memory
    pub database_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_interval_ms: 30_000,
            max_retries: 3,
            batch_size: 5,
            batch_delay_ms: 300,
            max_concurrent_downloads: 3,
            cache_ttl_ms: default_cache_ttls(),
            max_cache_size_bytes: 50 * 1024 * 1024,
            cleanup_interval_ms: 5 * MINUTE_MS,
            request_timeout_ms: 30_000,
            probe_timeout_ms: 5_000,
            probe_debounce_ms: 500,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
            api_base_url: None,
            database_path: None,
        }
    }
}

impl EngineConfig {
    /// Parse a host-supplied JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid engine configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// TTL for a cache namespace, falling back to the `default` entry.
    pub fn ttl_for(&self, namespace: &str) -> Duration {
        let ms = self
            .cache_ttl_ms
            .get(namespace)
            .or_else(|| self.cache_ttl_ms.get(DEFAULT_TTL_NAMESPACE))
            .copied()
            .unwrap_or(HOUR_MS);
        Duration::from_millis(ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn probe_debounce(&self) -> Duration {
        Duration::from_millis(self.probe_debounce_ms)
    }

    pub fn with_sync_interval_ms(mut self, ms: u64) -> Self {
        self.sync_interval_ms = ms;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_batch_delay_ms(mut self, ms: u64) -> Self {
        self.batch_delay_ms = ms;
        self
    }

    pub fn with_max_concurrent_downloads(mut self, max: usize) -> Self {
        self.max_concurrent_downloads = max;
        self
    }

    /// Override the TTL of one namespace.
    pub fn with_cache_ttl_ms(mut self, namespace: impl Into<String>, ms: u64) -> Self {
        self.cache_ttl_ms.insert(namespace.into(), ms);
        self
    }

    pub fn with_max_cache_size_bytes(mut self, bytes: u64) -> Self {
        self.max_cache_size_bytes = bytes;
        self
    }

    pub fn with_cleanup_interval_ms(mut self, ms: u64) -> Self {
        self.cleanup_interval_ms = ms;
        self
    }

    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }

    pub fn with_probe_timeout_ms(mut self, ms: u64) -> Self {
        self.probe_timeout_ms = ms;
        self
    }

    pub fn with_probe_debounce_ms(mut self, ms: u64) -> Self {
        self.probe_debounce_ms = ms;
        self
    }

    pub fn with_backoff_ms(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.backoff_base_ms = base_ms;
        self.backoff_max_ms = max_ms;
        self
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        let non_zero = [
            ("syncIntervalMs", self.sync_interval_ms),
            ("maxRetries", u64::from(self.max_retries)),
            ("batchSize", self.batch_size as u64),
            ("maxConcurrentDownloads", self.max_concurrent_downloads as u64),
            ("maxCacheSizeBytes", self.max_cache_size_bytes),
            ("cleanupIntervalMs", self.cleanup_interval_ms),
            ("requestTimeoutMs", self.request_timeout_ms),
            ("probeTimeoutMs", self.probe_timeout_ms),
            ("backoffBaseMs", self.backoff_base_ms),
        ];
        for (key, value) in non_zero {
            if value == 0 {
                return Err(Error::Config(format!("{} must be greater than 0", key)));
            }
        }

        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(Error::Config(
                "backoffMaxMs must not be smaller than backoffBaseMs".to_string(),
            ));
        }

        if let Some((namespace, _)) = self.cache_ttl_ms.iter().find(|(_, ttl)| **ttl == 0) {
            return Err(Error::Config(format!(
                "cacheTtlMs.{} must be greater than 0",
                namespace
            )));
        }

        if let Some(url) = &self.api_base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::Config(format!(
                    "apiBaseUrl must be an http(s) URL, got '{}'",
                    url
                )));
            }
        }

        if matches!(&self.database_path, Some(p) if p.as_os_str().is_empty()) {
            return Err(Error::Config("databasePath cannot be empty".to_string()));
        }

        Ok(())
    }
}
