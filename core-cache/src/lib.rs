//! # Cache Manager
//!
//! TTL- and size-bounded cache layered on the local store, with hit/miss
//! counters and a bounded pool of chapter downloads.
//!
//! ## Overview
//!
//! - [`CacheManager::set`] / [`CacheManager::get`] handle opaque JSON entries
//!   keyed `namespace:key`. Namespaces (`books`, `chapters`, `api`,
//!   `progress`) pick their default TTL from
//!   [`EngineConfig::cache_ttl_ms`](core_runtime::EngineConfig).
//! - [`CacheManager::evict`] drops expired entries, then the oldest, until
//!   the total estimated size fits a target.
//! - [`CacheManager::download_chapter`] and
//!   [`CacheManager::cache_book_chapters`] persist chapter bodies with at
//!   most `max_concurrent_downloads` fetches in flight.
//!
//! ## Usage
//!
//! ```ignore
//! let cache = Arc::new(CacheManager::new(store, remote, clock, event_bus, config));
//! cache.start();
//!
//! cache.set("api", "/books/42", json!({"id": 42}), None).await?;
//! let report = cache.cache_book_chapters(42, &[1, 2, 3]).await;
//!
//! cache.shutdown().await;
//! ```

pub mod content;
pub mod error;
pub mod manager;
pub mod stats;

pub use content::{BatchReport, DownloadStatus, DownloadTask};
pub use error::{CacheError, Result};
pub use manager::{estimate_size, CacheManager, EvictionReport};
pub use stats::CacheStats;
