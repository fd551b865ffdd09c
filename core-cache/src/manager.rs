//! # Cache Manager
//!
//! TTL- and size-bounded cache over the local store's `cache_entries`
//! collection, plus the chapter download pool (see [`crate::content`]).
//!
//! - Entries live while `now - timestamp < ttl`. An expired entry found by
//!   `get` is deleted on the spot and counted as a miss.
//! - The sum of entry sizes never exceeds `max_cache_size_bytes`. A `set` that
//!   would cross it first evicts TTL-expired entries, then the oldest by
//!   write time.
//! - A write rejected with `StorageFull` triggers one eviction pass and one
//!   retry before the failure is surfaced.
//!
//! This manager is the only writer of the cache-entry collection, so the
//! running byte total it keeps in memory stays exact.

use bridge_traits::{Clock, RemoteApi};
use core_library::{CacheEntry, Collection, IndexQuery, LocalStore, LocalStoreExt};
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use core_runtime::EngineConfig;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::content::{DownloadTask, SharedDownload};
use crate::error::{CacheError, Result};
use crate::stats::CacheStats;

/// Running totals for the cache-entry collection.
#[derive(Debug, Default)]
pub(crate) struct Usage {
    loaded: bool,
    pub(crate) total_bytes: u64,
    pub(crate) entries: u64,
}

/// Outcome of an eviction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub entries_removed: u64,
    pub bytes_freed: u64,
    pub total_bytes: u64,
}

/// TTL/size-bounded cache with bounded-concurrency chapter downloads.
pub struct CacheManager {
    pub(crate) store: Arc<dyn LocalStore>,
    pub(crate) remote: Arc<dyn RemoteApi>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) event_bus: EventBus,
    pub(crate) config: EngineConfig,
    pub(crate) usage: Mutex<Usage>,
    hits: AtomicU64,
    misses: AtomicU64,
    pub(crate) download_slots: Semaphore,
    pub(crate) in_flight: Mutex<HashMap<i64, SharedDownload>>,
    pub(crate) tasks: SyncMutex<HashMap<i64, DownloadTask>>,
    pub(crate) deferred: SyncMutex<BTreeSet<i64>>,
    pub(crate) cancel: CancellationToken,
    cleanup: SyncMutex<Option<JoinHandle<()>>>,
}

/// Estimated stored size of a payload: its compact JSON length.
pub fn estimate_size(data: &Value) -> Result<u64> {
    Ok(serde_json::to_vec(data)?.len() as u64)
}

impl CacheManager {
    /// Create a cache manager.
    ///
    /// # Arguments
    ///
    /// * `store` - Local store holding cache entries, books and chapters
    /// * `remote` - Remote API used for chapter downloads
    /// * `clock` - Time source for entry timestamps and TTL checks
    /// * `event_bus` - Receives download and eviction events
    /// * `config` - TTLs, size budget, download concurrency and batching
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteApi>,
        clock: Arc<dyn Clock>,
        event_bus: EventBus,
        config: EngineConfig,
    ) -> Self {
        let slots = config.max_concurrent_downloads.max(1);
        Self {
            store,
            remote,
            clock,
            event_bus,
            config,
            usage: Mutex::new(Usage::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            download_slots: Semaphore::new(slots),
            in_flight: Mutex::new(HashMap::new()),
            tasks: SyncMutex::new(HashMap::new()),
            deferred: SyncMutex::new(BTreeSet::new()),
            cancel: CancellationToken::new(),
            cleanup: SyncMutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn now_ms(&self) -> i64 {
        self.clock.unix_timestamp_millis()
    }

    pub(crate) fn emit(&self, event: CacheEvent) {
        self.event_bus.emit(CoreEvent::Cache(event)).ok();
    }

    /// Eviction target used when the store itself reports it is full.
    pub(crate) fn pressure_target(&self) -> u64 {
        self.config.max_cache_size_bytes / 4 * 3
    }

    async fn ensure_loaded(&self, usage: &mut Usage) -> Result<()> {
        if usage.loaded {
            return Ok(());
        }
        let entries: Vec<CacheEntry> = self.store.get_all().await?;
        usage.total_bytes = entries.iter().map(|e| e.size).sum();
        usage.entries = entries.len() as u64;
        usage.loaded = true;
        debug!(
            entries = usage.entries,
            total_bytes = usage.total_bytes,
            "Cache usage loaded"
        );
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Entries
    // -------------------------------------------------------------------------

    /// Store `data` under `namespace:key`.
    ///
    /// `ttl` defaults to the namespace TTL from configuration. Makes room
    /// within the size budget first, and on `StorageFull` evicts once more
    /// and retries once.
    #[instrument(skip(self, data), fields(namespace = %namespace, key = %key))]
    pub async fn set(
        &self,
        namespace: &str,
        key: &str,
        data: Value,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let full_key = CacheEntry::compose_key(namespace, key);
        let size = estimate_size(&data)?;
        let max = self.config.max_cache_size_bytes;
        if size > max {
            return Err(CacheError::EntryTooLarge {
                key: full_key,
                size,
                max,
            });
        }
        let ttl = ttl.unwrap_or_else(|| self.config.ttl_for(namespace));

        let mut usage = self.usage.lock().await;
        self.ensure_loaded(&mut usage).await?;

        let previous = self
            .store
            .get::<CacheEntry>(&full_key)
            .await?
            .map(|entry| entry.size);
        let previous_size = previous.unwrap_or(0);

        let entry = CacheEntry {
            key: full_key.clone(),
            namespace: namespace.to_string(),
            data,
            timestamp: self.now_ms(),
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            size,
        };

        if usage.total_bytes - previous_size + size > max {
            self.evict_locked(&mut usage, max - size + previous_size, Some(&full_key))
                .await?;
        }

        match self.write_entry(&mut usage, &entry, previous).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_storage_full() => {
                warn!(key = %full_key, "Storage full; evicting before retry");
                let target = self
                    .pressure_target()
                    .min(usage.total_bytes.saturating_sub(size));
                self.evict_locked(&mut usage, target, Some(&full_key)).await?;
                match self.write_entry(&mut usage, &entry, previous).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.is_storage_full() => {
                        warn!(key = %full_key, "Cache write failed after eviction");
                        self.emit(CacheEvent::StorageFull {
                            key: full_key.clone(),
                        });
                        Err(CacheError::StorageFull { key: full_key })
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn write_entry(
        &self,
        usage: &mut Usage,
        entry: &CacheEntry,
        previous: Option<u64>,
    ) -> Result<()> {
        self.store.put(entry).await?;
        usage.total_bytes = usage.total_bytes - previous.unwrap_or(0) + entry.size;
        if previous.is_none() {
            usage.entries += 1;
        }
        debug!(key = %entry.key, size = entry.size, total_bytes = usage.total_bytes, "Cache entry stored");
        Ok(())
    }

    /// Serialize `value` and [`set`](Self::set) it.
    pub async fn set_as<T: Serialize + ?Sized>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let data = serde_json::to_value(value)?;
        self.set(namespace, key, data, ttl).await
    }

    /// Live entry for `namespace:key`, or `None`.
    ///
    /// An expired entry is deleted before returning `None`.
    pub async fn get_entry(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>> {
        let full_key = CacheEntry::compose_key(namespace, key);
        match self.store.get::<CacheEntry>(&full_key).await? {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Some(entry) if entry.is_expired(self.now_ms()) => {
                debug!(key = %full_key, "Cache entry expired");
                self.remove_if_unchanged(&entry).await?;
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry))
            }
        }
    }

    pub async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>> {
        Ok(self.get_entry(namespace, key).await?.map(|entry| entry.data))
    }

    /// [`get`](Self::get) and deserialize.
    pub async fn get_as<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Result<Option<T>> {
        match self.get(namespace, key).await? {
            Some(data) => Ok(Some(serde_json::from_value(data)?)),
            None => Ok(None),
        }
    }

    /// Drop one entry. Returns whether it existed.
    pub async fn remove(&self, namespace: &str, key: &str) -> Result<bool> {
        let full_key = CacheEntry::compose_key(namespace, key);
        let mut usage = self.usage.lock().await;
        self.ensure_loaded(&mut usage).await?;
        match self.store.get::<CacheEntry>(&full_key).await? {
            Some(entry) => self.delete_locked(&mut usage, &entry).await,
            None => Ok(false),
        }
    }

    async fn remove_if_unchanged(&self, stale: &CacheEntry) -> Result<()> {
        let mut usage = self.usage.lock().await;
        self.ensure_loaded(&mut usage).await?;
        // A concurrent set may have replaced the entry since it was read.
        if let Some(current) = self.store.get::<CacheEntry>(&stale.key).await? {
            if current.timestamp == stale.timestamp {
                self.delete_locked(&mut usage, &current).await?;
            }
        }
        Ok(())
    }

    async fn delete_locked(&self, usage: &mut Usage, entry: &CacheEntry) -> Result<bool> {
        let removed = self
            .store
            .delete(Collection::CacheEntries, &entry.key)
            .await?;
        if removed {
            usage.total_bytes = usage.total_bytes.saturating_sub(entry.size);
            usage.entries = usage.entries.saturating_sub(1);
        }
        Ok(removed)
    }

    // -------------------------------------------------------------------------
    // Eviction
    // -------------------------------------------------------------------------

    /// Delete entries until the total size is at most `target_size`.
    ///
    /// TTL-expired entries go first, then the rest oldest first.
    #[instrument(skip(self))]
    pub async fn evict(&self, target_size: u64) -> Result<EvictionReport> {
        let mut usage = self.usage.lock().await;
        self.evict_locked(&mut usage, target_size, None).await
    }

    pub(crate) async fn evict_locked(
        &self,
        usage: &mut Usage,
        target_size: u64,
        protect: Option<&str>,
    ) -> Result<EvictionReport> {
        self.ensure_loaded(usage).await?;
        let mut report = EvictionReport {
            total_bytes: usage.total_bytes,
            ..Default::default()
        };
        if usage.total_bytes <= target_size {
            return Ok(report);
        }

        let now = self.now_ms();
        let oldest_first: Vec<CacheEntry> = self
            .store
            .get_all_by_index("timestamp", IndexQuery::All)
            .await?;
        let (expired, live): (Vec<_>, Vec<_>) = oldest_first
            .into_iter()
            .partition(|entry| entry.is_expired(now));

        for entry in expired.iter().chain(live.iter()) {
            if usage.total_bytes <= target_size {
                break;
            }
            if protect == Some(entry.key.as_str()) {
                continue;
            }
            if self.delete_locked(usage, entry).await? {
                report.entries_removed += 1;
                report.bytes_freed += entry.size;
            }
        }
        report.total_bytes = usage.total_bytes;

        info!(
            entries_removed = report.entries_removed,
            bytes_freed = report.bytes_freed,
            total_bytes = report.total_bytes,
            target_size,
            "Cache eviction pass finished"
        );
        self.emit(CacheEvent::Evicted {
            entries_removed: report.entries_removed,
            bytes_freed: report.bytes_freed,
            total_bytes: report.total_bytes,
        });
        Ok(report)
    }

    /// Delete every expired entry. Returns how many were removed.
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self) -> Result<u64> {
        let mut usage = self.usage.lock().await;
        self.ensure_loaded(&mut usage).await?;

        let now = self.now_ms();
        let entries: Vec<CacheEntry> = self.store.get_all().await?;
        let mut removed = 0;
        for entry in entries.iter().filter(|entry| entry.is_expired(now)) {
            if self.delete_locked(&mut usage, entry).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "Expired cache entries swept");
        }
        Ok(removed)
    }

    /// Remove every cache entry.
    pub async fn clear(&self) -> Result<()> {
        let mut usage = self.usage.lock().await;
        self.store.clear(Collection::CacheEntries).await?;
        *usage = Usage {
            loaded: true,
            total_bytes: 0,
            entries: 0,
        };
        info!("Cache cleared");
        Ok(())
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let mut usage = self.usage.lock().await;
        self.ensure_loaded(&mut usage).await?;
        Ok(CacheStats {
            entries: usage.entries,
            total_bytes: usage.total_bytes,
            max_bytes: self.config.max_cache_size_bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            active_downloads: self.tasks.lock().len(),
            deferred_downloads: self.deferred.lock().len(),
        })
    }

    // -------------------------------------------------------------------------
    // Background maintenance
    // -------------------------------------------------------------------------

    /// Spawn the periodic cleanup loop.
    pub fn start(self: &Arc<Self>) {
        let mut cleanup = self.cleanup.lock();
        if cleanup.is_some() {
            return;
        }
        let manager = Arc::clone(self);
        let period = self.config.cleanup_interval();
        *cleanup = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = manager.cancel.cancelled() => break,
                    _ = ticker.tick() => manager.run_maintenance().await,
                }
            }
            debug!("Cache cleanup loop stopped");
        }));
        info!(interval_ms = period.as_millis() as u64, "Cache cleanup loop started");
    }

    async fn run_maintenance(&self) {
        if let Err(e) = self.sweep_expired().await {
            warn!(error = %e, "Expired-entry sweep failed");
        }
        if let Err(e) = self.evict(self.config.max_cache_size_bytes).await {
            warn!(error = %e, "Budget eviction failed");
        }
    }

    /// Stop the cleanup loop and refuse new downloads.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.download_slots.close();
        let handle = self.cleanup.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Cache cleanup loop ended abnormally");
            }
        }
        info!("Cache manager stopped");
    }
}
