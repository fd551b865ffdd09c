//! Book and chapter persistence, plus the chapter download pool.
//!
//! Downloads run on spawned tasks gated by a semaphore of
//! `max_concurrent_downloads` permits. Concurrent requests for one chapter
//! share a single in-flight future, so the remote sees one fetch and the
//! store one write.

use bridge_traits::{BookId, ChapterId, RemoteBook, RemoteChapter};
use core_library::{Book, Chapter, LocalStoreExt, RawRecord, Record};
use core_runtime::events::CacheEvent;
use futures::future::{join_all, BoxFuture, Shared};
use futures::FutureExt;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::{CacheError, Result};
use crate::manager::CacheManager;

pub(crate) type SharedDownload = Shared<BoxFuture<'static, Result<Chapter>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Completed,
    Error,
}

/// A chapter body being fetched and persisted. Dropped once it settles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadTask {
    pub book_id: Option<BookId>,
    pub chapter_id: ChapterId,
    /// 0-100
    pub progress: u8,
    pub status: DownloadStatus,
}

/// Per-chapter outcome of a batched download.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub succeeded: Vec<ChapterId>,
    pub failed: Vec<(ChapterId, String)>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

fn is_downloaded(chapter: &Chapter) -> bool {
    chapter.downloaded
}

impl CacheManager {
    // -------------------------------------------------------------------------
    // Records
    // -------------------------------------------------------------------------

    /// Write a record, evicting cache entries and retrying once if the store
    /// is full.
    pub(crate) async fn persist<R: Record>(&self, record: &R) -> Result<()> {
        match self.store.put(record).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_storage_full() => {}
            Err(e) => return Err(e.into()),
        }

        let size = RawRecord::encode(record)?.size_bytes();
        warn!(collection = %R::COLLECTION, key = %record.key(), "Storage full; evicting before retry");
        {
            let mut usage = self.usage.lock().await;
            let target = self
                .pressure_target()
                .min(usage.total_bytes.saturating_sub(size));
            self.evict_locked(&mut usage, target, None).await?;
        }

        match self.store.put(record).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_storage_full() => {
                let key = format!("{}:{}", R::COLLECTION, record.key());
                self.emit(CacheEvent::StorageFull { key: key.clone() });
                Err(CacheError::StorageFull { key })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Persist book metadata from a successful fetch.
    pub async fn store_book(&self, remote: RemoteBook) -> Result<Book> {
        let book = Book::from_remote(remote, self.now_ms());
        self.persist(&book).await?;
        Ok(book)
    }

    pub async fn cached_book(&self, book_id: BookId) -> Result<Option<Book>> {
        Ok(self.store.get::<Book>(&book_id.to_string()).await?)
    }

    /// Persist a chapter from a successful fetch.
    ///
    /// Chapter listings come without bodies; storing one never discards a
    /// body that was already downloaded.
    pub async fn store_chapter(&self, remote: RemoteChapter) -> Result<Chapter> {
        let mut chapter = Chapter::from_remote(remote, self.now_ms());
        if !chapter.downloaded {
            let existing = self.store.get::<Chapter>(&chapter.id.to_string()).await?;
            if let Some(existing) = existing.filter(is_downloaded) {
                chapter.content = existing.content;
                chapter.downloaded = true;
            }
        }
        self.persist(&chapter).await?;
        Ok(chapter)
    }

    /// Persist a chapter fetched on its own. Its body is kept as is, even
    /// when empty.
    pub async fn store_downloaded_chapter(&self, remote: RemoteChapter) -> Result<Chapter> {
        let chapter = Chapter::from_download(remote, self.now_ms());
        self.persist(&chapter).await?;
        Ok(chapter)
    }

    /// The stored chapter, if its body has been downloaded.
    pub async fn cached_chapter(&self, chapter_id: ChapterId) -> Result<Option<Chapter>> {
        let chapter = self.store.get::<Chapter>(&chapter_id.to_string()).await?;
        Ok(chapter.filter(is_downloaded))
    }

    pub async fn is_chapter_cached(&self, chapter_id: ChapterId) -> Result<bool> {
        Ok(self.cached_chapter(chapter_id).await?.is_some())
    }

    /// Downloaded chapters of a book in ordinal order.
    pub async fn cached_chapters(&self, book_id: BookId) -> Result<Vec<Chapter>> {
        let chapters = self.store.chapters_for_book(book_id).await?;
        Ok(chapters.into_iter().filter(is_downloaded).collect())
    }

    /// Every stored chapter of a book in ordinal order, with or without body.
    pub async fn chapter_listing(&self, book_id: BookId) -> Result<Vec<Chapter>> {
        Ok(self.store.chapters_for_book(book_id).await?)
    }

    /// Whether chapters `1..=chapter_count` are all downloaded with no gaps.
    pub async fn is_book_fully_cached(&self, book_id: BookId, chapter_count: u32) -> Result<bool> {
        let chapters = self.cached_chapters(book_id).await?;
        let mut expected = 1;
        for chapter in &chapters {
            if chapter.chapter_number == expected {
                expected += 1;
            } else if chapter.chapter_number > expected {
                break;
            }
        }
        Ok(expected > chapter_count)
    }

    // -------------------------------------------------------------------------
    // Downloads
    // -------------------------------------------------------------------------

    /// Fetch and persist a chapter body.
    ///
    /// Returns the stored chapter without touching the network when its body
    /// is already cached. Concurrent calls for the same id join one fetch.
    pub async fn download_chapter(self: &Arc<Self>, chapter_id: ChapterId) -> Result<Chapter> {
        self.download(chapter_id, None).await
    }

    async fn download(self: &Arc<Self>, chapter_id: ChapterId, book_id: Option<BookId>) -> Result<Chapter> {
        if let Some(chapter) = self.cached_chapter(chapter_id).await? {
            return Ok(chapter);
        }
        if self.cancel.is_cancelled() {
            return Err(CacheError::ShutDown);
        }

        let download = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(&chapter_id).cloned() {
                Some(existing) => {
                    debug!(chapter_id, "Joining in-flight download");
                    existing
                }
                None => {
                    // A download may have settled between the first check and the lock.
                    if let Some(chapter) = self.cached_chapter(chapter_id).await? {
                        return Ok(chapter);
                    }
                    self.track(chapter_id, book_id, DownloadStatus::Pending, 0);
                    let manager = Arc::clone(self);
                    let handle =
                        tokio::spawn(async move { manager.run_download(chapter_id, book_id).await });
                    let download = async move {
                        handle
                            .await
                            .unwrap_or_else(|e| Err(CacheError::Internal(e.to_string())))
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(chapter_id, download.clone());
                    download
                }
            }
        };
        download.await
    }

    async fn run_download(&self, chapter_id: ChapterId, book_id: Option<BookId>) -> Result<Chapter> {
        let result = self.fetch_and_persist(chapter_id, book_id).await;

        self.in_flight.lock().await.remove(&chapter_id);
        self.tasks.lock().remove(&chapter_id);

        match &result {
            Ok(chapter) => {
                self.deferred.lock().remove(&chapter_id);
                let size_bytes = chapter.content.len() as u64;
                info!(chapter_id, book_id = chapter.book_id, size_bytes, "Chapter downloaded");
                self.emit(CacheEvent::DownloadCompleted {
                    book_id: chapter.book_id,
                    chapter_id,
                    size_bytes,
                });
            }
            Err(e) => {
                let deferred = e.is_connectivity();
                if deferred {
                    self.deferred.lock().insert(chapter_id);
                }
                warn!(chapter_id, deferred, error = %e, "Chapter download failed");
                self.emit(CacheEvent::DownloadFailed {
                    chapter_id,
                    message: e.to_string(),
                    deferred,
                });
            }
        }
        result
    }

    async fn fetch_and_persist(&self, chapter_id: ChapterId, book_id: Option<BookId>) -> Result<Chapter> {
        let _permit = self
            .download_slots
            .acquire()
            .await
            .map_err(|_| CacheError::ShutDown)?;
        if self.cancel.is_cancelled() {
            return Err(CacheError::ShutDown);
        }

        self.track(chapter_id, book_id, DownloadStatus::Downloading, 10);
        let remote = self.remote.get_chapter(chapter_id).await?;
        let book_id = Some(remote.book_id);
        self.track(chapter_id, book_id, DownloadStatus::Downloading, 50);

        let chapter = self.store_downloaded_chapter(remote).await?;
        self.track(chapter_id, book_id, DownloadStatus::Completed, 100);
        Ok(chapter)
    }

    fn track(&self, chapter_id: ChapterId, book_id: Option<BookId>, status: DownloadStatus, progress: u8) {
        self.tasks.lock().insert(
            chapter_id,
            DownloadTask {
                book_id,
                chapter_id,
                progress,
                status,
            },
        );
        self.emit(CacheEvent::DownloadProgress {
            book_id,
            chapter_id,
            percent: progress,
        });
    }

    /// Download a book's chapters in batches of `batch_size`, pausing
    /// `batch_delay` between batches. One chapter failing does not stop the
    /// others.
    #[instrument(skip(self, chapter_ids), fields(chapters = chapter_ids.len()))]
    pub async fn cache_book_chapters(
        self: &Arc<Self>,
        book_id: BookId,
        chapter_ids: &[ChapterId],
    ) -> BatchReport {
        let report = self.run_batches(chapter_ids, Some(book_id)).await;
        info!(
            book_id,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Book chapters cached"
        );
        report
    }

    /// Retry downloads that failed for lack of connectivity.
    pub async fn resume_deferred_downloads(self: &Arc<Self>) -> BatchReport {
        let ids: Vec<ChapterId> = std::mem::take(&mut *self.deferred.lock())
            .into_iter()
            .collect();
        if ids.is_empty() {
            return BatchReport::default();
        }
        info!(count = ids.len(), "Resuming deferred chapter downloads");
        self.run_batches(&ids, None).await
    }

    async fn run_batches(self: &Arc<Self>, chapter_ids: &[ChapterId], book_id: Option<BookId>) -> BatchReport {
        let mut report = BatchReport::default();
        let batch_size = self.config.batch_size.max(1);
        let batch_delay = self.config.batch_delay();

        for (index, batch) in chapter_ids.chunks(batch_size).enumerate() {
            let stopped = if index > 0 {
                tokio::select! {
                    _ = self.cancel.cancelled() => true,
                    _ = tokio::time::sleep(batch_delay) => false,
                }
            } else {
                self.cancel.is_cancelled()
            };
            if stopped {
                let done = index * batch_size;
                report.failed.extend(
                    chapter_ids[done..]
                        .iter()
                        .map(|&id| (id, CacheError::ShutDown.to_string())),
                );
                break;
            }

            let results = join_all(batch.iter().map(|&id| self.download(id, book_id))).await;
            for (&id, result) in batch.iter().zip(results) {
                match result {
                    Ok(_) => report.succeeded.push(id),
                    Err(e) => report.failed.push((id, e.to_string())),
                }
            }
        }
        report
    }

    pub fn download_progress(&self, chapter_id: ChapterId) -> Option<DownloadTask> {
        self.tasks.lock().get(&chapter_id).cloned()
    }

    pub fn active_downloads(&self) -> Vec<DownloadTask> {
        let mut tasks: Vec<DownloadTask> = self.tasks.lock().values().cloned().collect();
        tasks.sort_by_key(|task| task.chapter_id);
        tasks
    }

    /// Chapters waiting for the network to come back.
    pub fn deferred_downloads(&self) -> Vec<ChapterId> {
        self.deferred.lock().iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::{ManualClock, ReadingRecordUpsert, RemoteApi};
    use core_library::MemoryLocalStore;
    use core_runtime::{EngineConfig, EventBus};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct ChapterRemote {
        fetches: AtomicUsize,
        offline: AtomicBool,
    }

    fn remote_chapter(id: i64) -> RemoteChapter {
        RemoteChapter {
            id,
            book_id: 42,
            chapter_number: id as u32,
            title: format!("Chapter {}", id),
            content: format!("Body of chapter {}", id),
            word_count: 4,
        }
    }

    #[async_trait]
    impl RemoteApi for ChapterRemote {
        async fn get_book(&self, book_id: i64) -> BridgeResult<RemoteBook> {
            Ok(RemoteBook {
                id: book_id,
                title: "Dune".into(),
                author: "Frank Herbert".into(),
                description: None,
                word_count: 12,
                chapter_count: 3,
            })
        }
        async fn get_book_chapters(&self, _book_id: i64) -> BridgeResult<Vec<RemoteChapter>> {
            Ok(vec![])
        }
        async fn get_chapter(&self, chapter_id: i64) -> BridgeResult<RemoteChapter> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(BridgeError::Connectivity("offline".into()));
            }
            if chapter_id == 13 {
                return Err(BridgeError::Http {
                    status: 404,
                    message: "not found".into(),
                });
            }
            let mut chapter = remote_chapter(chapter_id);
            if chapter_id == 99 {
                chapter.content.clear();
            }
            Ok(chapter)
        }
        async fn upsert_reading_record(&self, _record: &ReadingRecordUpsert) -> BridgeResult<()> {
            Ok(())
        }
        async fn add_to_shelf(&self, _book_id: i64) -> BridgeResult<()> {
            Ok(())
        }
        async fn remove_from_shelf(&self, _book_id: i64) -> BridgeResult<()> {
            Ok(())
        }
        async fn set_favorite(&self, _book_id: i64, _favorite: bool) -> BridgeResult<()> {
            Ok(())
        }
    }

    fn manager(remote: Arc<ChapterRemote>) -> Arc<CacheManager> {
        Arc::new(CacheManager::new(
            Arc::new(MemoryLocalStore::new()),
            remote,
            Arc::new(ManualClock::default()),
            EventBus::new(256),
            EngineConfig::default().with_batch_delay_ms(10),
        ))
    }

    #[tokio::test]
    async fn test_cached_chapter_skips_network() {
        let remote = Arc::new(ChapterRemote::default());
        let cache = manager(remote.clone());

        let first = cache.download_chapter(1).await.unwrap();
        let second = cache.download_chapter(1).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 1);
        assert!(cache.download_progress(1).is_none());
    }

    #[tokio::test]
    async fn test_empty_body_download_is_cached() {
        let remote = Arc::new(ChapterRemote::default());
        let cache = manager(remote.clone());

        let first = cache.download_chapter(99).await.unwrap();
        assert!(first.content.is_empty());
        assert!(first.downloaded);
        assert!(cache.is_chapter_cached(99).await.unwrap());

        cache.download_chapter(99).await.unwrap();
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bodyless_listing_is_not_a_download() {
        let remote = Arc::new(ChapterRemote::default());
        let cache = manager(remote);

        let mut listing = remote_chapter(5);
        listing.content.clear();
        let stored = cache.store_chapter(listing).await.unwrap();
        assert!(!stored.downloaded);
        assert!(!cache.is_chapter_cached(5).await.unwrap());
    }

    #[tokio::test]
    async fn test_listing_does_not_erase_downloaded_body() {
        let remote = Arc::new(ChapterRemote::default());
        let cache = manager(remote);
        cache.download_chapter(2).await.unwrap();

        let mut listing = remote_chapter(2);
        listing.content.clear();
        let stored = cache.store_chapter(listing).await.unwrap();
        assert_eq!(stored.content, "Body of chapter 2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_tolerates_partial_failure() {
        let remote = Arc::new(ChapterRemote::default());
        let cache = manager(remote);

        let ids: Vec<i64> = (1..=12).chain([13]).collect();
        let report = cache.cache_book_chapters(42, &ids).await;
        assert_eq!(report.succeeded.len(), 12);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, 13);

        assert!(cache.is_book_fully_cached(42, 12).await.unwrap());
        assert!(!cache.is_book_fully_cached(42, 13).await.unwrap());
        let ordinals: Vec<u32> = cache
            .cached_chapters(42)
            .await
            .unwrap()
            .iter()
            .map(|c| c.chapter_number)
            .collect();
        assert_eq!(ordinals, (1..=12).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_connectivity_failures_are_deferred_and_resumed() {
        let remote = Arc::new(ChapterRemote::default());
        remote.offline.store(true, Ordering::SeqCst);
        let cache = manager(remote.clone());

        assert!(cache.download_chapter(5).await.unwrap_err().is_connectivity());
        assert!(cache.download_chapter(13).await.unwrap_err().is_connectivity());
        assert_eq!(cache.deferred_downloads(), vec![5, 13]);

        remote.offline.store(false, Ordering::SeqCst);
        let report = cache.resume_deferred_downloads().await;
        assert_eq!(report.succeeded, vec![5]);
        // A 404 is not a connectivity failure, so it is not deferred again.
        assert_eq!(report.failed.len(), 1);
        assert!(cache.deferred_downloads().is_empty());
        assert!(cache.is_chapter_cached(5).await.unwrap());
    }

    #[tokio::test]
    async fn test_downloads_refused_after_shutdown() {
        let cache = manager(Arc::new(ChapterRemote::default()));
        cache.shutdown().await;
        assert!(matches!(
            cache.download_chapter(1).await,
            Err(CacheError::ShutDown)
        ));
    }

    #[tokio::test]
    async fn test_store_book_roundtrip() {
        let remote = Arc::new(ChapterRemote::default());
        let cache = manager(remote.clone());
        let fetched = remote.get_book(42).await.unwrap();
        let book = cache.store_book(fetched).await.unwrap();
        assert_eq!(cache.cached_book(42).await.unwrap(), Some(book));
    }
}
