//! # Request Façade
//!
//! Every remote call made on behalf of the UI goes through here.
//!
//! - **Reads** try the remote while ONLINE, cache the answer under the
//!   canonical resource path and return it as [`DataSource::Live`]. When the
//!   monitor is not ONLINE, or the call fails for lack of connectivity, the
//!   cached copy is returned as [`DataSource::Cached`]; with nothing cached
//!   the caller gets [`ServiceError::NoCachedData`].
//! - **Writes** try the remote while ONLINE. On a connectivity failure, or
//!   when offline, the mutation goes to the sync queue and the caller gets
//!   [`WriteOutcome::Pending`].
//! - A 401 clears the stored credential and is returned as
//!   [`ServiceError::Unauthorized`]. It is never retried.
//! - Any other remote error is returned to the caller untouched.

use bridge_traits::error::BridgeError;
use bridge_traits::remote::paths;
use bridge_traits::{BookId, ChapterId, Clock, RemoteApi};
use core_cache::{CacheError, CacheManager};
use core_library::{Book, Chapter, OperationPayload, ReadingProgress};
use core_network::NetworkMonitor;
use core_sync::{operation, SyncError, SyncManager};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::credentials::Credentials;
use crate::error::{Result, ServiceError};

const NS_BOOKS: &str = "books";
const NS_CHAPTERS: &str = "chapters";

/// Where a read was answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Live,
    Cached,
}

/// Read result tagged with its source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Fetched<T> {
    pub data: T,
    pub source: DataSource,
}

impl<T> Fetched<T> {
    pub fn live(data: T) -> Self {
        Self {
            data,
            source: DataSource::Live,
        }
    }

    pub fn cached(data: T) -> Self {
        Self {
            data,
            source: DataSource::Cached,
        }
    }

    pub fn is_cached(&self) -> bool {
        self.source == DataSource::Cached
    }
}

/// Result of a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum WriteOutcome {
    /// The remote acknowledged the change.
    Applied,
    /// Stored locally; the sync queue will deliver it.
    Pending { operation_id: Option<String> },
}

impl WriteOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, WriteOutcome::Pending { .. })
    }
}

/// Which side a read consults first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadStrategy {
    /// Remote first, cache on failure.
    #[default]
    NetworkFirst,
    /// A live cache entry wins; the remote is asked only on a miss.
    CacheFirst,
}

/// Cache key for a resource path: no scheme or host, no query string or
/// fragment, no trailing slash.
///
/// ```
/// use core_service::facade::canonical_key;
///
/// assert_eq!(canonical_key("https://api.folio.example/books/42/?ts=1#top"), "/books/42");
/// assert_eq!(canonical_key("chapters/7"), "/chapters/7");
/// ```
pub fn canonical_key(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let path = match path.split_once("://") {
        Some((_, rest)) => rest.find('/').map_or("", |at| &rest[at..]),
        None => path,
    };
    let trimmed = path.trim_matches('/');
    format!("/{}", trimmed)
}

pub struct RequestFacade {
    remote: Arc<dyn RemoteApi>,
    cache: Arc<CacheManager>,
    sync: Arc<SyncManager>,
    monitor: Arc<NetworkMonitor>,
    credentials: Credentials,
    clock: Arc<dyn Clock>,
    strategy: ReadStrategy,
}

impl RequestFacade {
    pub fn new(
        remote: Arc<dyn RemoteApi>,
        cache: Arc<CacheManager>,
        sync: Arc<SyncManager>,
        monitor: Arc<NetworkMonitor>,
        credentials: Credentials,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            remote,
            cache,
            sync,
            monitor,
            credentials,
            clock,
            strategy: ReadStrategy::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: ReadStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy(&self) -> ReadStrategy {
        self.strategy
    }

    // -------------------------------------------------------------------------
    // Shared paths
    // -------------------------------------------------------------------------

    /// Decide what a failed remote call means for the caller.
    ///
    /// `Ok(())` means "fall back to local data".
    async fn on_remote_error(&self, error: BridgeError) -> Result<()> {
        if error.is_unauthorized() {
            self.credentials.expire(&error.to_string()).await;
            return Err(ServiceError::Unauthorized(error.to_string()));
        }
        if error.is_connectivity() {
            debug!(error = %error, "Remote unreachable; falling back");
            self.monitor.check_now().await;
            return Ok(());
        }
        Err(ServiceError::Remote(error))
    }

    async fn fresh<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Option<T> {
        match self.cache.get_as(namespace, key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(namespace, key, error = %e, "Cache read failed");
                None
            }
        }
    }

    async fn remember<T: Serialize>(&self, namespace: &str, key: &str, value: &T) {
        if let Err(e) = self.cache.set_as(namespace, key, value, None).await {
            warn!(namespace, key, error = %e, "Response not cached");
        }
    }

    fn degrade(&self, what: &str, error: CacheError) -> Result<()> {
        if error.is_storage_full() {
            warn!(what, error = %error, "Storage full; serving without persisting");
            Ok(())
        } else {
            Err(error.into())
        }
    }

    async fn cache_first<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Option<Fetched<T>> {
        if self.strategy != ReadStrategy::CacheFirst {
            return None;
        }
        self.fresh(namespace, key).await.map(Fetched::cached)
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// `GET /books/{id}`
    #[instrument(skip(self))]
    pub async fn get_book(&self, book_id: BookId) -> Result<Fetched<Book>> {
        let key = canonical_key(&paths::book(book_id));
        if let Some(hit) = self.cache_first(NS_BOOKS, &key).await {
            return Ok(hit);
        }

        if self.monitor.is_online() {
            match self.remote.get_book(book_id).await {
                Ok(remote) => {
                    let book = match self.cache.store_book(remote.clone()).await {
                        Ok(book) => book,
                        Err(e) => {
                            self.degrade("book", e)?;
                            Book::from_remote(remote, self.clock.unix_timestamp_millis())
                        }
                    };
                    self.remember(NS_BOOKS, &key, &book).await;
                    return Ok(Fetched::live(book));
                }
                Err(e) => self.on_remote_error(e).await?,
            }
        }

        if let Some(book) = self.fresh(NS_BOOKS, &key).await {
            return Ok(Fetched::cached(book));
        }
        if let Some(book) = self.cache.cached_book(book_id).await? {
            return Ok(Fetched::cached(book));
        }
        Err(ServiceError::NoCachedData { key })
    }

    /// `GET /books/{id}/chapters`, in ordinal order.
    #[instrument(skip(self))]
    pub async fn get_book_chapters(&self, book_id: BookId) -> Result<Fetched<Vec<Chapter>>> {
        let key = canonical_key(&paths::book_chapters(book_id));
        if let Some(hit) = self.cache_first(NS_CHAPTERS, &key).await {
            return Ok(hit);
        }

        if self.monitor.is_online() {
            match self.remote.get_book_chapters(book_id).await {
                Ok(remote) => {
                    let now = self.clock.unix_timestamp_millis();
                    let mut chapters = Vec::with_capacity(remote.len());
                    for chapter in remote {
                        let chapter = match self.cache.store_chapter(chapter.clone()).await {
                            Ok(stored) => stored,
                            Err(e) => {
                                self.degrade("chapter listing", e)?;
                                Chapter::from_remote(chapter, now)
                            }
                        };
                        chapters.push(chapter);
                    }
                    chapters.sort_by_key(|chapter| chapter.chapter_number);
                    self.remember(NS_CHAPTERS, &key, &chapters).await;
                    return Ok(Fetched::live(chapters));
                }
                Err(e) => self.on_remote_error(e).await?,
            }
        }

        if let Some(chapters) = self.fresh(NS_CHAPTERS, &key).await {
            return Ok(Fetched::cached(chapters));
        }
        let stored = self.cache.chapter_listing(book_id).await?;
        if !stored.is_empty() {
            return Ok(Fetched::cached(stored));
        }
        Err(ServiceError::NoCachedData { key })
    }

    /// `GET /chapters/{id}`. Offline, a downloaded chapter is served from the
    /// store even after its cache entry has expired.
    #[instrument(skip(self))]
    pub async fn get_chapter(&self, chapter_id: ChapterId) -> Result<Fetched<Chapter>> {
        let key = canonical_key(&paths::chapter(chapter_id));
        if let Some(hit) = self.cache_first(NS_CHAPTERS, &key).await {
            return Ok(hit);
        }

        if self.monitor.is_online() {
            match self.remote.get_chapter(chapter_id).await {
                Ok(remote) => {
                    let chapter = match self.cache.store_downloaded_chapter(remote.clone()).await {
                        Ok(chapter) => chapter,
                        Err(e) => {
                            self.degrade("chapter", e)?;
                            Chapter::from_download(remote, self.clock.unix_timestamp_millis())
                        }
                    };
                    self.remember(NS_CHAPTERS, &key, &chapter).await;
                    return Ok(Fetched::live(chapter));
                }
                Err(e) => self.on_remote_error(e).await?,
            }
        }

        if let Some(chapter) = self.fresh(NS_CHAPTERS, &key).await {
            return Ok(Fetched::cached(chapter));
        }
        if let Some(chapter) = self.cache.cached_chapter(chapter_id).await? {
            return Ok(Fetched::cached(chapter));
        }
        Err(ServiceError::NoCachedData { key })
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Save reading progress locally and push it when possible.
    #[instrument(skip(self, progress), fields(book_id = progress.book_id, chapter_id = progress.chapter_id))]
    pub async fn save_progress(&self, progress: ReadingProgress) -> Result<WriteOutcome> {
        match self.sync.save_reading_progress(progress).await {
            Ok(saved) if saved.synced => Ok(WriteOutcome::Applied),
            Ok(_) => Ok(WriteOutcome::Pending { operation_id: None }),
            Err(SyncError::Unauthorized(message)) => {
                self.credentials.expire(&message).await;
                Err(ServiceError::Unauthorized(message))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// `POST /bookshelf`
    pub async fn add_to_shelf(&self, book_id: BookId) -> Result<WriteOutcome> {
        self.write(OperationPayload::ShelfAdd { book_id }).await
    }

    /// `DELETE /bookshelf/{bookId}`
    pub async fn remove_from_shelf(&self, book_id: BookId) -> Result<WriteOutcome> {
        self.write(OperationPayload::ShelfRemove { book_id }).await
    }

    /// `PATCH /bookshelf/{bookId}/favorite`, always with the target value.
    pub async fn set_favorite(&self, book_id: BookId, favorite: bool) -> Result<WriteOutcome> {
        self.write(OperationPayload::FavoriteSet { book_id, favorite })
            .await
    }

    #[instrument(skip(self, payload), fields(kind = %payload.kind(), book_id = payload.book_id()))]
    async fn write(&self, payload: OperationPayload) -> Result<WriteOutcome> {
        if self.monitor.is_online() {
            match operation::apply(self.remote.as_ref(), &payload).await {
                Ok(()) => return Ok(WriteOutcome::Applied),
                Err(e) => self.on_remote_error(e).await?,
            }
        }
        let queued = self.sync.enqueue(payload).await?;
        Ok(WriteOutcome::Pending {
            operation_id: Some(queued.id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_key_strips_volatile_parts() {
        assert_eq!(canonical_key("/books/42"), "/books/42");
        assert_eq!(canonical_key("/books/42/"), "/books/42");
        assert_eq!(canonical_key("/books/42?_=1700000000"), "/books/42");
        assert_eq!(canonical_key("/books/42#chapters"), "/books/42");
        assert_eq!(canonical_key("http://localhost:8080/chapters/3?x=1"), "/chapters/3");
        assert_eq!(canonical_key("https://api.folio.example"), "/");
        assert_eq!(canonical_key(""), "/");
    }

    #[test]
    fn test_outcome_and_source_flags() {
        assert!(WriteOutcome::Pending { operation_id: None }.is_pending());
        assert!(!WriteOutcome::Applied.is_pending());
        assert!(Fetched::cached(1).is_cached());
        assert!(!Fetched::live(1).is_cached());
    }
}
