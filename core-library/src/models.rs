//! # Stored Entities
//!
//! The five collections held by the local store and the records that live in
//! them. Every record knows its own primary key and the secondary index values
//! the store maintains for it.

use bridge_traits::{BookId, ChapterId, ReadingRecordUpsert, RemoteBook, RemoteChapter, UserId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Collections and indexes
// =============================================================================

/// Named collection inside the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Books,
    Chapters,
    ReadingProgress,
    PendingOperations,
    CacheEntries,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Books,
        Collection::Chapters,
        Collection::ReadingProgress,
        Collection::PendingOperations,
        Collection::CacheEntries,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Books => "books",
            Collection::Chapters => "chapters",
            Collection::ReadingProgress => "reading_progress",
            Collection::PendingOperations => "pending_operations",
            Collection::CacheEntries => "cache_entries",
        }
    }

    /// Secondary indexes maintained for this collection.
    pub fn indexes(&self) -> &'static [&'static str] {
        match self {
            Collection::Books => &["cached_at"],
            Collection::Chapters => &["book_id", "chapter_number"],
            Collection::ReadingProgress => &["user_id", "book_id", "chapter_id", "synced"],
            Collection::PendingOperations => &["enqueued_at", "kind"],
            Collection::CacheEntries => &["timestamp", "namespace"],
        }
    }

    /// Resolve an index name to its static form, if the collection has it.
    pub fn index(&self, name: &str) -> Option<&'static str> {
        self.indexes().iter().copied().find(|index| *index == name)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value stored in a secondary index.
///
/// Integers order before text, matching SQLite's cross-type comparison.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexValue {
    Int(i64),
    Text(String),
}

impl From<i64> for IndexValue {
    fn from(value: i64) -> Self {
        IndexValue::Int(value)
    }
}

impl From<u32> for IndexValue {
    fn from(value: u32) -> Self {
        IndexValue::Int(i64::from(value))
    }
}

impl From<bool> for IndexValue {
    fn from(value: bool) -> Self {
        IndexValue::Int(i64::from(value))
    }
}

impl From<&str> for IndexValue {
    fn from(value: &str) -> Self {
        IndexValue::Text(value.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(value: String) -> Self {
        IndexValue::Text(value)
    }
}

/// Selection over a secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexQuery {
    /// Records whose index value equals the given value.
    Eq(IndexValue),
    /// Every record in the collection, ordered by index value.
    All,
}

impl IndexQuery {
    pub fn eq(value: impl Into<IndexValue>) -> Self {
        IndexQuery::Eq(value.into())
    }
}

/// A typed entity that can be persisted in the local store.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    const COLLECTION: Collection;

    /// Primary key within the collection.
    fn key(&self) -> String;

    /// Secondary index values, one per name in `COLLECTION.indexes()`.
    fn index_values(&self) -> Vec<(&'static str, IndexValue)>;
}

// =============================================================================
// Books and chapters
// =============================================================================

/// Cached book metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub description: Option<String>,
    pub word_count: u64,
    pub chapter_count: u32,
    /// Unix millis of the fetch that produced this record
    pub cached_at: i64,
}

impl Book {
    pub fn from_remote(remote: RemoteBook, cached_at: i64) -> Self {
        Self {
            id: remote.id,
            title: remote.title,
            author: remote.author,
            description: remote.description,
            word_count: remote.word_count,
            chapter_count: remote.chapter_count,
            cached_at,
        }
    }
}

impl Record for Book {
    const COLLECTION: Collection = Collection::Books;

    fn key(&self) -> String {
        self.id.to_string()
    }

    fn index_values(&self) -> Vec<(&'static str, IndexValue)> {
        vec![("cached_at", self.cached_at.into())]
    }
}

/// Cached chapter body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: ChapterId,
    pub book_id: BookId,
    /// 1-based ordinal within the book
    pub chapter_number: u32,
    pub title: String,
    pub content: String,
    pub word_count: u64,
    pub cached_at: i64,
    /// Set once the body came from `GET /chapters/{id}`. An empty `content`
    /// is then the real body, not a missing one.
    #[serde(default)]
    pub downloaded: bool,
}

impl Chapter {
    /// From a listing entry, which may or may not carry the body.
    pub fn from_remote(remote: RemoteChapter, cached_at: i64) -> Self {
        let downloaded = !remote.content.is_empty();
        Self::build(remote, cached_at, downloaded)
    }

    /// From a single-chapter fetch, whose body is authoritative.
    pub fn from_download(remote: RemoteChapter, cached_at: i64) -> Self {
        Self::build(remote, cached_at, true)
    }

    fn build(remote: RemoteChapter, cached_at: i64, downloaded: bool) -> Self {
        Self {
            id: remote.id,
            book_id: remote.book_id,
            chapter_number: remote.chapter_number,
            title: remote.title,
            content: remote.content,
            word_count: remote.word_count,
            cached_at,
            downloaded,
        }
    }
}

impl Record for Chapter {
    const COLLECTION: Collection = Collection::Chapters;

    fn key(&self) -> String {
        self.id.to_string()
    }

    fn index_values(&self) -> Vec<(&'static str, IndexValue)> {
        vec![
            ("book_id", self.book_id.into()),
            ("chapter_number", self.chapter_number.into()),
        ]
    }
}

// =============================================================================
// Reading progress
// =============================================================================

/// Reading position for one (user, book, chapter) triple.
///
/// The triple is the primary key, so saving the same position twice upserts
/// the one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingProgress {
    pub user_id: UserId,
    pub book_id: BookId,
    pub chapter_id: ChapterId,
    /// Scroll offset within the chapter
    pub reading_position: f64,
    /// 0.0 - 100.0
    pub progress_percentage: f64,
    pub last_read_at: i64,
    /// True only after the remote acknowledged this exact record
    pub synced: bool,
}

impl ReadingProgress {
    pub fn new(
        user_id: UserId,
        book_id: BookId,
        chapter_id: ChapterId,
        progress_percentage: f64,
        reading_position: f64,
        last_read_at: i64,
    ) -> Self {
        Self {
            user_id,
            book_id,
            chapter_id,
            reading_position,
            progress_percentage,
            last_read_at,
            synced: false,
        }
    }

    pub fn key_for(user_id: UserId, book_id: BookId, chapter_id: ChapterId) -> String {
        format!("{}:{}:{}", user_id, book_id, chapter_id)
    }

    /// Request body for the remote upsert.
    pub fn to_upsert(&self) -> ReadingRecordUpsert {
        ReadingRecordUpsert {
            book_id: self.book_id,
            chapter_id: self.chapter_id,
            progress_percentage: self.progress_percentage,
            reading_position: self.reading_position,
        }
    }

    /// Whether `other` describes the same saved position as `self`.
    pub fn same_position(&self, other: &ReadingProgress) -> bool {
        self.key() == other.key()
            && self.progress_percentage == other.progress_percentage
            && self.reading_position == other.reading_position
            && self.last_read_at == other.last_read_at
    }
}

impl Record for ReadingProgress {
    const COLLECTION: Collection = Collection::ReadingProgress;

    fn key(&self) -> String {
        Self::key_for(self.user_id, self.book_id, self.chapter_id)
    }

    fn index_values(&self) -> Vec<(&'static str, IndexValue)> {
        vec![
            ("user_id", self.user_id.into()),
            ("book_id", self.book_id.into()),
            ("chapter_id", self.chapter_id.into()),
            ("synced", self.synced.into()),
        ]
    }
}

// =============================================================================
// Pending operations
// =============================================================================

/// Kind of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    ProgressSave,
    ShelfAdd,
    ShelfRemove,
    FavoriteSet,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::ProgressSave => "progress-save",
            OperationKind::ShelfAdd => "shelf-add",
            OperationKind::ShelfRemove => "shelf-remove",
            OperationKind::FavoriteSet => "favorite-set",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutation carried by a pending operation.
///
/// Every variant describes an end state rather than a delta, so replaying it
/// converges. Favorites carry the target value, never a toggle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum OperationPayload {
    ProgressSave {
        user_id: UserId,
        book_id: BookId,
        chapter_id: ChapterId,
        progress_percentage: f64,
        reading_position: f64,
    },
    ShelfAdd {
        book_id: BookId,
    },
    ShelfRemove {
        book_id: BookId,
    },
    FavoriteSet {
        book_id: BookId,
        favorite: bool,
    },
}

impl OperationPayload {
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationPayload::ProgressSave { .. } => OperationKind::ProgressSave,
            OperationPayload::ShelfAdd { .. } => OperationKind::ShelfAdd,
            OperationPayload::ShelfRemove { .. } => OperationKind::ShelfRemove,
            OperationPayload::FavoriteSet { .. } => OperationKind::FavoriteSet,
        }
    }

    pub fn book_id(&self) -> BookId {
        match self {
            OperationPayload::ProgressSave { book_id, .. }
            | OperationPayload::ShelfAdd { book_id }
            | OperationPayload::ShelfRemove { book_id }
            | OperationPayload::FavoriteSet { book_id, .. } => *book_id,
        }
    }
}

impl From<&ReadingProgress> for OperationPayload {
    fn from(progress: &ReadingProgress) -> Self {
        OperationPayload::ProgressSave {
            user_id: progress.user_id,
            book_id: progress.book_id,
            chapter_id: progress.chapter_id,
            progress_percentage: progress.progress_percentage,
            reading_position: progress.reading_position,
        }
    }
}

/// Entry in the write-behind queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    /// Zero-padded enqueue sequence; key order is enqueue order
    pub id: String,
    pub payload: OperationPayload,
    pub enqueued_at: i64,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl PendingOperation {
    pub fn new(sequence: u64, payload: OperationPayload, enqueued_at: i64, max_retries: u32) -> Self {
        Self {
            id: Self::id_for(sequence),
            payload,
            enqueued_at,
            retry_count: 0,
            max_retries,
            last_error: None,
        }
    }

    pub fn id_for(sequence: u64) -> String {
        format!("{:020}", sequence)
    }

    /// Sequence number encoded in the id, if it is one of ours.
    pub fn sequence(&self) -> Option<u64> {
        self.id.parse().ok()
    }

    pub fn kind(&self) -> OperationKind {
        self.payload.kind()
    }

    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

impl Record for PendingOperation {
    const COLLECTION: Collection = Collection::PendingOperations;

    fn key(&self) -> String {
        self.id.clone()
    }

    fn index_values(&self) -> Vec<(&'static str, IndexValue)> {
        vec![
            ("enqueued_at", self.enqueued_at.into()),
            ("kind", self.kind().as_str().into()),
        ]
    }
}

// =============================================================================
// Cache entries
// =============================================================================

/// Generic cached payload with a time-to-live and a size estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// `namespace:key`
    pub key: String,
    pub namespace: String,
    pub data: serde_json::Value,
    /// Unix millis when written
    pub timestamp: i64,
    pub ttl_ms: u64,
    /// Estimated serialized size in bytes
    pub size: u64,
}

impl CacheEntry {
    pub fn compose_key(namespace: &str, key: &str) -> String {
        format!("{}:{}", namespace, key)
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.timestamp)
    }

    /// Live while `now - timestamp < ttl`.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        let ttl = i64::try_from(self.ttl_ms).unwrap_or(i64::MAX);
        self.age_ms(now_ms) >= ttl
    }
}

impl Record for CacheEntry {
    const COLLECTION: Collection = Collection::CacheEntries;

    fn key(&self) -> String {
        self.key.clone()
    }

    fn index_values(&self) -> Vec<(&'static str, IndexValue)> {
        vec![
            ("timestamp", self.timestamp.into()),
            ("namespace", self.namespace.as_str().into()),
        ]
    }
}
