//! # Local Store Contract
//!
//! [`LocalStore`] is the object-safe surface every storage engine implements:
//! records are opaque JSON bodies keyed by string, with secondary index values
//! supplied by the writer. [`LocalStoreExt`] layers typed access on top for
//! anything implementing [`Record`].
//!
//! Each call is atomic on its own. Nothing spans collections, so callers that
//! write a book and then its chapters must tolerate stopping halfway and
//! retrying.

use async_trait::async_trait;
use bridge_traits::BookId;

use crate::error::{Result, StoreError};
use crate::models::{Chapter, Collection, IndexQuery, IndexValue, ReadingProgress, Record};

/// A serialized record ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub key: String,
    /// JSON body
    pub body: String,
    pub indexes: Vec<(&'static str, IndexValue)>,
}

impl RawRecord {
    pub fn encode<R: Record>(record: &R) -> Result<Self> {
        Ok(Self {
            key: record.key(),
            body: serde_json::to_string(record)?,
            indexes: record.index_values(),
        })
    }

    pub fn size_bytes(&self) -> u64 {
        (self.key.len() + self.body.len()) as u64
    }
}

/// Durable, indexed key-value storage split into named collections.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Open the backing storage and bring its schema up to date.
    ///
    /// Idempotent; concurrent callers share a single open.
    async fn open(&self) -> Result<()>;

    /// Insert or replace a record and its index entries.
    async fn put_raw(&self, collection: Collection, record: RawRecord) -> Result<()>;

    async fn get_raw(&self, collection: Collection, key: &str) -> Result<Option<String>>;

    /// Bodies matching `query` on `index`, ordered by index value then key.
    async fn get_all_by_index_raw(
        &self,
        collection: Collection,
        index: &str,
        query: &IndexQuery,
    ) -> Result<Vec<String>>;

    /// Every body in the collection, in key order.
    async fn get_all_raw(&self, collection: Collection) -> Result<Vec<String>>;

    /// Returns whether a record was removed.
    async fn delete(&self, collection: Collection, key: &str) -> Result<bool>;

    async fn clear(&self, collection: Collection) -> Result<()>;

    async fn count(&self, collection: Collection) -> Result<u64>;
}

/// Resolve `index` against the collection's declared indexes.
pub(crate) fn resolve_index(collection: Collection, index: &str) -> Result<&'static str> {
    collection.index(index).ok_or_else(|| StoreError::UnknownIndex {
        collection: collection.to_string(),
        index: index.to_string(),
    })
}

fn decode_all<R: Record>(bodies: Vec<String>) -> Result<Vec<R>> {
    bodies
        .iter()
        .map(|body| serde_json::from_str(body).map_err(StoreError::from))
        .collect()
}

/// Typed access for any [`LocalStore`].
#[async_trait]
pub trait LocalStoreExt: LocalStore {
    async fn put<R: Record>(&self, record: &R) -> Result<()> {
        let raw = RawRecord::encode(record)?;
        self.put_raw(R::COLLECTION, raw).await
    }

    async fn get<R: Record>(&self, key: &str) -> Result<Option<R>> {
        match self.get_raw(R::COLLECTION, key).await? {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    async fn get_all<R: Record>(&self) -> Result<Vec<R>> {
        let bodies = self.get_all_raw(R::COLLECTION).await?;
        decode_all(bodies)
    }

    async fn get_all_by_index<R: Record>(&self, index: &str, query: IndexQuery) -> Result<Vec<R>> {
        let bodies = self
            .get_all_by_index_raw(R::COLLECTION, index, &query)
            .await?;
        decode_all(bodies)
    }

    async fn delete_record<R: Record>(&self, key: &str) -> Result<bool> {
        self.delete(R::COLLECTION, key).await
    }

    async fn clear_collection<R: Record>(&self) -> Result<()> {
        self.clear(R::COLLECTION).await
    }

    /// Cached chapters of a book in ordinal order.
    async fn chapters_for_book(&self, book_id: BookId) -> Result<Vec<Chapter>> {
        let mut chapters: Vec<Chapter> = self
            .get_all_by_index("book_id", IndexQuery::eq(book_id))
            .await?;
        chapters.sort_by_key(|chapter| chapter.chapter_number);
        Ok(chapters)
    }

    /// Progress records the remote has not acknowledged yet.
    async fn unsynced_progress(&self) -> Result<Vec<ReadingProgress>> {
        self.get_all_by_index("synced", IndexQuery::eq(false)).await
    }
}

impl<S: LocalStore + ?Sized> LocalStoreExt for S {}
