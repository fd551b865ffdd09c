//! Remote API Contract
//!
//! The minimal surface the engine needs from the reading platform's HTTP API:
//! three cacheable reads and four writes that are safe to replay.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub type UserId = i64;
pub type BookId = i64;
pub type ChapterId = i64;

/// Book metadata as returned by `GET /books/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteBook {
    pub id: BookId,
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub word_count: u64,
    #[serde(default)]
    pub chapter_count: u32,
}

/// Chapter body as returned by `GET /chapters/{id}`.
///
/// `GET /books/{id}/chapters` returns the same shape; listing endpoints may
/// leave `content` empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteChapter {
    pub id: ChapterId,
    pub book_id: BookId,
    pub chapter_number: u32,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub word_count: u64,
}

/// Body of `POST /reading-records`. The remote upserts on
/// (authenticated user, book, chapter).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingRecordUpsert {
    pub book_id: BookId,
    pub chapter_id: ChapterId,
    pub progress_percentage: f64,
    pub reading_position: f64,
}

/// Resource paths, shared by the HTTP connector and cache key derivation.
pub mod paths {
    use super::{BookId, ChapterId};

    pub fn book(book_id: BookId) -> String {
        format!("/books/{}", book_id)
    }

    pub fn book_chapters(book_id: BookId) -> String {
        format!("/books/{}/chapters", book_id)
    }

    pub fn chapter(chapter_id: ChapterId) -> String {
        format!("/chapters/{}", chapter_id)
    }

    pub fn reading_records() -> String {
        "/reading-records".to_string()
    }

    pub fn bookshelf() -> String {
        "/bookshelf".to_string()
    }

    pub fn bookshelf_entry(book_id: BookId) -> String {
        format!("/bookshelf/{}", book_id)
    }

    pub fn bookshelf_favorite(book_id: BookId) -> String {
        format!("/bookshelf/{}/favorite", book_id)
    }
}

/// Remote reading-platform API.
///
/// Every write is expressed so that repeating it converges to the same state:
/// shelf add/remove are set membership, favorite is set-to a target value.
/// A rejected bearer credential is reported as
/// [`BridgeError::Unauthorized`](crate::error::BridgeError::Unauthorized).
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// `GET /books/{id}`
    async fn get_book(&self, book_id: BookId) -> Result<RemoteBook>;

    /// `GET /books/{id}/chapters`
    async fn get_book_chapters(&self, book_id: BookId) -> Result<Vec<RemoteChapter>>;

    /// `GET /chapters/{id}`
    async fn get_chapter(&self, chapter_id: ChapterId) -> Result<RemoteChapter>;

    /// `POST /reading-records`
    async fn upsert_reading_record(&self, record: &ReadingRecordUpsert) -> Result<()>;

    /// `POST /bookshelf`
    async fn add_to_shelf(&self, book_id: BookId) -> Result<()>;

    /// `DELETE /bookshelf/{bookId}`
    async fn remove_from_shelf(&self, book_id: BookId) -> Result<()>;

    /// `PATCH /bookshelf/{bookId}/favorite`
    async fn set_favorite(&self, book_id: BookId, favorite: bool) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_record_wire_shape() {
        let record = ReadingRecordUpsert {
            book_id: 42,
            chapter_id: 3,
            progress_percentage: 55.0,
            reading_position: 1200.0,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["bookId"], 42);
        assert_eq!(json["chapterId"], 3);
        assert_eq!(json["progressPercentage"], 55.0);
        assert_eq!(json["readingPosition"], 1200.0);
    }

    #[test]
    fn test_chapter_listing_without_content() {
        let chapter: RemoteChapter = serde_json::from_str(
            r#"{"id":7,"bookId":42,"chapterNumber":2,"title":"Two"}"#,
        )
        .unwrap();
        assert_eq!(chapter.chapter_number, 2);
        assert!(chapter.content.is_empty());
    }

    #[test]
    fn test_paths() {
        assert_eq!(paths::book(42), "/books/42");
        assert_eq!(paths::book_chapters(42), "/books/42/chapters");
        assert_eq!(paths::chapter(3), "/chapters/3");
        assert_eq!(paths::bookshelf_favorite(42), "/bookshelf/42/favorite");
    }
}
