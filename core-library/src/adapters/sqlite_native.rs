//! Native SQLite Store
//!
//! Implements [`LocalStore`] on `sqlx` with the native SQLite driver. All
//! collections share two tables: `records` holds the JSON bodies and
//! `record_indexes` holds one row per secondary index value.
//!
//! The pool is created on the first `open()` (or first operation) and shared
//! afterwards; concurrent openers wait on the same initialization.

use async_trait::async_trait;
use sqlx::sqlite::SqliteArguments;
use sqlx::{Pool, Sqlite};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::db::{self, DatabaseConfig};
use crate::error::{Result, StoreError};
use crate::models::{Collection, IndexQuery, IndexValue};
use crate::store::{resolve_index, LocalStore, RawRecord};

/// SQLite implementation of [`LocalStore`].
pub struct SqliteLocalStore {
    config: DatabaseConfig,
    pool: OnceCell<Pool<Sqlite>>,
}

impl SqliteLocalStore {
    /// Create a store that opens lazily with `config`.
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            pool: OnceCell::new(),
        }
    }

    /// In-memory database, mainly for tests.
    pub fn in_memory() -> Self {
        Self::new(DatabaseConfig::in_memory())
    }

    /// Wrap an already migrated pool.
    pub fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self {
            config: DatabaseConfig::default(),
            pool: OnceCell::new_with(Some(pool)),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    async fn pool(&self) -> Result<&Pool<Sqlite>> {
        self.pool
            .get_or_try_init(|| async {
                info!(database_url = %self.config.database_url, "Opening local store");
                db::create_pool(self.config.clone()).await
            })
            .await
    }

    /// Schema version of the opened database.
    pub async fn schema_version(&self) -> Result<i64> {
        db::schema_version(self.pool().await?).await
    }

    /// Close the pool. Later calls fail until a new store is created.
    pub async fn close(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &IndexValue,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        IndexValue::Int(i) => query.bind(*i),
        IndexValue::Text(s) => query.bind(s.clone()),
    }
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn open(&self) -> Result<()> {
        self.pool().await.map(|_| ())
    }

    #[instrument(skip(self, record), fields(collection = %collection, key = %record.key))]
    async fn put_raw(&self, collection: Collection, record: RawRecord) -> Result<()> {
        for (name, _) in &record.indexes {
            resolve_index(collection, name)?;
        }

        let pool = self.pool().await?;
        let name = collection.as_str();
        let size = i64::try_from(record.size_bytes()).unwrap_or(i64::MAX);
        let now = chrono::Utc::now().timestamp_millis();

        let mut tx = pool
            .begin()
            .await
            .map_err(|e| StoreError::from_write(name, e))?;

        sqlx::query(
            r#"
            INSERT INTO records (collection, record_key, body, size_bytes, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (collection, record_key) DO UPDATE SET
                body = excluded.body,
                size_bytes = excluded.size_bytes,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(name)
        .bind(&record.key)
        .bind(&record.body)
        .bind(size)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::from_write(name, e))?;

        sqlx::query("DELETE FROM record_indexes WHERE collection = ? AND record_key = ?")
            .bind(name)
            .bind(&record.key)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::from_write(name, e))?;

        for (index_name, value) in &record.indexes {
            let query = sqlx::query(
                "INSERT INTO record_indexes (collection, index_name, index_value, record_key) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(name)
            .bind(*index_name);
            bind_value(query, value)
                .bind(&record.key)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::from_write(name, e))?;
        }

        tx.commit().await.map_err(|e| {
            warn!(error = %e, "Commit failed");
            StoreError::from_write(name, e)
        })?;

        debug!(size_bytes = size, "Record stored");
        Ok(())
    }

    async fn get_raw(&self, collection: Collection, key: &str) -> Result<Option<String>> {
        let pool = self.pool().await?;
        let row: Option<(String,)> =
            sqlx::query_as("SELECT body FROM records WHERE collection = ? AND record_key = ?")
                .bind(collection.as_str())
                .bind(key)
                .fetch_optional(pool)
                .await?;
        Ok(row.map(|(body,)| body))
    }

    async fn get_all_by_index_raw(
        &self,
        collection: Collection,
        index: &str,
        query: &IndexQuery,
    ) -> Result<Vec<String>> {
        let index = resolve_index(collection, index)?;
        let pool = self.pool().await?;

        let rows: Vec<(String,)> = match query {
            IndexQuery::Eq(value) => {
                let q = sqlx::query_as(
                    r#"
                    SELECT r.body FROM record_indexes i
                    JOIN records r ON r.collection = i.collection AND r.record_key = i.record_key
                    WHERE i.collection = ? AND i.index_name = ? AND i.index_value = ?
                    ORDER BY i.index_value, i.record_key
                    "#,
                )
                .bind(collection.as_str())
                .bind(index);
                let q = match value {
                    IndexValue::Int(i) => q.bind(*i),
                    IndexValue::Text(s) => q.bind(s.clone()),
                };
                q.fetch_all(pool).await?
            }
            IndexQuery::All => {
                sqlx::query_as(
                    r#"
                    SELECT r.body FROM record_indexes i
                    JOIN records r ON r.collection = i.collection AND r.record_key = i.record_key
                    WHERE i.collection = ? AND i.index_name = ?
                    ORDER BY i.index_value, i.record_key
                    "#,
                )
                .bind(collection.as_str())
                .bind(index)
                .fetch_all(pool)
                .await?
            }
        };

        Ok(rows.into_iter().map(|(body,)| body).collect())
    }

    async fn get_all_raw(&self, collection: Collection) -> Result<Vec<String>> {
        let pool = self.pool().await?;
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT body FROM records WHERE collection = ? ORDER BY record_key")
                .bind(collection.as_str())
                .fetch_all(pool)
                .await?;
        Ok(rows.into_iter().map(|(body,)| body).collect())
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<bool> {
        let pool = self.pool().await?;
        let result = sqlx::query("DELETE FROM records WHERE collection = ? AND record_key = ?")
            .bind(collection.as_str())
            .bind(key)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(collection = %collection))]
    async fn clear(&self, collection: Collection) -> Result<()> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM record_indexes WHERE collection = ?")
            .bind(collection.as_str())
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM records WHERE collection = ?")
            .bind(collection.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        debug!(removed = result.rows_affected(), "Collection cleared");
        Ok(())
    }

    async fn count(&self, collection: Collection) -> Result<u64> {
        let pool = self.pool().await?;
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM records WHERE collection = ?")
            .bind(collection.as_str())
            .fetch_one(pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Book, Chapter, PendingOperation, OperationPayload, ReadingProgress};
    use crate::store::LocalStoreExt;
    use std::sync::Arc;

    fn chapter(id: i64, book_id: i64, number: u32) -> Chapter {
        Chapter {
            id,
            book_id,
            chapter_number: number,
            title: format!("Chapter {}", number),
            content: "...".into(),
            word_count: 3,
            cached_at: 0,
            downloaded: true,
        }
    }

    #[tokio::test]
    async fn test_concurrent_open_shares_one_pool() {
        let store = Arc::new(SqliteLocalStore::in_memory());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.open().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // A second pool would be a fresh :memory: database without this row.
        store.put(&chapter(1, 42, 1)).await.unwrap();
        store.open().await.unwrap();
        assert_eq!(store.count(Collection::Chapters).await.unwrap(), 1);
        assert_eq!(store.schema_version().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_put_get_replaces_record() {
        let store = SqliteLocalStore::in_memory();
        let mut book = Book {
            id: 42,
            title: "Dune".into(),
            author: "Herbert".into(),
            description: None,
            word_count: 100,
            chapter_count: 3,
            cached_at: 10,
        };
        store.put(&book).await.unwrap();
        book.title = "Dune Messiah".into();
        store.put(&book).await.unwrap();

        let loaded: Book = store.get("42").await.unwrap().unwrap();
        assert_eq!(loaded.title, "Dune Messiah");
        assert_eq!(store.count(Collection::Books).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_index_lookup_orders_by_value() {
        let store = SqliteLocalStore::in_memory();
        store.put(&chapter(30, 42, 3)).await.unwrap();
        store.put(&chapter(10, 42, 1)).await.unwrap();
        store.put(&chapter(20, 42, 2)).await.unwrap();
        store.put(&chapter(99, 7, 1)).await.unwrap();

        let by_number: Vec<Chapter> = store
            .get_all_by_index("chapter_number", IndexQuery::All)
            .await
            .unwrap();
        let numbers: Vec<u32> = by_number.iter().map(|c| c.chapter_number).collect();
        assert_eq!(numbers, vec![1, 1, 2, 3]);

        let chapters = store.chapters_for_book(42).await.unwrap();
        let ids: Vec<i64> = chapters.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn test_index_rows_follow_updates() {
        let store = SqliteLocalStore::in_memory();
        let mut progress = ReadingProgress::new(1, 42, 3, 55.0, 900.0, 1);
        store.put(&progress).await.unwrap();
        assert_eq!(store.unsynced_progress().await.unwrap().len(), 1);

        progress.synced = true;
        store.put(&progress).await.unwrap();
        assert!(store.unsynced_progress().await.unwrap().is_empty());

        let synced: Vec<ReadingProgress> = store
            .get_all_by_index("synced", IndexQuery::eq(true))
            .await
            .unwrap();
        assert_eq!(synced.len(), 1);
    }

    #[tokio::test]
    async fn test_pending_operations_in_fifo_order() {
        let store = SqliteLocalStore::in_memory();
        for seq in [3u64, 1, 2] {
            let op = PendingOperation::new(seq, OperationPayload::ShelfAdd { book_id: seq as i64 }, 500, 3);
            store.put(&op).await.unwrap();
        }

        let ops: Vec<PendingOperation> = store
            .get_all_by_index("enqueued_at", IndexQuery::All)
            .await
            .unwrap();
        let seqs: Vec<u64> = ops.iter().filter_map(|op| op.sequence()).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let store = SqliteLocalStore::in_memory();
        store.put(&chapter(1, 42, 1)).await.unwrap();
        store.put(&chapter(2, 42, 2)).await.unwrap();

        assert!(store.delete(Collection::Chapters, "1").await.unwrap());
        assert!(!store.delete(Collection::Chapters, "1").await.unwrap());
        assert_eq!(store.chapters_for_book(42).await.unwrap().len(), 1);

        store.clear(Collection::Chapters).await.unwrap();
        assert_eq!(store.count(Collection::Chapters).await.unwrap(), 0);
        assert!(store.chapters_for_book(42).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_index_is_rejected() {
        let store = SqliteLocalStore::in_memory();
        let result = store
            .get_all_by_index_raw(Collection::Books, "author", &IndexQuery::All)
            .await;
        assert!(matches!(result, Err(StoreError::UnknownIndex { .. })));
    }
}
