//! SQLite pool setup for [`SqliteLocalStore`](crate::SqliteLocalStore).
//!
//! Connections run in WAL mode with foreign keys on, so index rows are
//! dropped with their record. An optional `max_page_count` caps the file;
//! writes past it fail with `SQLITE_FULL`, which the store reports as
//! [`StoreError::StorageFull`].

use crate::{Result, StoreError};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

const MEMORY_URL: &str = "sqlite::memory:";

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `sqlite:<path>` or `sqlite::memory:`.
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// Page cap; `None` leaves SQLite's own limit.
    pub max_page_count: Option<u64>,
}

impl DatabaseConfig {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_url: format!("sqlite:{}", database_path.into().display()),
            max_connections: 4,
            acquire_timeout: Duration::from_secs(15),
            max_page_count: None,
        }
    }

    /// Each connection to `:memory:` gets its own database, so the pool
    /// holds exactly one connection for its whole life.
    pub fn in_memory() -> Self {
        Self {
            database_url: MEMORY_URL.to_string(),
            max_connections: 1,
            acquire_timeout: Duration::from_secs(15),
            max_page_count: None,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_url == MEMORY_URL
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn max_page_count(mut self, pages: Option<u64>) -> Self {
        self.max_page_count = pages;
        self
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Open a pool for `config` and bring the schema up to date.
pub async fn create_pool(config: DatabaseConfig) -> Result<Pool<Sqlite>> {
    let mut options = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true);
    if let Some(pages) = config.max_page_count {
        options = options.pragma("max_page_count", pages.to_string());
    }

    let mut pool_options = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout);
    if config.is_in_memory() {
        pool_options = pool_options
            .min_connections(1)
            .max_lifetime(None)
            .idle_timeout(None);
    }

    let pool = pool_options.connect_with(options).await.map_err(|e| {
        warn!(database_url = %config.database_url, error = %e, "Cannot open local store");
        StoreError::Database(e)
    })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| StoreError::Migration(e.to_string()))?;

    let version = schema_version(&pool).await?;
    info!(
        database_url = %config.database_url,
        schema_version = version,
        "Local store ready"
    );
    Ok(pool)
}

pub async fn schema_version(pool: &Pool<Sqlite>) -> Result<i64> {
    let version: i64 = sqlx::query_scalar("SELECT value FROM store_meta WHERE name = 'schema_version'")
        .fetch_one(pool)
        .await?;
    debug!(version, "Read schema version");
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_urls() {
        let config = DatabaseConfig::new("/tmp/folio.db")
            .max_connections(0)
            .max_page_count(Some(1024));

        assert_eq!(config.database_url, "sqlite:/tmp/folio.db");
        assert_eq!(config.max_connections, 1);
        assert_eq!(config.max_page_count, Some(1024));
        assert!(!config.is_in_memory());
        assert!(DatabaseConfig::default().is_in_memory());
    }

    #[tokio::test]
    async fn test_in_memory_pool_is_migrated() {
        let pool = create_pool(DatabaseConfig::in_memory()).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE '\\_%' ESCAPE '\\' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(tables, ["record_indexes", "records", "store_meta"]);
        assert_eq!(schema_version(&pool).await.unwrap(), 2);

        let foreign_keys: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(foreign_keys, 1);
    }

    #[tokio::test]
    async fn test_page_cap_surfaces_as_storage_full() {
        let config = DatabaseConfig::in_memory().max_page_count(Some(16));
        let pool = create_pool(config).await.unwrap();

        let body = "x".repeat(64 * 1024);
        let err = sqlx::query(
            "INSERT INTO records (collection, record_key, body, size_bytes) VALUES ('chapters', '1', ?, 0)",
        )
        .bind(&body)
        .execute(&pool)
        .await
        .map_err(|e| StoreError::from_write("chapters", e))
        .unwrap_err();

        assert!(err.is_storage_full(), "unexpected error: {err:?}");
    }
}
