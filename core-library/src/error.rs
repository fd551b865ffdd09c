use thiserror::Error;

/// SQLite primary result code for "database or disk is full".
const SQLITE_FULL: &str = "13";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Storage full while writing to {collection}")]
    StorageFull { collection: String },

    #[error("Unknown index {index} on collection {collection}")]
    UnknownIndex { collection: String, index: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

impl StoreError {
    pub fn is_storage_full(&self) -> bool {
        matches!(self, StoreError::StorageFull { .. })
    }

    /// Map a sqlx failure raised while writing `collection`, surfacing
    /// quota exhaustion as [`StoreError::StorageFull`].
    pub(crate) fn from_write(collection: &str, error: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_error) = &error {
            let full = db_error.code().as_deref() == Some(SQLITE_FULL)
                || db_error.message().contains("database or disk is full");
            if full {
                return StoreError::StorageFull {
                    collection: collection.to_string(),
                };
            }
        }
        StoreError::Database(error)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        StoreError::Database(error)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        StoreError::Serialization(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
