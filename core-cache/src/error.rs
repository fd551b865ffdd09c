use bridge_traits::error::BridgeError;
use core_library::StoreError;
use std::sync::Arc;
use thiserror::Error;

/// Cache failures. Cloneable so one coalesced download can hand the same
/// outcome to every waiter.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("Storage error: {0}")]
    Store(Arc<StoreError>),

    /// The write still failed after an eviction pass.
    #[error("Storage full while writing {key}")]
    StorageFull { key: String },

    #[error("Entry {key} is {size} bytes, over the {max} byte budget")]
    EntryTooLarge { key: String, size: u64, max: u64 },

    #[error("Remote error: {0}")]
    Remote(#[from] BridgeError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Cache manager is shut down")]
    ShutDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    pub fn is_storage_full(&self) -> bool {
        match self {
            CacheError::StorageFull { .. } => true,
            CacheError::Store(e) => e.is_storage_full(),
            _ => false,
        }
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(self, CacheError::Remote(e) if e.is_connectivity())
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, CacheError::Remote(e) if e.is_unauthorized())
    }
}

impl From<StoreError> for CacheError {
    fn from(error: StoreError) -> Self {
        CacheError::Store(Arc::new(error))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(error: serde_json::Error) -> Self {
        CacheError::Serialization(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
