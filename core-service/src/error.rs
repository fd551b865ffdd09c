use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    /// Offline (or the remote failed) and nothing usable is cached.
    #[error("Unavailable offline: no cached data for {key}")]
    NoCachedData { key: String },

    /// The session is over; credentials have been cleared.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Remote error: {0}")]
    Remote(#[from] BridgeError),

    #[error("Storage error: {0}")]
    Store(#[from] core_library::StoreError),

    #[error("Cache error: {0}")]
    Cache(#[from] core_cache::CacheError),

    #[error("Sync error: {0}")]
    Sync(#[from] core_sync::SyncError),

    #[error("Network error: {0}")]
    Network(#[from] core_network::NetworkError),
}

impl ServiceError {
    pub fn is_unauthorized(&self) -> bool {
        match self {
            ServiceError::Unauthorized(_) => true,
            ServiceError::Remote(e) => e.is_unauthorized(),
            ServiceError::Sync(e) => e.is_unauthorized(),
            _ => false,
        }
    }

    /// The "unavailable offline" condition.
    pub fn is_no_cached_data(&self) -> bool {
        matches!(self, ServiceError::NoCachedData { .. })
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
