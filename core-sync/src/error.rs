use bridge_traits::error::BridgeError;
use core_library::StoreError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Remote error: {0}")]
    Remote(#[from] BridgeError),

    /// The remote rejected the credentials. Never retried.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Network is offline")]
    Offline,

    #[error("A sync pass is already running")]
    SyncInProgress,

    #[error("Sync manager already started")]
    AlreadyStarted,

    #[error("Sync timeout after {} ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Operation {operation_id} ({kind}) dropped after {retry_count} attempts: {message}")]
    Exhausted {
        operation_id: String,
        kind: String,
        retry_count: u32,
        message: String,
    },
}

impl SyncError {
    /// Whether a later pass may succeed without user action.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            SyncError::Unauthorized(_) | SyncError::Exhausted { .. } | SyncError::AlreadyStarted
        )
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SyncError::Unauthorized(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
