//! Error types for the Folio API provider

use bridge_traits::error::BridgeError;
use thiserror::Error;

/// Folio API provider errors
#[derive(Error, Debug)]
pub enum FolioApiError {
    /// API request returned a non-success status
    #[error("Folio API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// Failed to parse API response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Base URL is not usable
    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),

    /// Bridge error
    #[error(transparent)]
    BridgeError(#[from] BridgeError),
}

/// Result type for Folio API operations
pub type Result<T> = std::result::Result<T, FolioApiError>;

impl From<FolioApiError> for BridgeError {
    fn from(error: FolioApiError) -> Self {
        match error {
            // Keep 401 distinguishable from other statuses
            FolioApiError::ApiError {
                status_code,
                message,
            } => BridgeError::from_status(status_code, message),
            FolioApiError::ParseError(msg) => {
                BridgeError::OperationFailed(format!("Parse error: {}", msg))
            }
            FolioApiError::InvalidBaseUrl(msg) => {
                BridgeError::NotAvailable(format!("Invalid base URL: {}", msg))
            }
            FolioApiError::BridgeError(e) => e,
        }
    }
}
