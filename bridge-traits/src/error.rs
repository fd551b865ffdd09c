use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    /// No route to the remote host: DNS failure, refused connection, reset.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The remote rejected the bearer credential (HTTP 401).
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Any other non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("IO error: {0}")]
    Io(String),
}

impl BridgeError {
    /// True for failures that mean "the network is not there", as opposed to
    /// the remote answering with an error.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, BridgeError::Connectivity(_) | BridgeError::Timeout(_))
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, BridgeError::Unauthorized(_))
    }

    /// Build an error from a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == 401 {
            BridgeError::Unauthorized(message)
        } else {
            BridgeError::Http { status, message }
        }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_classification() {
        assert!(BridgeError::Connectivity("refused".into()).is_connectivity());
        assert!(BridgeError::Timeout(Duration::from_secs(5)).is_connectivity());
        assert!(!BridgeError::from_status(500, "boom").is_connectivity());
    }

    #[test]
    fn test_from_status_maps_401() {
        assert!(BridgeError::from_status(401, "expired").is_unauthorized());
        assert_eq!(
            BridgeError::from_status(404, "missing"),
            BridgeError::Http {
                status: 404,
                message: "missing".to_string()
            }
        );
    }
}
