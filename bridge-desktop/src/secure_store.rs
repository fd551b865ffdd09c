//! OS keychain storage for the bearer credential.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{SecureStore, BEARER_TOKEN_KEY},
};
use keyring::Entry;
use tracing::debug;

const DEFAULT_SERVICE: &str = "folio-reader";

/// [`SecureStore`] over the platform keychain (macOS Keychain, Windows
/// Credential Manager, Secret Service on Linux).
///
/// The keychain only holds strings, so values are stored base64-encoded.
pub struct KeyringSecureStore {
    service: String,
}

impl KeyringSecureStore {
    pub fn new() -> Self {
        Self::with_service_name(DEFAULT_SERVICE)
    }

    pub fn with_service_name(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key).map_err(keyring_error)
    }
}

impl Default for KeyringSecureStore {
    fn default() -> Self {
        Self::new()
    }
}

fn keyring_error(e: keyring::Error) -> BridgeError {
    BridgeError::OperationFailed(format!("keychain: {}", e))
}

/// Read the raw stored string, treating a missing entry as `None`.
fn read(entry: &Entry) -> Result<Option<String>> {
    match entry.get_password() {
        Ok(value) => Ok(Some(value)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(keyring_error(e)),
    }
}

#[async_trait]
impl SecureStore for KeyringSecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entry(key)?
            .set_password(&STANDARD.encode(value))
            .map_err(keyring_error)?;
        debug!(key, "Secret stored in keychain");
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(encoded) = read(&self.entry(key)?)? else {
            return Ok(None);
        };
        let decoded = STANDARD
            .decode(encoded)
            .map_err(|e| BridgeError::OperationFailed(format!("corrupt keychain value for {}: {}", key, e)))?;
        Ok(Some(decoded))
    }

    async fn delete_secret(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {
                debug!(key, "Secret removed from keychain");
                Ok(())
            }
            Err(e) => Err(keyring_error(e)),
        }
    }

    async fn has_secret(&self, key: &str) -> Result<bool> {
        Ok(read(&self.entry(key)?)?.is_some())
    }

    async fn clear_all(&self) -> Result<()> {
        // The keychain cannot enumerate by service; the bearer token is the
        // only secret the engine writes.
        self.delete_secret(BEARER_TOKEN_KEY).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_service_name() {
        assert_eq!(KeyringSecureStore::new().service, DEFAULT_SERVICE);
        assert_eq!(KeyringSecureStore::with_service_name("x").service, "x");
    }

    #[tokio::test]
    async fn test_round_trip_when_keychain_available() {
        // Headless CI machines usually have no keychain; only assert when the
        // write itself succeeds.
        let store = KeyringSecureStore::with_service_name("folio-reader-test");
        let key = "test.round_trip";
        let _ = store.delete_secret(key).await;

        if store.set_secret(key, b"\x00token\xff").await.is_ok() {
            if let Ok(Some(value)) = store.get_secret(key).await {
                assert_eq!(value, b"\x00token\xff".to_vec());
            }
            store.delete_secret(key).await.unwrap();
            assert!(!store.has_secret(key).await.unwrap_or(false));
        }
    }
}
