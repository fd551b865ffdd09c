//! Secret storage for the API credential.

use async_trait::async_trait;

use crate::error::Result;

/// Key under which the bearer credential for the remote API is stored.
pub const BEARER_TOKEN_KEY: &str = "auth.bearer_token";

/// Encrypted-at-rest key/value storage (Keychain, Keystore, Secret Service).
///
/// Values are opaque bytes. Implementations never log them.
#[async_trait]
pub trait SecureStore: Send + Sync {
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()>;

    /// `None` when the key was never set or has been deleted.
    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Deleting a missing key is not an error.
    async fn delete_secret(&self, key: &str) -> Result<()>;

    async fn has_secret(&self, key: &str) -> Result<bool> {
        Ok(self.get_secret(key).await?.is_some())
    }

    /// Remove every secret this store owns.
    async fn clear_all(&self) -> Result<()>;
}
