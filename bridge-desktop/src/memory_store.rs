//! In-memory secure store for tests and hosts without a keychain.

use async_trait::async_trait;
use bridge_traits::{error::Result, storage::SecureStore};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local [`SecureStore`]. Secrets are lost on exit.
#[derive(Default)]
pub struct InMemorySecureStore {
    secrets: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemorySecureStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecureStore for InMemorySecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        self.secrets
            .write()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.secrets.read().await.get(key).cloned())
    }

    async fn delete_secret(&self, key: &str) -> Result<()> {
        self.secrets.write().await.remove(key);
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        self.secrets.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = InMemorySecureStore::new();
        store.set_secret("auth.bearer_token", b"abc").await.unwrap();
        assert!(store.has_secret("auth.bearer_token").await.unwrap());
        assert_eq!(
            store.get_secret("auth.bearer_token").await.unwrap(),
            Some(b"abc".to_vec())
        );

        store.delete_secret("auth.bearer_token").await.unwrap();
        assert_eq!(store.get_secret("auth.bearer_token").await.unwrap(), None);
        // Deleting a missing key is not an error
        store.delete_secret("auth.bearer_token").await.unwrap();
    }
}
