//! Bearer credential held in the host's secure store.
//!
//! The API connector reads the token from the same store on every request,
//! so clearing it here takes effect on the next call.

use bridge_traits::storage::{SecureStore, BEARER_TOKEN_KEY};
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::Result;

#[derive(Clone)]
pub struct Credentials {
    store: Arc<dyn SecureStore>,
    event_bus: EventBus,
}

impl Credentials {
    pub fn new(store: Arc<dyn SecureStore>, event_bus: EventBus) -> Self {
        Self { store, event_bus }
    }

    pub async fn set_token(&self, token: &str) -> Result<()> {
        self.store
            .set_secret(BEARER_TOKEN_KEY, token.as_bytes())
            .await?;
        info!("Bearer token stored");
        Ok(())
    }

    pub async fn has_token(&self) -> Result<bool> {
        Ok(self.store.has_secret(BEARER_TOKEN_KEY).await?)
    }

    /// Remove the token. Emits `CredentialsCleared` only if one was stored.
    pub async fn clear(&self) -> Result<()> {
        if !self.has_token().await? {
            return Ok(());
        }
        self.store.delete_secret(BEARER_TOKEN_KEY).await?;
        info!("Bearer token cleared");
        self.event_bus
            .emit(CoreEvent::Auth(AuthEvent::CredentialsCleared))
            .ok();
        Ok(())
    }

    /// End the session after a 401: clear the token and announce it.
    pub async fn expire(&self, message: &str) {
        warn!(message, "Session expired");
        if let Err(e) = self.clear().await {
            warn!(error = %e, "Failed to clear credentials after 401");
        }
        self.event_bus
            .emit(CoreEvent::Auth(AuthEvent::SessionExpired {
                message: message.to_string(),
            }))
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::InMemorySecureStore;

    #[tokio::test]
    async fn test_expire_clears_token_and_emits() {
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();
        let credentials = Credentials::new(Arc::new(InMemorySecureStore::new()), bus);

        credentials.set_token("abc").await.unwrap();
        credentials.expire("token expired").await;

        assert!(!credentials.has_token().await.unwrap());
        assert!(matches!(
            events.recv().await.unwrap(),
            CoreEvent::Auth(AuthEvent::CredentialsCleared)
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            CoreEvent::Auth(AuthEvent::SessionExpired { .. })
        ));
    }

    #[tokio::test]
    async fn test_clear_without_token_is_silent() {
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();
        let credentials = Credentials::new(Arc::new(InMemorySecureStore::new()), bus);

        credentials.clear().await.unwrap();
        assert!(events.try_recv().is_err());
    }
}
