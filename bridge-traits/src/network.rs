//! Passive connectivity signal.
//!
//! What the host OS (or browser) believes about the network. It is cheap and
//! immediate but can claim "connected" with no upstream, so the engine only
//! trusts a disconnect outright and confirms a connect with an active probe.

use async_trait::async_trait;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkType {
    Cellular,
    WiFi,
    Ethernet,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Connected,
    Disconnected,
    /// The host cannot tell; treated as "no news".
    Indeterminate,
}

/// One reading of the host signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub status: NetworkStatus,
    /// Interface carrying traffic, when the host reports it.
    pub network_type: Option<NetworkType>,
}

impl NetworkInfo {
    pub fn connected() -> Self {
        Self {
            status: NetworkStatus::Connected,
            network_type: Some(NetworkType::Other),
        }
    }

    pub fn disconnected() -> Self {
        Self {
            status: NetworkStatus::Disconnected,
            network_type: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == NetworkStatus::Connected
    }
}

#[async_trait]
pub trait ConnectivitySignal: Send + Sync {
    async fn current(&self) -> Result<NetworkInfo>;

    async fn is_connected(&self) -> bool {
        self.current()
            .await
            .map(|info| info.is_connected())
            .unwrap_or(false)
    }

    /// Changes after the call. Implementations emit only when the status
    /// actually changes.
    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>>;
}

#[async_trait]
pub trait NetworkChangeStream: Send {
    /// `None` once the host stops reporting.
    async fn next(&mut self) -> Option<NetworkInfo>;
}
