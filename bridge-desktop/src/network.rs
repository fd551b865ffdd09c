//! TCP-based connectivity signal.

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    network::{ConnectivitySignal, NetworkChangeStream, NetworkInfo, NetworkStatus, NetworkType},
};
use std::time::Duration;
use tracing::debug;

const DEFAULT_CHECK_ADDR: &str = "1.1.1.1:53";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Desktop connectivity signal
///
/// Reports "connected" when a TCP connection to a well-known address can be
/// opened. Like the browser online flag, this says nothing about whether the
/// reading API itself is reachable; the network monitor confirms with its own
/// probe.
#[derive(Debug, Clone)]
pub struct DesktopConnectivitySignal {
    check_addr: String,
    connect_timeout: Duration,
    poll_interval: Duration,
}

impl DesktopConnectivitySignal {
    pub fn new() -> Self {
        Self {
            check_addr: DEFAULT_CHECK_ADDR.to_string(),
            connect_timeout: Duration::from_secs(5),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Use a different `host:port` for the TCP check.
    pub fn with_check_addr(mut self, addr: impl Into<String>) -> Self {
        self.check_addr = addr.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn check_connectivity(&self) -> NetworkStatus {
        match tokio::time::timeout(
            self.connect_timeout,
            tokio::net::TcpStream::connect(&self.check_addr),
        )
        .await
        {
            Ok(Ok(_)) => NetworkStatus::Connected,
            Ok(Err(_)) | Err(_) => NetworkStatus::Disconnected,
        }
    }
}

impl Default for DesktopConnectivitySignal {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectivitySignal for DesktopConnectivitySignal {
    async fn current(&self) -> Result<NetworkInfo> {
        let status = self.check_connectivity().await;
        debug!(status = ?status, addr = %self.check_addr, "Connectivity checked");

        Ok(NetworkInfo {
            status,
            // Desktop can't tell WiFi from Ethernet without platform APIs
            network_type: (status == NetworkStatus::Connected).then_some(NetworkType::Other),
        })
    }

    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>> {
        Ok(Box::new(DesktopNetworkChangeStream {
            signal: self.clone(),
            last_status: None,
        }))
    }
}

/// Polls the TCP check and yields only on status changes.
struct DesktopNetworkChangeStream {
    signal: DesktopConnectivitySignal,
    last_status: Option<NetworkStatus>,
}

#[async_trait]
impl NetworkChangeStream for DesktopNetworkChangeStream {
    async fn next(&mut self) -> Option<NetworkInfo> {
        loop {
            tokio::time::sleep(self.signal.poll_interval).await;

            if let Ok(info) = self.signal.current().await {
                if self.last_status.as_ref() != Some(&info.status) {
                    self.last_status = Some(info.status);
                    return Some(info);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connected_when_listener_accepts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let signal = DesktopConnectivitySignal::new().with_check_addr(addr.to_string());
        assert!(signal.is_connected().await);
    }

    #[tokio::test]
    async fn test_disconnected_when_nothing_listens() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let signal = DesktopConnectivitySignal::new().with_check_addr(addr.to_string());
        let info = signal.current().await.unwrap();
        assert_eq!(info.status, NetworkStatus::Disconnected);
        assert_eq!(info.network_type, None);
    }

    #[tokio::test]
    async fn test_change_stream_reports_first_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let signal = DesktopConnectivitySignal::new()
            .with_check_addr(addr.to_string())
            .with_poll_interval(Duration::from_millis(10));
        let mut stream = signal.subscribe_changes().await.unwrap();

        let info = stream.next().await.unwrap();
        assert_eq!(info.status, NetworkStatus::Connected);
    }
}
