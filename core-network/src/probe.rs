//! Active reachability probes.

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::http::{HttpClient, HttpRequest};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A cheap request that confirms the remote is actually reachable.
///
/// The passive connectivity signal can claim "connected" behind a router with
/// no upstream; a probe only succeeds when a real round trip completes.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self) -> Result<()>;
}

/// Issues `HEAD <url>` with a short timeout.
///
/// Any response below 500 counts as reachable. A 5xx usually comes from a
/// gateway that cannot reach the API, so it counts as a failure.
pub struct HttpProbe {
    client: Arc<dyn HttpClient>,
    url: String,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(client: Arc<dyn HttpClient>, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn probe(&self) -> Result<()> {
        let request = HttpRequest::head(self.url.clone()).timeout(self.timeout);
        let response = self.client.execute(request).await?;
        debug!(url = %self.url, status = response.status, "Reachability probe answered");

        if response.is_server_error() {
            return Err(BridgeError::Connectivity(format!(
                "probe returned {}",
                response.status
            )));
        }
        Ok(())
    }
}
