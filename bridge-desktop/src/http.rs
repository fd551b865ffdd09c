//! `HttpClient` over reqwest.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse},
};
use reqwest::{Client, Method};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = concat!("folio-reader-core/", env!("CARGO_PKG_VERSION"));

/// Pooled rustls client. No retries: failed writes go through the sync
/// queue and failed reads fall back to the cache.
pub struct ReqwestHttpClient {
    client: Client,
    default_timeout: Duration,
}

impl ReqwestHttpClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// `timeout` applies to requests that do not carry their own.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| BridgeError::NotAvailable(format!("reqwest client: {}", e)))?;
        Ok(Self::with_client(client, timeout))
    }

    pub fn with_client(client: Client, default_timeout: Duration) -> Self {
        Self {
            client,
            default_timeout,
        }
    }
}

fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Head => Method::HEAD,
    }
}

/// Anything that prevented a response counts as connectivity, except an
/// elapsed deadline.
fn transport_error(error: reqwest::Error, deadline: Duration) -> BridgeError {
    if error.is_timeout() {
        BridgeError::Timeout(deadline)
    } else if error.is_connect() || error.is_request() || error.is_body() {
        BridgeError::Connectivity(error.to_string())
    } else {
        BridgeError::OperationFailed(error.to_string())
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let deadline = request.timeout.unwrap_or(self.default_timeout);
        debug!(method = ?request.method, url = %request.url, "HTTP request");

        let mut builder = self
            .client
            .request(method(request.method), &request.url)
            .timeout(deadline);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            warn!(url = %request.url, error = %e, "HTTP request got no response");
            transport_error(e, deadline)
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(e, deadline))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
