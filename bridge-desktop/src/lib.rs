//! Desktop implementations of the host bridge traits.
//!
//! - [`ReqwestHttpClient`]: `HttpClient` over reqwest with rustls
//! - [`DesktopConnectivitySignal`]: TCP reachability as the passive signal
//! - [`KeyringSecureStore`] (feature `secure-store`, on by default) and
//!   [`InMemorySecureStore`]
//! - [`DesktopLifecycleObserver`]: fed by the host's window events
//!
//! ```ignore
//! use bridge_desktop::{DesktopConnectivitySignal, ReqwestHttpClient};
//! use std::sync::Arc;
//!
//! let engine = EngineContext::builder(config)
//!     .http_client(Arc::new(ReqwestHttpClient::new()?))
//!     .connectivity_signal(Arc::new(DesktopConnectivitySignal::new()))
//!     .build()
//!     .await?;
//! ```

mod background;
mod http;
mod memory_store;
mod network;

#[cfg(feature = "secure-store")]
mod secure_store;

pub use background::DesktopLifecycleObserver;
pub use http::ReqwestHttpClient;
pub use memory_store::InMemorySecureStore;
pub use network::DesktopConnectivitySignal;

#[cfg(feature = "secure-store")]
pub use secure_store::KeyringSecureStore;
