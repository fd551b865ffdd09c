//! Request façade and engine bootstrap.
//!
//! This crate wires host-provided bridge implementations (HTTP, secure
//! storage, connectivity, lifecycle) into the engine and exposes the single
//! entry point the UI talks to: [`RequestFacade`]. Desktop hosts typically
//! enable the `desktop-shims` feature (which depends on `bridge-desktop`) so
//! an HTTP client and a secure store are available without extra wiring.

pub mod context;
pub mod credentials;
pub mod error;
pub mod facade;

pub use context::{EngineContext, EngineContextBuilder};
pub use credentials::Credentials;
pub use error::{Result, ServiceError};
pub use facade::{canonical_key, DataSource, Fetched, ReadStrategy, RequestFacade, WriteOutcome};

pub use core_runtime::events::{CoreEvent, EventBus};
pub use core_runtime::EngineConfig;
