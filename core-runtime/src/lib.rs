//! Shared ground for the engine crates: configuration, the typed event bus
//! and tracing setup. No engine logic lives here; every other `core-*`
//! crate depends on it for its event vocabulary and its tunables.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus, NetworkState};
