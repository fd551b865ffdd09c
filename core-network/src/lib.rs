//! # Network Monitor
//!
//! Connectivity state machine for the offline engine.
//!
//! ## Overview
//!
//! The monitor combines the host's passive connectivity signal with an active
//! reachability probe and exposes one of three states: `ONLINE`, `OFFLINE` or
//! `RECONNECTING`. While offline it retries on an exponential schedule
//! (`min(base * 2^attempts, max)`) driven by a single background task.
//! Every transition is published on the event bus as
//! [`NetworkEvent::StateChanged`](core_runtime::events::NetworkEvent).

pub mod backoff;
pub mod error;
pub mod monitor;
pub mod probe;

pub use backoff::ReconnectSchedule;
pub use error::{NetworkError, Result};
pub use monitor::NetworkMonitor;
pub use probe::{HttpProbe, ReachabilityProbe};

pub use core_runtime::events::NetworkState;
