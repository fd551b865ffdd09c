//! Application lifecycle.
//!
//! The sync manager replays its queue when the app returns to the foreground
//! and attempts a bounded flush when the host announces termination.

use async_trait::async_trait;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Foreground,
    Background,
    /// The host is about to tear the process (or page) down.
    Terminating,
}

/// Host lifecycle notifications: `visibilitychange`/`pagehide` on the web,
/// activity callbacks on mobile, window focus on desktop.
#[async_trait]
pub trait LifecycleObserver: Send + Sync {
    async fn get_state(&self) -> Result<LifecycleState>;

    async fn subscribe_changes(&self) -> Result<Box<dyn LifecycleChangeStream>>;
}

#[async_trait]
pub trait LifecycleChangeStream: Send {
    /// `None` once the host stops reporting.
    async fn next(&mut self) -> Option<LifecycleState>;
}
