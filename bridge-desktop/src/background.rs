//! Desktop lifecycle observer

use async_trait::async_trait;
use bridge_traits::{
    background::{LifecycleChangeStream, LifecycleObserver, LifecycleState},
    error::Result,
};
use tokio::sync::watch;
use tracing::debug;

/// Lifecycle observer for desktop shells.
///
/// Desktop apps have no OS-enforced lifecycle, so the host forwards its own
/// window focus/minimize/close events through [`notify`](Self::notify).
/// Starts in the foreground.
pub struct DesktopLifecycleObserver {
    sender: watch::Sender<LifecycleState>,
}

impl DesktopLifecycleObserver {
    /// Create a new lifecycle observer.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(LifecycleState::Foreground);
        Self { sender }
    }

    /// Report a lifecycle transition from the host window.
    pub fn notify(&self, state: LifecycleState) {
        debug!(state = ?state, "Lifecycle state changed");
        self.sender.send_replace(state);
    }
}

impl Default for DesktopLifecycleObserver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LifecycleObserver for DesktopLifecycleObserver {
    async fn get_state(&self) -> Result<LifecycleState> {
        Ok(*self.sender.borrow())
    }

    async fn subscribe_changes(&self) -> Result<Box<dyn LifecycleChangeStream>> {
        Ok(Box::new(DesktopLifecycleChangeStream {
            receiver: self.sender.subscribe(),
        }))
    }
}

struct DesktopLifecycleChangeStream {
    receiver: watch::Receiver<LifecycleState>,
}

#[async_trait]
impl LifecycleChangeStream for DesktopLifecycleChangeStream {
    async fn next(&mut self) -> Option<LifecycleState> {
        self.receiver.changed().await.ok()?;
        let state = *self.receiver.borrow_and_update();
        Some(state)
    }
}
