//! Typed engine events over `tokio::sync::broadcast`.
//!
//! The network monitor, sync manager and cache manager never hold callbacks
//! into each other. They emit [`CoreEvent`]s on a shared [`EventBus`] and
//! whoever cares subscribes.
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(16);
//! let mut events = bus.subscribe();
//!
//! bus.emit(CoreEvent::Sync(SyncEvent::Started {
//!     run_id: "run-1".to_string(),
//!     pending: 2,
//!     trigger: "online".to_string(),
//! }))
//! .ok();
//!
//! assert!(matches!(events.recv().await, Ok(CoreEvent::Sync(SyncEvent::Started { .. }))));
//! # }
//! ```
//!
//! `emit` fails when nobody is subscribed; emitters ignore that with `.ok()`.
//! A lagged receiver should re-read current state instead of replaying.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Connectivity state machine transitions
    Network(NetworkEvent),
    /// Write-behind queue replay
    Sync(SyncEvent),
    /// Cache maintenance and chapter downloads
    Cache(CacheEvent),
    /// Session/credential changes
    Auth(AuthEvent),
}

impl CoreEvent {
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Network(e) => e.description(),
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Cache(e) => e.description(),
            CoreEvent::Auth(e) => e.description(),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Auth(AuthEvent::SessionExpired { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::Error { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::DeadLettered { .. }) => EventSeverity::Warning,
            CoreEvent::Cache(CacheEvent::DownloadFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Cache(CacheEvent::StorageFull { .. }) => EventSeverity::Warning,
            CoreEvent::Network(NetworkEvent::StateChanged {
                to: NetworkState::Offline,
                ..
            }) => EventSeverity::Warning,
            CoreEvent::Network(NetworkEvent::StateChanged {
                to: NetworkState::Online,
                ..
            }) => EventSeverity::Info,
            CoreEvent::Sync(SyncEvent::Completed { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Connectivity state as seen by the network monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkState {
    /// Last probe succeeded
    Online,
    /// Disconnect signal or failed probe; waiting for the next attempt
    Offline,
    /// A reconnect probe is in flight
    Reconnecting,
}

impl NetworkState {
    pub fn is_online(self) -> bool {
        matches!(self, NetworkState::Online)
    }
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NetworkState::Online => "ONLINE",
            NetworkState::Offline => "OFFLINE",
            NetworkState::Reconnecting => "RECONNECTING",
        };
        f.write_str(label)
    }
}

/// Events emitted by the network monitor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum NetworkEvent {
    /// The state machine moved between states.
    StateChanged {
        from: NetworkState,
        to: NetworkState,
        /// Reconnect attempts made so far (0 once online).
        attempts: u32,
    },
    /// The next automatic reconnect attempt was scheduled.
    ReconnectScheduled {
        /// Attempt count the delay was computed from.
        attempt: u32,
        delay_ms: u64,
    },
}

impl NetworkEvent {
    fn description(&self) -> &str {
        match self {
            NetworkEvent::StateChanged { .. } => "Network state changed",
            NetworkEvent::ReconnectScheduled { .. } => "Reconnect attempt scheduled",
        }
    }
}

/// Events related to replaying the pending-operation queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A queue replay pass started.
    Started {
        /// Unique identifier for this pass.
        run_id: String,
        /// Operations waiting when the pass began.
        pending: u64,
        /// What triggered the pass (e.g. "online", "interval", "foreground").
        trigger: String,
    },
    /// A replay pass finished.
    Completed {
        run_id: String,
        processed: u64,
        succeeded: u64,
        failed: u64,
        dead_lettered: u64,
        /// Reading-progress records reconciled after the queue.
        progress_synced: u64,
        duration_ms: u64,
    },
    /// A replay pass was aborted.
    Error {
        run_id: Option<String>,
        message: String,
        /// Whether a later pass may succeed.
        recoverable: bool,
    },
    /// An operation exhausted its retries and was dropped.
    DeadLettered {
        operation_id: String,
        kind: String,
        retry_count: u32,
        message: String,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::Completed { .. } => "Sync completed",
            SyncEvent::Error { .. } => "Sync failed",
            SyncEvent::DeadLettered { .. } => "Operation dropped after exhausting retries",
        }
    }
}

/// Events related to cache maintenance and chapter downloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// Download progress for a chapter body (0-100).
    DownloadProgress {
        /// Unknown until the chapter has been fetched, unless the caller supplied it.
        book_id: Option<i64>,
        chapter_id: i64,
        percent: u8,
    },
    /// A chapter body was fetched and persisted.
    DownloadCompleted {
        book_id: i64,
        chapter_id: i64,
        size_bytes: u64,
    },
    /// A chapter download failed.
    DownloadFailed {
        chapter_id: i64,
        message: String,
        /// Queued for retry once the network returns.
        deferred: bool,
    },
    /// An eviction pass removed entries.
    Evicted {
        entries_removed: u64,
        bytes_freed: u64,
        total_bytes: u64,
    },
    /// A cache write failed even after evicting.
    StorageFull { key: String },
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::DownloadProgress { .. } => "Chapter download in progress",
            CacheEvent::DownloadCompleted { .. } => "Chapter downloaded",
            CacheEvent::DownloadFailed { .. } => "Chapter download failed",
            CacheEvent::Evicted { .. } => "Cache entries evicted",
            CacheEvent::StorageFull { .. } => "Local storage full",
        }
    }
}

/// Events related to the bearer credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// The remote rejected the credential; the session is over.
    SessionExpired { message: String },
    /// Local credentials were removed.
    CredentialsCleared,
}

impl AuthEvent {
    fn description(&self) -> &str {
        match self {
            AuthEvent::SessionExpired { .. } => "Session expired",
            AuthEvent::CredentialsCleared => "Credentials cleared",
        }
    }
}

/// Cloneable handle over a `broadcast` channel of [`CoreEvent`]s.
///
/// Each [`subscribe`](Self::subscribe) sees only events emitted after it
/// was created. A subscriber more than `capacity` events behind gets
/// `RecvError::Lagged`.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Returns how many subscribers received the event; errors when there
    /// are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
