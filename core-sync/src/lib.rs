//! # Sync Manager
//!
//! Write-behind queue for mutations made while offline, replayed in enqueue
//! order once the remote is reachable again.
//!
//! ## Components
//!
//! - **Operation queue** (`queue`): persistent FIFO of [`PendingOperation`]s
//! - **Replay** (`operation`): maps each payload onto its idempotent remote call
//! - **Sync manager** (`manager`): retry/dead-letter policy, reading-progress
//!   reconciliation and the background triggers
//!
//! [`PendingOperation`]: core_library::PendingOperation

pub mod error;
pub mod manager;
pub mod operation;
pub mod queue;

pub use error::{Result, SyncError};
pub use manager::{
    DeadLetter, SyncManager, SyncReport, DEAD_LETTER_CAPACITY, DEFAULT_EXIT_FLUSH_TIMEOUT,
};
pub use queue::OperationQueue;
