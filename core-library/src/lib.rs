//! # Local Store
//!
//! Durable, versioned, indexed on-device storage for the reading engine.
//!
//! ## Overview
//!
//! This crate owns:
//! - The five collections: books, chapters, reading progress, pending
//!   operations and cache entries
//! - The [`LocalStore`] contract with typed access through [`LocalStoreExt`]
//! - A SQLite engine with embedded migrations and an in-memory engine
//!
//! Every operation is individually atomic. A write rejected by the storage
//! quota fails with [`StoreError::StorageFull`].

pub mod adapters;
pub mod db;
pub mod error;
pub mod models;
pub mod store;

pub use adapters::{MemoryLocalStore, SqliteLocalStore};
pub use db::DatabaseConfig;
pub use error::{Result, StoreError};
pub use models::{
    Book, CacheEntry, Chapter, Collection, IndexQuery, IndexValue, OperationKind,
    OperationPayload, PendingOperation, ReadingProgress, Record,
};
pub use store::{LocalStore, LocalStoreExt, RawRecord};
