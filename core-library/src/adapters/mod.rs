//! Storage engine implementations
//!
//! Concrete [`LocalStore`](crate::store::LocalStore) engines: SQLite for
//! durable storage and an ordered in-memory map for tests.

pub mod memory;
pub mod sqlite_native;

pub use memory::MemoryLocalStore;
pub use sqlite_native::SqliteLocalStore;
