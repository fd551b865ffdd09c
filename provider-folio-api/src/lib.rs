//! # Folio API Provider
//!
//! Implements the `RemoteApi` trait against the reading platform's REST API.
//!
//! ## Overview
//!
//! This module provides:
//! - Book, chapter listing and chapter body reads
//! - Reading-record upserts keyed by (user, book, chapter)
//! - Bookshelf membership and favorite writes with set-to semantics
//! - Bearer authentication read from the host `SecureStore` on every call

pub mod connector;
pub mod error;
pub mod types;

pub use connector::FolioApiConnector;
pub use error::{FolioApiError, Result};
