//! # Host Bridge Traits
//!
//! The capabilities the reading engine needs from its host, as object-safe
//! async traits. The engine crates are written only against these; each host
//! (desktop, mobile, web) supplies implementations.
//!
//! | Concern | Trait |
//! |---------|-------|
//! | HTTP transport | [`HttpClient`] |
//! | Reading-platform API | [`RemoteApi`] |
//! | Passive online/offline flag | [`ConnectivitySignal`] |
//! | Foreground/background/terminate | [`LifecycleObserver`] |
//! | Bearer credential | [`SecureStore`] |
//! | Time | [`Clock`] |
//! | Host logging | [`LoggerSink`] |
//!
//! All of them report failures as [`BridgeError`]. Transport-level failures
//! must map to [`BridgeError::Connectivity`] or [`BridgeError::Timeout`]:
//! the engine decides between "serve from cache" and "surface the error"
//! solely on [`BridgeError::is_connectivity`].
//!
//! `desktop` implementations live in `bridge-desktop`.

pub mod background;
pub mod error;
pub mod http;
pub mod network;
pub mod remote;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use background::{LifecycleChangeStream, LifecycleObserver, LifecycleState};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use network::{ConnectivitySignal, NetworkChangeStream, NetworkInfo, NetworkStatus, NetworkType};
pub use remote::{BookId, ChapterId, ReadingRecordUpsert, RemoteApi, RemoteBook, RemoteChapter, UserId};
pub use storage::{SecureStore, BEARER_TOKEN_KEY};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
