//! Workspace entry crate.
//!
//! Exposes feature flags that map to the workspace crates so a host can depend
//! on `folio-workspace` alone. With `desktop-shims` (the default) the engine is
//! re-exported and can be built with only a configuration:
//!
//! ```no_run
//! # #[cfg(feature = "desktop-shims")]
//! # async fn example() -> folio_workspace::engine::Result<()> {
//! use folio_workspace::engine::EngineContext;
//! use folio_workspace::EngineConfig;
//!
//! let config = EngineConfig::default().with_api_base_url("https://api.folio.example/api");
//! let engine = EngineContext::builder(config).build().await?;
//! engine.start()?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "desktop-shims")]
pub use core_service as engine;

#[cfg(feature = "desktop-shims")]
pub use core_service::EngineConfig;
