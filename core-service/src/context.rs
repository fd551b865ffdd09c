//! Engine construction and lifecycle.
//!
//! [`EngineContext`] owns one instance of every manager. Hosts build it once
//! at startup, call [`EngineContext::start`] and call
//! [`EngineContext::shutdown`] on teardown so no timer outlives the host.
//!
//! ```no_run
//! # async fn example() -> core_service::Result<()> {
//! use core_runtime::EngineConfig;
//! use core_service::EngineContext;
//!
//! let config = EngineConfig::default()
//!     .with_api_base_url("https://api.folio.example/api")
//!     .with_database_path("/var/lib/folio/engine.db");
//!
//! let engine = EngineContext::builder(config).build().await?;
//! engine.start()?;
//!
//! let book = engine.facade().get_book(42).await?;
//! println!("{} ({:?})", book.data.title, book.source);
//!
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

use bridge_traits::error::BridgeError;
use bridge_traits::{
    Clock, ConnectivitySignal, HttpClient, LifecycleObserver, RemoteApi, SecureStore, SystemClock,
};
use core_cache::CacheManager;
use core_library::{DatabaseConfig, LocalStore, SqliteLocalStore};
use core_network::{HttpProbe, NetworkMonitor, NetworkState, ReachabilityProbe};
use core_runtime::events::{CoreEvent, EventBus, EventSeverity, SyncEvent};
use core_runtime::EngineConfig;
use core_sync::{SyncManager, DEFAULT_EXIT_FLUSH_TIMEOUT};
use provider_folio_api::FolioApiConnector;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::credentials::Credentials;
use crate::error::{Result, ServiceError};
use crate::facade::{ReadStrategy, RequestFacade};

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Collects host capabilities before the engine is assembled.
///
/// Anything not supplied is derived: the remote API from the HTTP client and
/// `api_base_url`, the probe from the same pair, the store from
/// `database_path` (in memory when unset). With the `desktop-shims` feature
/// the HTTP client and secure store fall back to the desktop implementations.
pub struct EngineContextBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn LocalStore>>,
    remote: Option<Arc<dyn RemoteApi>>,
    http_client: Option<Arc<dyn HttpClient>>,
    secure_store: Option<Arc<dyn SecureStore>>,
    probe: Option<Arc<dyn ReachabilityProbe>>,
    signal: Option<Arc<dyn ConnectivitySignal>>,
    lifecycle: Option<Arc<dyn LifecycleObserver>>,
    clock: Option<Arc<dyn Clock>>,
    event_bus: Option<EventBus>,
    strategy: ReadStrategy,
}

impl EngineContextBuilder {
    fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: None,
            remote: None,
            http_client: None,
            secure_store: None,
            probe: None,
            signal: None,
            lifecycle: None,
            clock: None,
            event_bus: None,
            strategy: ReadStrategy::default(),
        }
    }

    pub fn store(mut self, store: Arc<dyn LocalStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn remote(mut self, remote: Arc<dyn RemoteApi>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn secure_store(mut self, store: Arc<dyn SecureStore>) -> Self {
        self.secure_store = Some(store);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn ReachabilityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn connectivity_signal(mut self, signal: Arc<dyn ConnectivitySignal>) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn lifecycle(mut self, lifecycle: Arc<dyn LifecycleObserver>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn read_strategy(mut self, strategy: ReadStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[cfg(feature = "desktop-shims")]
    fn default_http_client(config: &EngineConfig) -> Result<Arc<dyn HttpClient>> {
        let client = bridge_desktop::ReqwestHttpClient::with_timeout(config.request_timeout())
            .map_err(|e| ServiceError::InitializationFailed(e.to_string()))?;
        Ok(Arc::new(client))
    }

    #[cfg(not(feature = "desktop-shims"))]
    fn default_http_client(_config: &EngineConfig) -> Result<Arc<dyn HttpClient>> {
        Err(ServiceError::CapabilityMissing {
            capability: "HttpClient".to_string(),
            message: "No HTTP client supplied and desktop shims are disabled".to_string(),
        })
    }

    #[cfg(feature = "desktop-shims")]
    fn default_secure_store() -> Result<Arc<dyn SecureStore>> {
        Ok(Arc::new(bridge_desktop::InMemorySecureStore::new()))
    }

    #[cfg(not(feature = "desktop-shims"))]
    fn default_secure_store() -> Result<Arc<dyn SecureStore>> {
        Err(ServiceError::CapabilityMissing {
            capability: "SecureStore".to_string(),
            message: "No secure store supplied and desktop shims are disabled".to_string(),
        })
    }

    fn resolve_http(
        slot: &mut Option<Arc<dyn HttpClient>>,
        config: &EngineConfig,
    ) -> Result<Arc<dyn HttpClient>> {
        if let Some(client) = slot {
            return Ok(Arc::clone(client));
        }
        let client = Self::default_http_client(config)?;
        *slot = Some(Arc::clone(&client));
        Ok(client)
    }

    fn base_url(config: &EngineConfig) -> Result<String> {
        config.api_base_url.clone().ok_or_else(|| {
            ServiceError::Config(core_runtime::Error::Config(
                "apiBaseUrl is required unless a remote and a probe are supplied".to_string(),
            ))
        })
    }

    /// Validate the configuration, fill in defaults and open the store.
    pub async fn build(self) -> Result<EngineContext> {
        let config = self.config;
        config.validate()?;

        let event_bus = self
            .event_bus
            .unwrap_or_else(|| EventBus::new(DEFAULT_EVENT_CAPACITY));
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let secure_store = match self.secure_store {
            Some(store) => store,
            None => Self::default_secure_store()?,
        };

        let mut http_client = self.http_client;

        let remote = match self.remote {
            Some(remote) => remote,
            None => {
                let http = Self::resolve_http(&mut http_client, &config)?;
                let connector =
                    FolioApiConnector::new(http, Arc::clone(&secure_store), Self::base_url(&config)?)
                        .map_err(BridgeError::from)?
                        .with_timeout(config.request_timeout());
                Arc::new(connector) as Arc<dyn RemoteApi>
            }
        };

        let probe = match self.probe {
            Some(probe) => probe,
            None => {
                let http = Self::resolve_http(&mut http_client, &config)?;
                Arc::new(HttpProbe::new(http, Self::base_url(&config)?, config.probe_timeout()))
                    as Arc<dyn ReachabilityProbe>
            }
        };

        let store = match self.store {
            Some(store) => store,
            None => {
                let db_config = match &config.database_path {
                    Some(path) => DatabaseConfig::new(path.clone()),
                    None => DatabaseConfig::in_memory(),
                };
                Arc::new(SqliteLocalStore::new(db_config)) as Arc<dyn LocalStore>
            }
        };
        store.open().await?;

        let mut monitor = NetworkMonitor::new(probe, event_bus.clone(), &config);
        if let Some(signal) = self.signal {
            monitor = monitor.with_signal(signal);
        }
        let monitor = Arc::new(monitor);

        let cache = Arc::new(CacheManager::new(
            Arc::clone(&store),
            Arc::clone(&remote),
            Arc::clone(&clock),
            event_bus.clone(),
            config.clone(),
        ));

        let mut sync = SyncManager::new(
            Arc::clone(&store),
            Arc::clone(&remote),
            Arc::clone(&clock),
            Arc::clone(&monitor),
            event_bus.clone(),
            config.clone(),
        );
        if let Some(lifecycle) = self.lifecycle {
            sync = sync.with_lifecycle(lifecycle);
        }
        let sync = Arc::new(sync);

        let credentials = Credentials::new(secure_store, event_bus.clone());
        let facade = Arc::new(
            RequestFacade::new(
                remote,
                Arc::clone(&cache),
                Arc::clone(&sync),
                Arc::clone(&monitor),
                credentials.clone(),
                clock,
            )
            .with_strategy(self.strategy),
        );

        info!(
            database = ?config.database_path,
            api = ?config.api_base_url,
            "Engine assembled"
        );

        Ok(EngineContext {
            config,
            event_bus,
            store,
            monitor,
            cache,
            sync,
            credentials,
            facade,
            cancel: CancellationToken::new(),
            bridge: Mutex::new(None),
        })
    }
}

/// The assembled engine.
pub struct EngineContext {
    config: EngineConfig,
    event_bus: EventBus,
    store: Arc<dyn LocalStore>,
    monitor: Arc<NetworkMonitor>,
    cache: Arc<CacheManager>,
    sync: Arc<SyncManager>,
    credentials: Credentials,
    facade: Arc<RequestFacade>,
    cancel: CancellationToken,
    bridge: Mutex<Option<JoinHandle<()>>>,
}

enum Step {
    Stop,
    Network(Option<NetworkState>),
    Event(Option<CoreEvent>),
    Lagged(u64),
}

impl EngineContext {
    pub fn builder(config: EngineConfig) -> EngineContextBuilder {
        EngineContextBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    pub fn monitor(&self) -> &Arc<NetworkMonitor> {
        &self.monitor
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn sync(&self) -> &Arc<SyncManager> {
        &self.sync
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn facade(&self) -> &Arc<RequestFacade> {
        &self.facade
    }

    /// Start the monitor, the cache cleanup loop, the sync driver and the
    /// task that resumes deferred downloads on reconnect.
    pub fn start(&self) -> Result<()> {
        let mut bridge = self.bridge.lock();
        if bridge.is_some() {
            return Err(ServiceError::InitializationFailed(
                "engine already started".to_string(),
            ));
        }

        let network = self.monitor.subscribe();
        let events = self.event_bus.subscribe();

        self.monitor.start()?;
        self.cache.start();
        self.sync.start()?;

        let cache = Arc::clone(&self.cache);
        let credentials = self.credentials.clone();
        let cancel = self.cancel.clone();
        *bridge = Some(tokio::spawn(async move {
            run_bridge(cache, credentials, network, events, cancel).await
        }));

        info!("Engine started");
        Ok(())
    }

    /// Best-effort flush of pending writes, then stop every background task.
    pub async fn shutdown(&self) {
        if self.monitor.is_online() {
            match self.sync.pending_count().await {
                Ok(0) => {}
                Ok(pending) => {
                    debug!(pending, "Flushing before shutdown");
                    if let Err(e) = self.sync.flush_before_exit(DEFAULT_EXIT_FLUSH_TIMEOUT).await {
                        warn!(error = %e, "Exit flush incomplete");
                    }
                }
                Err(e) => warn!(error = %e, "Could not read the pending queue"),
            }
        }

        self.cancel.cancel();
        let handle = self.bridge.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Engine event bridge ended abnormally");
            }
        }

        self.sync.shutdown().await;
        self.cache.shutdown().await;
        self.monitor.shutdown().await;
        info!("Engine stopped");
    }
}

async fn run_bridge(
    cache: Arc<CacheManager>,
    credentials: Credentials,
    mut network: watch::Receiver<NetworkState>,
    mut events: broadcast::Receiver<CoreEvent>,
    cancel: CancellationToken,
) {
    let mut network_open = true;
    let mut events_open = true;

    loop {
        let step = tokio::select! {
            _ = cancel.cancelled() => Step::Stop,
            changed = network.changed(), if network_open => match changed {
                Ok(()) => Step::Network(Some(*network.borrow_and_update())),
                Err(_) => Step::Network(None),
            },
            received = events.recv(), if events_open => match received {
                Ok(event) => Step::Event(Some(event)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => Step::Lagged(skipped),
                Err(broadcast::error::RecvError::Closed) => Step::Event(None),
            },
            else => Step::Stop,
        };

        match step {
            Step::Stop => break,
            Step::Lagged(skipped) => debug!(skipped, "Engine event bridge lagged"),
            Step::Network(Some(NetworkState::Online)) if !cache.deferred_downloads().is_empty() => {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    let report = cache.resume_deferred_downloads().await;
                    debug!(
                        succeeded = report.succeeded.len(),
                        failed = report.failed.len(),
                        "Deferred downloads resumed"
                    );
                });
            }
            Step::Network(Some(_)) => {}
            Step::Network(None) => network_open = false,
            Step::Event(Some(CoreEvent::Sync(SyncEvent::Error {
                message,
                recoverable: false,
                ..
            }))) => credentials.expire(&message).await,
            Step::Event(Some(event)) if event.severity() >= EventSeverity::Warning => {
                warn!(event = event.description(), "Engine reported a problem");
            }
            Step::Event(Some(_)) => {}
            Step::Event(None) => events_open = false,
        }
    }
    debug!("Engine event bridge stopped");
}
