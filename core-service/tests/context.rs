//! Engine assembly, background tasks and teardown.

use async_trait::async_trait;
use bridge_desktop::InMemorySecureStore;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::network::NetworkInfo;
use bridge_traits::{
    BookId, ChapterId, ManualClock, ReadingRecordUpsert, RemoteApi, RemoteBook, RemoteChapter,
};
use core_library::{MemoryLocalStore, OperationPayload};
use core_network::ReachabilityProbe;
use core_runtime::EngineConfig;
use core_service::{EngineContext, ServiceError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct FakeRemote {
    offline: AtomicBool,
    unauthorized: AtomicBool,
    shelf_calls: AtomicUsize,
    chapter_calls: AtomicUsize,
}

impl FakeRemote {
    fn check(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BridgeError::Connectivity("connection refused".into()));
        }
        if self.unauthorized.load(Ordering::SeqCst) {
            return Err(BridgeError::from_status(401, "token expired"));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn get_book(&self, book_id: BookId) -> Result<RemoteBook> {
        Err(BridgeError::from_status(404, format!("book {}", book_id)))
    }

    async fn get_book_chapters(&self, _book_id: BookId) -> Result<Vec<RemoteChapter>> {
        Ok(vec![])
    }

    async fn get_chapter(&self, chapter_id: ChapterId) -> Result<RemoteChapter> {
        self.chapter_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(RemoteChapter {
            id: chapter_id,
            book_id: 42,
            chapter_number: 1,
            title: "Chapter 1".into(),
            content: "Once upon a time.".into(),
            word_count: 4,
        })
    }

    async fn upsert_reading_record(&self, _record: &ReadingRecordUpsert) -> Result<()> {
        self.check()
    }

    async fn add_to_shelf(&self, _book_id: BookId) -> Result<()> {
        self.shelf_calls.fetch_add(1, Ordering::SeqCst);
        self.check()
    }

    async fn remove_from_shelf(&self, _book_id: BookId) -> Result<()> {
        self.check()
    }

    async fn set_favorite(&self, _book_id: BookId, _favorite: bool) -> Result<()> {
        self.check()
    }
}

struct SwitchProbe(AtomicBool);

#[async_trait]
impl ReachabilityProbe for SwitchProbe {
    async fn probe(&self) -> Result<()> {
        if self.0.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BridgeError::Connectivity("no upstream".into()))
        }
    }
}

async fn engine(remote: Arc<FakeRemote>, probe: Arc<SwitchProbe>) -> EngineContext {
    EngineContext::builder(EngineConfig::default().with_probe_debounce_ms(0))
        .store(Arc::new(MemoryLocalStore::new()))
        .remote(remote)
        .probe(probe)
        .secure_store(Arc::new(InMemorySecureStore::new()))
        .clock(Arc::new(ManualClock::default()))
        .build()
        .await
        .unwrap()
}

/// Poll until `check` holds, giving background tasks a chance to run.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn invalid_config_is_rejected_at_build() {
    let result = EngineContext::builder(EngineConfig::default().with_batch_size(0))
        .store(Arc::new(MemoryLocalStore::new()))
        .remote(Arc::new(FakeRemote::default()))
        .probe(Arc::new(SwitchProbe(AtomicBool::new(true))))
        .secure_store(Arc::new(InMemorySecureStore::new()))
        .build()
        .await;
    assert!(matches!(result, Err(ServiceError::Config(_))));
}

#[tokio::test]
async fn default_remote_requires_a_base_url() {
    let result = EngineContext::builder(EngineConfig::default())
        .store(Arc::new(MemoryLocalStore::new()))
        .secure_store(Arc::new(InMemorySecureStore::new()))
        .build()
        .await;
    assert!(matches!(result, Err(ServiceError::Config(_))));
}

#[tokio::test]
async fn start_twice_is_rejected_and_shutdown_stops_everything() {
    let engine = engine(
        Arc::new(FakeRemote::default()),
        Arc::new(SwitchProbe(AtomicBool::new(true))),
    )
    .await;

    engine.start().unwrap();
    assert!(engine.start().is_err());

    engine.shutdown().await;
    assert!(!engine.sync().is_processing());
}

#[tokio::test]
async fn shutdown_flushes_pending_writes_when_online() {
    let remote = Arc::new(FakeRemote::default());
    let engine = engine(remote.clone(), Arc::new(SwitchProbe(AtomicBool::new(true)))).await;

    engine
        .sync()
        .enqueue(OperationPayload::ShelfAdd { book_id: 42 })
        .await
        .unwrap();

    engine.shutdown().await;
    assert_eq!(remote.shelf_calls.load(Ordering::SeqCst), 1);
    assert_eq!(engine.sync().pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn unauthorized_replay_clears_credentials() {
    let remote = Arc::new(FakeRemote::default());
    let engine = engine(remote.clone(), Arc::new(SwitchProbe(AtomicBool::new(true)))).await;
    engine.credentials().set_token("secret").await.unwrap();
    engine.start().unwrap();

    engine
        .sync()
        .enqueue(OperationPayload::ShelfAdd { book_id: 42 })
        .await
        .unwrap();
    remote.unauthorized.store(true, Ordering::SeqCst);

    let err = engine.sync().process_queue().await.unwrap_err();
    assert!(err.is_unauthorized());

    let credentials = engine.credentials().clone();
    assert!(
        eventually(|| {
            let credentials = credentials.clone();
            async move { !credentials.has_token().await.unwrap() }
        })
        .await
    );

    // The operation stays queued for after the user signs in again.
    assert_eq!(engine.sync().pending_count().await.unwrap(), 1);
    remote.unauthorized.store(false, Ordering::SeqCst);
    engine.shutdown().await;
}

#[tokio::test]
async fn deferred_downloads_resume_on_reconnect() {
    let remote = Arc::new(FakeRemote::default());
    let probe = Arc::new(SwitchProbe(AtomicBool::new(true)));
    let engine = engine(remote.clone(), probe.clone()).await;
    engine.start().unwrap();

    remote.offline.store(true, Ordering::SeqCst);
    probe.0.store(false, Ordering::SeqCst);
    engine
        .monitor()
        .handle_signal(NetworkInfo::disconnected())
        .await;

    assert!(engine.cache().download_chapter(301).await.is_err());
    assert_eq!(engine.cache().deferred_downloads(), vec![301]);

    remote.offline.store(false, Ordering::SeqCst);
    probe.0.store(true, Ordering::SeqCst);
    engine.monitor().handle_signal(NetworkInfo::connected()).await;

    let cache = Arc::clone(engine.cache());
    assert!(
        eventually(|| {
            let cache = Arc::clone(&cache);
            async move { cache.is_chapter_cached(301).await.unwrap() }
        })
        .await
    );
    assert!(engine.cache().deferred_downloads().is_empty());

    engine.shutdown().await;
}
