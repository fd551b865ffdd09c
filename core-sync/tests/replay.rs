//! Queue replay against an in-memory remote.

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::network::NetworkInfo;
use bridge_traits::{
    BookId, ChapterId, ManualClock, ReadingRecordUpsert, RemoteApi, RemoteBook, RemoteChapter,
};
use core_library::{
    Collection, LocalStore, LocalStoreExt, MemoryLocalStore, OperationPayload, ReadingProgress,
};
use core_network::{NetworkMonitor, NetworkState, ReachabilityProbe};
use core_runtime::events::{CoreEvent, SyncEvent};
use core_runtime::{EngineConfig, EventBus};
use core_sync::{SyncError, SyncManager, DEAD_LETTER_CAPACITY};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Remote state kept the way the API would keep it.
#[derive(Default)]
struct RemoteState {
    shelf: BTreeSet<BookId>,
    favorites: BTreeMap<BookId, bool>,
    records: BTreeMap<(BookId, ChapterId), (f64, f64)>,
    calls: Vec<String>,
}

#[derive(Default)]
struct FakeRemote {
    state: Mutex<RemoteState>,
    /// Books whose shelf calls always fail with a 500
    broken_books: Mutex<HashSet<BookId>>,
    /// Books whose calls always time out while the host stays reachable
    stalled_books: Mutex<HashSet<BookId>>,
    unauthorized: AtomicBool,
    offline: AtomicBool,
}

impl FakeRemote {
    fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn check(&self, call: String, book_id: BookId) -> Result<()> {
        self.state.lock().unwrap().calls.push(call);
        if self.offline.load(Ordering::SeqCst) {
            return Err(BridgeError::Connectivity("connection refused".into()));
        }
        if self.unauthorized.load(Ordering::SeqCst) {
            return Err(BridgeError::from_status(401, "token expired"));
        }
        if self.stalled_books.lock().unwrap().contains(&book_id) {
            return Err(BridgeError::Timeout(Duration::from_secs(30)));
        }
        if self.broken_books.lock().unwrap().contains(&book_id) {
            return Err(BridgeError::from_status(500, "internal error"));
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
        Err(BridgeError::from_status(404, format!("chapter {}", chapter_id)))
    }

    async fn upsert_reading_record(&self, record: &ReadingRecordUpsert) -> Result<()> {
        self.check(format!("upsert:{}:{}", record.book_id, record.chapter_id), record.book_id)?;
        self.state.lock().unwrap().records.insert(
            (record.book_id, record.chapter_id),
            (record.progress_percentage, record.reading_position),
        );
        Ok(())
    }

    async fn add_to_shelf(&self, book_id: BookId) -> Result<()> {
        self.check(format!("shelf-add:{}", book_id), book_id)?;
        if !self.state.lock().unwrap().shelf.insert(book_id) {
            return Err(BridgeError::from_status(409, "already on shelf"));
        }
        Ok(())
    }

    async fn remove_from_shelf(&self, book_id: BookId) -> Result<()> {
        self.check(format!("shelf-remove:{}", book_id), book_id)?;
        if !self.state.lock().unwrap().shelf.remove(&book_id) {
            return Err(BridgeError::from_status(404, "not on shelf"));
        }
        Ok(())
    }

    async fn set_favorite(&self, book_id: BookId, favorite: bool) -> Result<()> {
        self.check(format!("favorite:{}:{}", book_id, favorite), book_id)?;
        self.state.lock().unwrap().favorites.insert(book_id, favorite);
        Ok(())
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

struct Harness {
    remote: Arc<FakeRemote>,
    probe: Arc<SwitchProbe>,
    store: Arc<dyn LocalStore>,
    monitor: Arc<NetworkMonitor>,
    bus: EventBus,
    sync: Arc<SyncManager>,
}

fn harness() -> Harness {
    harness_with(EngineConfig::default())
}

fn harness_with(config: EngineConfig) -> Harness {
    let config = config.with_probe_debounce_ms(0);
    let remote = Arc::new(FakeRemote::default());
    let probe = Arc::new(SwitchProbe(AtomicBool::new(true)));
    let store: Arc<dyn LocalStore> = Arc::new(MemoryLocalStore::new());
    let bus = EventBus::new(512);
    let monitor = Arc::new(NetworkMonitor::new(probe.clone(), bus.clone(), &config));
    let sync = Arc::new(SyncManager::new(
        store.clone(),
        remote.clone(),
        Arc::new(ManualClock::default()),
        monitor.clone(),
        bus.clone(),
        config,
    ));
    Harness {
        remote,
        probe,
        store,
        monitor,
        bus,
        sync,
    }
}

impl Harness {
    async fn go_offline(&self) {
        self.probe.0.store(false, Ordering::SeqCst);
        self.remote.offline.store(true, Ordering::SeqCst);
        self.monitor.handle_signal(NetworkInfo::disconnected()).await;
        assert_eq!(self.monitor.state(), NetworkState::Offline);
    }

    async fn go_online(&self) {
        self.probe.0.store(true, Ordering::SeqCst);
        self.remote.offline.store(false, Ordering::SeqCst);
        self.monitor.handle_signal(NetworkInfo::connected()).await;
        assert!(self.monitor.is_online());
    }
}

#[tokio::test]
async fn failing_operation_is_dead_lettered_without_reordering_others() {
    let h = harness();
    h.remote.broken_books.lock().unwrap().insert(2);
    let mut events = h.bus.subscribe();

    for book_id in 1..=3 {
        h.sync
            .enqueue(OperationPayload::ShelfAdd { book_id })
            .await
            .unwrap();
    }
    h.sync
        .enqueue(OperationPayload::FavoriteSet { book_id: 4, favorite: true })
        .await
        .unwrap();

    let first = h.sync.process_queue().await.unwrap();
    assert_eq!((first.succeeded, first.failed, first.dead_lettered), (3, 1, 0));
    assert_eq!(
        h.remote.calls(),
        vec!["shelf-add:1", "shelf-add:2", "shelf-add:3", "favorite:4:true"]
    );

    let pending = h.sync.pending_operations().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].retry_count, 1);
    assert!(pending[0].last_error.as_deref().unwrap().contains("500"));

    h.sync.process_queue().await.unwrap();
    let last = h.sync.process_queue().await.unwrap();
    assert_eq!(last.dead_lettered, 1);
    assert_eq!(h.sync.pending_count().await.unwrap(), 0);

    let dead = h.sync.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].operation.payload, OperationPayload::ShelfAdd { book_id: 2 });
    assert_eq!(dead[0].operation.retry_count, 3);

    // Never retried again automatically.
    h.sync.process_queue().await.unwrap();
    let attempts = h
        .remote
        .calls()
        .iter()
        .filter(|call| *call == "shelf-add:2")
        .count();
    assert_eq!(attempts, 3);

    let mut saw_dead_letter = false;
    while let Ok(event) = events.try_recv() {
        if let CoreEvent::Sync(SyncEvent::DeadLettered { kind, retry_count, .. }) = event {
            assert_eq!(kind, "shelf-add");
            assert_eq!(retry_count, 3);
            saw_dead_letter = true;
        }
    }
    assert!(saw_dead_letter);
}

#[tokio::test]
async fn timeout_with_reachable_remote_counts_as_retry() {
    let h = harness();
    h.remote.stalled_books.lock().unwrap().insert(777);
    for book_id in [1, 777, 3] {
        h.sync
            .enqueue(OperationPayload::ShelfAdd { book_id })
            .await
            .unwrap();
    }

    let first = h.sync.process_queue().await.unwrap();
    assert_eq!((first.succeeded, first.failed, first.dead_lettered), (2, 1, 0));
    assert_eq!(
        h.remote.calls(),
        vec!["shelf-add:1", "shelf-add:777", "shelf-add:3"]
    );
    assert!(h.monitor.is_online());

    let pending = h.sync.pending_operations().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].retry_count, 1);

    h.sync.process_queue().await.unwrap();
    let last = h.sync.process_queue().await.unwrap();
    assert_eq!(last.dead_lettered, 1);
    assert_eq!(h.sync.pending_count().await.unwrap(), 0);

    let dead = h.sync.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].operation.payload, OperationPayload::ShelfAdd { book_id: 777 });
    assert!(dead[0].error.contains("timed out"));
    assert!(h.monitor.is_online());
}

#[tokio::test]
async fn dead_letter_log_keeps_only_the_most_recent() {
    let h = harness_with(EngineConfig::default().with_max_retries(1));
    let total = DEAD_LETTER_CAPACITY as i64 + 2;
    for book_id in 1..=total {
        h.remote.broken_books.lock().unwrap().insert(book_id);
        h.sync
            .enqueue(OperationPayload::ShelfAdd { book_id })
            .await
            .unwrap();
    }

    let report = h.sync.process_queue().await.unwrap();
    assert_eq!(report.dead_lettered, total as u64);

    let dead = h.sync.dead_letters();
    assert_eq!(dead.len(), DEAD_LETTER_CAPACITY);
    assert_eq!(dead[0].operation.payload, OperationPayload::ShelfAdd { book_id: 3 });
    assert_eq!(
        dead[DEAD_LETTER_CAPACITY - 1].operation.payload,
        OperationPayload::ShelfAdd { book_id: total }
    );
}

#[tokio::test]
async fn replaying_operations_twice_converges() {
    let once = harness();
    let twice = harness();
    let ops = [
        OperationPayload::ShelfAdd { book_id: 7 },
        OperationPayload::ProgressSave {
            user_id: 1,
            book_id: 7,
            chapter_id: 2,
            progress_percentage: 40.0,
            reading_position: 900.0,
        },
        OperationPayload::FavoriteSet { book_id: 7, favorite: true },
        OperationPayload::ShelfRemove { book_id: 9 },
    ];

    for op in &ops {
        once.sync.enqueue(op.clone()).await.unwrap();
    }
    once.sync.process_queue().await.unwrap();

    for op in ops.iter().chain(ops.iter()) {
        twice.sync.enqueue(op.clone()).await.unwrap();
    }
    let report = twice.sync.process_queue().await.unwrap();
    assert_eq!(report.succeeded, 8);
    assert_eq!(report.failed, 0);

    let a = once.remote.state.lock().unwrap();
    let b = twice.remote.state.lock().unwrap();
    assert_eq!(a.shelf, b.shelf);
    assert_eq!(a.favorites, b.favorites);
    assert_eq!(a.records, b.records);
}

#[tokio::test]
async fn offline_progress_syncs_once_network_returns() {
    let h = harness();
    h.go_offline().await;

    let saved = h
        .sync
        .save_reading_progress(ReadingProgress::new(1, 42, 3, 55.0, 1_200.0, 1_704_067_200_000))
        .await
        .unwrap();
    assert!(!saved.synced);
    assert!(h.remote.calls().is_empty());

    let stored = h.sync.reading_progress(1, 42, 3).await.unwrap().unwrap();
    assert_eq!(stored.progress_percentage, 55.0);
    assert!(!stored.synced);
    assert!(matches!(h.sync.process_queue().await, Err(SyncError::Offline)));

    h.go_online().await;
    let report = h.sync.process_queue().await.unwrap();
    assert_eq!(report.progress_synced, 1);
    assert_eq!(h.remote.calls(), vec!["upsert:42:3"]);
    assert!(h.sync.reading_progress(1, 42, 3).await.unwrap().unwrap().synced);

    let again = h.sync.process_queue().await.unwrap();
    assert_eq!(again.progress_synced, 0);
    assert_eq!(h.remote.calls().len(), 1);
}

#[tokio::test]
async fn online_progress_save_is_acknowledged_immediately() {
    let h = harness();
    let saved = h
        .sync
        .save_reading_progress(ReadingProgress::new(1, 42, 4, 10.0, 80.0, 1_704_067_200_000))
        .await
        .unwrap();
    assert!(saved.synced);
    assert!(h.store.unsynced_progress().await.unwrap().is_empty());
}

#[tokio::test]
async fn unauthorized_aborts_without_counting_a_retry() {
    let h = harness();
    h.sync
        .enqueue(OperationPayload::ShelfAdd { book_id: 1 })
        .await
        .unwrap();
    h.sync
        .enqueue(OperationPayload::ShelfAdd { book_id: 2 })
        .await
        .unwrap();
    h.remote.unauthorized.store(true, Ordering::SeqCst);

    let err = h.sync.process_queue().await.unwrap_err();
    assert!(err.is_unauthorized());
    assert!(!err.is_recoverable());
    assert_eq!(h.remote.calls(), vec!["shelf-add:1"]);

    let pending = h.sync.pending_operations().await.unwrap();
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|op| op.retry_count == 0));
    assert!(!h.sync.is_processing());
}

#[tokio::test]
async fn connectivity_loss_mid_pass_leaves_queue_intact() {
    let h = harness();
    h.sync
        .enqueue(OperationPayload::ShelfAdd { book_id: 1 })
        .await
        .unwrap();
    h.probe.0.store(false, Ordering::SeqCst);
    h.remote.offline.store(true, Ordering::SeqCst);

    assert!(h.sync.process_queue().await.is_err());
    assert_eq!(h.store.count(Collection::PendingOperations).await.unwrap(), 1);
    assert_eq!(h.sync.pending_operations().await.unwrap()[0].retry_count, 0);
    assert_eq!(h.monitor.state(), NetworkState::Offline);
}

#[tokio::test(start_paused = true)]
async fn reaching_online_triggers_replay() {
    let h = harness();
    h.go_offline().await;
    h.sync
        .enqueue(OperationPayload::ShelfAdd { book_id: 5 })
        .await
        .unwrap();
    let mut events = h.bus.subscribe();
    h.sync.start().unwrap();

    h.go_online().await;
    loop {
        if let CoreEvent::Sync(SyncEvent::Completed { succeeded, .. }) = events.recv().await.unwrap() {
            assert_eq!(succeeded, 1);
            break;
        }
    }
    assert_eq!(h.sync.pending_count().await.unwrap(), 0);

    h.sync.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn interval_replays_while_online_and_stops_on_shutdown() {
    let h = harness();
    h.sync.start().unwrap();
    assert!(matches!(h.sync.start(), Err(SyncError::AlreadyStarted)));

    h.sync
        .enqueue(OperationPayload::ShelfAdd { book_id: 8 })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30_500)).await;
    assert_eq!(h.remote.calls(), vec!["shelf-add:8"]);

    h.sync.shutdown().await;
    h.sync
        .enqueue(OperationPayload::ShelfAdd { book_id: 9 })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.remote.calls().len(), 1);
}
