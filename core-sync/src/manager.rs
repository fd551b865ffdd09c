//! # Sync Manager
//!
//! Owns the write-behind queue and reading-progress reconciliation.
//!
//! ## Workflow
//!
//! 1. Mutations made while the remote is unreachable are
//!    [`enqueue`](SyncManager::enqueue)d and persisted.
//! 2. A replay pass walks the queue oldest first. Successes are removed.
//!    Failures bump `retry_count`; once it reaches `max_retries` the
//!    operation is dropped into the dead-letter log.
//! 3. The pass then upserts every `ReadingProgress` with `synced == false`
//!    and flips the flag once the remote acknowledges it.
//!
//! A 401 aborts the pass immediately without touching retry counts. A
//! connectivity failure makes the network monitor re-probe. If the probe
//! fails the pass aborts and the queue is left for the next one; if the
//! remote is still reachable the failure is an ordinary retry.
//!
//! Passes are triggered by the monitor reaching ONLINE, a periodic timer
//! while online, the app returning to the foreground, and a bounded flush
//! before the process exits.

use bridge_traits::background::{LifecycleChangeStream, LifecycleObserver, LifecycleState};
use bridge_traits::error::BridgeError;
use bridge_traits::{BookId, ChapterId, Clock, RemoteApi, UserId};
use core_library::{
    LocalStore, LocalStoreExt, OperationPayload, PendingOperation, ReadingProgress,
};
use core_network::{NetworkMonitor, NetworkState};
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use core_runtime::EngineConfig;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::operation;
use crate::queue::OperationQueue;

/// Default bound for [`SyncManager::flush_before_exit`].
pub const DEFAULT_EXIT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Dead letters kept for diagnostics; older ones are discarded.
pub const DEAD_LETTER_CAPACITY: usize = 128;

/// Outcome of one replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub run_id: String,
    pub processed: u64,
    pub succeeded: u64,
    /// Failed and left in the queue for another attempt
    pub failed: u64,
    pub dead_lettered: u64,
    /// Reading-progress records acknowledged after the queue
    pub progress_synced: u64,
    pub duration_ms: u64,
}

/// An operation dropped after exhausting its retries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub operation: PendingOperation,
    pub error: String,
    pub dropped_at: i64,
}

enum Step {
    Stop,
    Network(NetworkState),
    NetworkClosed,
    Interval,
    Lifecycle(Option<LifecycleState>),
}

/// Clears the processing flag when a pass ends, including on early return.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SyncManager {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteApi>,
    clock: Arc<dyn Clock>,
    monitor: Arc<NetworkMonitor>,
    lifecycle: Option<Arc<dyn LifecycleObserver>>,
    event_bus: EventBus,
    config: EngineConfig,
    queue: OperationQueue,
    processing: AtomicBool,
    progress_lock: tokio::sync::Mutex<()>,
    dead_letters: Mutex<VecDeque<DeadLetter>>,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl SyncManager {
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteApi>,
        clock: Arc<dyn Clock>,
        monitor: Arc<NetworkMonitor>,
        event_bus: EventBus,
        config: EngineConfig,
    ) -> Self {
        let queue = OperationQueue::new(Arc::clone(&store), Arc::clone(&clock));
        Self {
            store,
            remote,
            clock,
            monitor,
            lifecycle: None,
            event_bus,
            config,
            queue,
            processing: AtomicBool::new(false),
            progress_lock: tokio::sync::Mutex::new(()),
            dead_letters: Mutex::new(VecDeque::new()),
            cancel: CancellationToken::new(),
            driver: Mutex::new(None),
        }
    }

    /// Replay on foreground and flush on termination.
    pub fn with_lifecycle(mut self, lifecycle: Arc<dyn LifecycleObserver>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    fn emit(&self, event: SyncEvent) {
        self.event_bus.emit(CoreEvent::Sync(event)).ok();
    }

    // -------------------------------------------------------------------------
    // Queue
    // -------------------------------------------------------------------------

    /// Append a mutation to the queue. Persisted before returning.
    #[instrument(skip(self, payload), fields(kind = %payload.kind()))]
    pub async fn enqueue(&self, payload: OperationPayload) -> Result<PendingOperation> {
        let operation = self.queue.enqueue(payload, self.config.max_retries).await?;
        info!(id = %operation.id, book_id = operation.payload.book_id(), "Operation queued for sync");
        Ok(operation)
    }

    pub async fn pending_count(&self) -> Result<u64> {
        self.queue.len().await
    }

    pub async fn pending_operations(&self) -> Result<Vec<PendingOperation>> {
        self.queue.pending().await
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    /// The most recent operations dropped after exhausting their retries,
    /// oldest first. At most [`DEAD_LETTER_CAPACITY`] are kept.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().iter().cloned().collect()
    }

    // -------------------------------------------------------------------------
    // Reading progress
    // -------------------------------------------------------------------------

    /// Save progress locally, then try the remote right away when online.
    ///
    /// The returned record has `synced == true` only if the remote
    /// acknowledged it. Otherwise it waits for the next replay pass.
    #[instrument(skip(self, progress), fields(book_id = progress.book_id, chapter_id = progress.chapter_id))]
    pub async fn save_reading_progress(&self, progress: ReadingProgress) -> Result<ReadingProgress> {
        let mut record = progress;
        record.synced = false;
        {
            let _guard = self.progress_lock.lock().await;
            self.store.put(&record).await?;
        }
        debug!(key = %ReadingProgress::key_for(record.user_id, record.book_id, record.chapter_id), "Progress saved locally");

        if !self.monitor.is_online() {
            return Ok(record);
        }

        match self.remote.upsert_reading_record(&record.to_upsert()).await {
            Ok(()) => {
                record.synced = self
                    .mark_progress_synced(
                        record.user_id,
                        record.book_id,
                        record.chapter_id,
                        record.progress_percentage,
                        record.reading_position,
                    )
                    .await?;
            }
            Err(e) if e.is_unauthorized() => return Err(SyncError::Unauthorized(e.to_string())),
            Err(e) => {
                debug!(error = %e, "Immediate progress upsert failed; left for replay");
            }
        }
        Ok(record)
    }

    pub async fn reading_progress(
        &self,
        user_id: UserId,
        book_id: BookId,
        chapter_id: ChapterId,
    ) -> Result<Option<ReadingProgress>> {
        Ok(self
            .store
            .get::<ReadingProgress>(&ReadingProgress::key_for(user_id, book_id, chapter_id))
            .await?)
    }

    /// Flip `synced` if the stored record still holds the acknowledged values.
    async fn mark_progress_synced(
        &self,
        user_id: UserId,
        book_id: BookId,
        chapter_id: ChapterId,
        progress_percentage: f64,
        reading_position: f64,
    ) -> Result<bool> {
        let _guard = self.progress_lock.lock().await;
        let key = ReadingProgress::key_for(user_id, book_id, chapter_id);
        let Some(mut current) = self.store.get::<ReadingProgress>(&key).await? else {
            return Ok(false);
        };
        // A newer save landed while the upsert was in flight.
        if current.progress_percentage != progress_percentage
            || current.reading_position != reading_position
        {
            return Ok(false);
        }
        if !current.synced {
            current.synced = true;
            self.store.put(&current).await?;
        }
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Replay
    // -------------------------------------------------------------------------

    /// Replay the queue, then reconcile unsynced reading progress.
    pub async fn process_queue(&self) -> Result<SyncReport> {
        self.run_pass("manual").await
    }

    #[instrument(skip(self))]
    async fn run_pass(&self, trigger: &str) -> Result<SyncReport> {
        if !self.monitor.is_online() {
            return Err(SyncError::Offline);
        }
        if self.processing.swap(true, Ordering::SeqCst) {
            return Err(SyncError::SyncInProgress);
        }
        let _guard = PassGuard(&self.processing);

        let started = Instant::now();
        let mut report = SyncReport {
            run_id: Uuid::new_v4().to_string(),
            ..Default::default()
        };
        let pending = self.queue.len().await?;
        info!(run_id = %report.run_id, pending, trigger, "Sync pass started");
        self.emit(SyncEvent::Started {
            run_id: report.run_id.clone(),
            pending,
            trigger: trigger.to_string(),
        });

        let outcome = match self.replay_queue(&mut report).await {
            Ok(()) => self.reconcile_progress(&mut report).await,
            Err(e) => Err(e),
        };
        report.duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                info!(
                    run_id = %report.run_id,
                    processed = report.processed,
                    succeeded = report.succeeded,
                    failed = report.failed,
                    dead_lettered = report.dead_lettered,
                    progress_synced = report.progress_synced,
                    duration_ms = report.duration_ms,
                    "Sync pass completed"
                );
                self.emit(SyncEvent::Completed {
                    run_id: report.run_id.clone(),
                    processed: report.processed,
                    succeeded: report.succeeded,
                    failed: report.failed,
                    dead_lettered: report.dead_lettered,
                    progress_synced: report.progress_synced,
                    duration_ms: report.duration_ms,
                });
                Ok(report)
            }
            Err(e) => {
                error!(run_id = %report.run_id, error = %e, "Sync pass aborted");
                self.emit(SyncEvent::Error {
                    run_id: Some(report.run_id.clone()),
                    message: e.to_string(),
                    recoverable: e.is_recoverable(),
                });
                Err(e)
            }
        }
    }

    /// Map a remote failure that must stop the whole pass.
    ///
    /// A connectivity-class failure only stops it when a fresh probe
    /// leaves the monitor off ONLINE. Otherwise the operation itself is at
    /// fault and takes a normal retry.
    async fn abort_reason(&self, error: &BridgeError) -> Option<SyncError> {
        if error.is_unauthorized() {
            return Some(SyncError::Unauthorized(error.to_string()));
        }
        if error.is_connectivity() {
            let state = self.monitor.reconnect().await;
            if !state.is_online() {
                return Some(SyncError::Remote(error.clone()));
            }
            debug!(error = %error, "Remote still reachable; counting as a failed attempt");
        }
        None
    }

    async fn replay_queue(&self, report: &mut SyncReport) -> Result<()> {
        for mut op in self.queue.pending().await? {
            if self.cancel.is_cancelled() {
                debug!("Sync pass interrupted by shutdown");
                break;
            }

            match operation::apply(self.remote.as_ref(), &op.payload).await {
                Ok(()) => {
                    self.queue.remove(&op.id).await?;
                    if let OperationPayload::ProgressSave {
                        user_id,
                        book_id,
                        chapter_id,
                        progress_percentage,
                        reading_position,
                    } = op.payload
                    {
                        self.mark_progress_synced(
                            user_id,
                            book_id,
                            chapter_id,
                            progress_percentage,
                            reading_position,
                        )
                        .await?;
                    }
                    report.processed += 1;
                    report.succeeded += 1;
                    debug!(id = %op.id, kind = %op.kind(), "Operation replayed");
                }
                Err(e) => {
                    if let Some(abort) = self.abort_reason(&e).await {
                        return Err(abort);
                    }
                    report.processed += 1;
                    op.retry_count += 1;
                    op.last_error = Some(e.to_string());

                    if op.is_exhausted() {
                        self.queue.remove(&op.id).await?;
                        self.dead_letter(op, e.to_string());
                        report.dead_lettered += 1;
                    } else {
                        warn!(id = %op.id, kind = %op.kind(), retry_count = op.retry_count, error = %e, "Operation failed; will retry");
                        self.queue.update(&op).await?;
                        report.failed += 1;
                    }
                }
            }
        }
        Ok(())
    }

    fn dead_letter(&self, operation: PendingOperation, message: String) {
        let exhausted = SyncError::Exhausted {
            operation_id: operation.id.clone(),
            kind: operation.kind().to_string(),
            retry_count: operation.retry_count,
            message: message.clone(),
        };
        error!(error = %exhausted, "Operation dead-lettered");
        self.emit(SyncEvent::DeadLettered {
            operation_id: operation.id.clone(),
            kind: operation.kind().to_string(),
            retry_count: operation.retry_count,
            message: message.clone(),
        });
        let mut dead_letters = self.dead_letters.lock();
        if dead_letters.len() == DEAD_LETTER_CAPACITY {
            dead_letters.pop_front();
        }
        dead_letters.push_back(DeadLetter {
            operation,
            error: message,
            dropped_at: self.clock.unix_timestamp_millis(),
        });
    }

    async fn reconcile_progress(&self, report: &mut SyncReport) -> Result<()> {
        for record in self.store.unsynced_progress().await? {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.remote.upsert_reading_record(&record.to_upsert()).await {
                Ok(()) => {
                    if self
                        .mark_progress_synced(
                            record.user_id,
                            record.book_id,
                            record.chapter_id,
                            record.progress_percentage,
                            record.reading_position,
                        )
                        .await?
                    {
                        report.progress_synced += 1;
                    }
                }
                Err(e) => {
                    if let Some(abort) = self.abort_reason(&e).await {
                        return Err(abort);
                    }
                    warn!(
                        book_id = record.book_id,
                        chapter_id = record.chapter_id,
                        error = %e,
                        "Progress upsert rejected; kept for next pass"
                    );
                }
            }
        }
        Ok(())
    }

    /// Best-effort pass before the process exits, bounded by `timeout`.
    pub async fn flush_before_exit(&self, timeout: Duration) -> Result<SyncReport> {
        match tokio::time::timeout(timeout, self.run_pass("exit")).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Exit flush timed out");
                Err(SyncError::Timeout(timeout))
            }
        }
    }

    async fn trigger(&self, trigger: &str) {
        match self.run_pass(trigger).await {
            Ok(_) => {}
            Err(SyncError::Offline) | Err(SyncError::SyncInProgress) => {
                debug!(trigger, "Sync pass skipped");
            }
            Err(e) => debug!(trigger, error = %e, "Triggered sync pass failed"),
        }
    }

    // -------------------------------------------------------------------------
    // Background driver
    // -------------------------------------------------------------------------

    /// Spawn the driver that replays on ONLINE, on the interval and on
    /// lifecycle changes.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut driver = self.driver.lock();
        if driver.is_some() {
            return Err(SyncError::AlreadyStarted);
        }
        // Subscribe before spawning so no transition after `start` is missed.
        let network = self.monitor.subscribe();
        let manager = Arc::clone(self);
        *driver = Some(tokio::spawn(async move { manager.run(network).await }));
        info!(
            interval_ms = self.config.sync_interval_ms,
            "Sync manager started"
        );
        Ok(())
    }

    async fn run(self: Arc<Self>, network: watch::Receiver<NetworkState>) {
        let mut network = Some(network);
        let mut lifecycle: Option<Box<dyn LifecycleChangeStream>> = match &self.lifecycle {
            Some(observer) => match observer.subscribe_changes().await {
                Ok(stream) => Some(stream),
                Err(e) => {
                    warn!(error = %e, "Lifecycle events unavailable");
                    None
                }
            },
            None => None,
        };

        let mut ticker = tokio::time::interval(self.config.sync_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            let step = tokio::select! {
                _ = self.cancel.cancelled() => Step::Stop,
                changed = next_state(&mut network) => match changed {
                    Some(state) => Step::Network(state),
                    None => Step::NetworkClosed,
                },
                _ = ticker.tick() => Step::Interval,
                state = next_lifecycle(&mut lifecycle) => Step::Lifecycle(state),
            };

            match step {
                Step::Stop => break,
                Step::Network(state) if state.is_online() => self.trigger("online").await,
                Step::Network(_) => {}
                Step::NetworkClosed => network = None,
                Step::Interval => {
                    if self.monitor.is_online() {
                        self.trigger("interval").await;
                    }
                }
                Step::Lifecycle(Some(LifecycleState::Foreground)) => {
                    self.trigger("foreground").await
                }
                Step::Lifecycle(Some(LifecycleState::Terminating)) => {
                    if let Err(e) = self.flush_before_exit(DEFAULT_EXIT_FLUSH_TIMEOUT).await {
                        debug!(error = %e, "Exit flush did not complete");
                    }
                }
                Step::Lifecycle(Some(LifecycleState::Background)) => {}
                Step::Lifecycle(None) => lifecycle = None,
            }
        }
        debug!("Sync driver stopped");
    }

    /// Stop the driver. A pass in progress stops after its current operation.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Sync driver ended abnormally");
            }
        }
        info!("Sync manager stopped");
    }
}

async fn next_state(network: &mut Option<watch::Receiver<NetworkState>>) -> Option<NetworkState> {
    match network {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(*rx.borrow_and_update()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

async fn next_lifecycle(
    lifecycle: &mut Option<Box<dyn LifecycleChangeStream>>,
) -> Option<LifecycleState> {
    match lifecycle {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}
