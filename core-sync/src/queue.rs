//! Persistent FIFO of pending operations.
//!
//! Operation ids are zero-padded sequence numbers, so key order in the store
//! is enqueue order regardless of the clock. The next sequence is recovered
//! from the highest stored id the first time the queue is touched.

use bridge_traits::Clock;
use core_library::{
    Collection, LocalStore, LocalStoreExt, OperationPayload, PendingOperation,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;

pub struct OperationQueue {
    store: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
    next_sequence: Mutex<Option<u64>>,
}

impl OperationQueue {
    pub fn new(store: Arc<dyn LocalStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            next_sequence: Mutex::new(None),
        }
    }

    /// Append an operation. It is persisted before this returns.
    pub async fn enqueue(&self, payload: OperationPayload, max_retries: u32) -> Result<PendingOperation> {
        let mut next = self.next_sequence.lock().await;
        let sequence = match *next {
            Some(sequence) => sequence,
            None => self.recover_sequence().await?,
        };

        let operation = PendingOperation::new(
            sequence,
            payload,
            self.clock.unix_timestamp_millis(),
            max_retries,
        );
        self.store.put(&operation).await?;
        *next = Some(sequence + 1);

        debug!(id = %operation.id, kind = %operation.kind(), "Operation enqueued");
        Ok(operation)
    }

    async fn recover_sequence(&self) -> Result<u64> {
        let existing: Vec<PendingOperation> = self.store.get_all().await?;
        let highest = existing.iter().filter_map(PendingOperation::sequence).max();
        Ok(highest.map_or(1, |sequence| sequence + 1))
    }

    /// Every queued operation, oldest first.
    pub async fn pending(&self) -> Result<Vec<PendingOperation>> {
        Ok(self.store.get_all().await?)
    }

    /// Persist a changed retry count or last error.
    pub async fn update(&self, operation: &PendingOperation) -> Result<()> {
        Ok(self.store.put(operation).await?)
    }

    pub async fn remove(&self, id: &str) -> Result<bool> {
        Ok(self.store.delete(Collection::PendingOperations, id).await?)
    }

    pub async fn len(&self) -> Result<u64> {
        Ok(self.store.count(Collection::PendingOperations).await?)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
