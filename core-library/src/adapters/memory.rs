//! In-memory store used by tests and hosts without durable storage.
//!
//! Keeps the same ordering guarantees as the SQLite engine and can enforce a
//! byte quota, which makes `StorageFull` handling testable.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;

use crate::error::{Result, StoreError};
use crate::models::{Collection, IndexQuery, IndexValue};
use crate::store::{resolve_index, LocalStore, RawRecord};

#[derive(Debug, Default)]
struct CollectionData {
    records: BTreeMap<String, StoredRecord>,
    index: BTreeSet<(&'static str, IndexValue, String)>,
}

#[derive(Debug)]
struct StoredRecord {
    body: String,
    indexes: Vec<(&'static str, IndexValue)>,
    size: u64,
}

#[derive(Debug, Default)]
struct State {
    collections: HashMap<Collection, CollectionData>,
    used_bytes: u64,
}

impl State {
    fn remove(&mut self, collection: Collection, key: &str) -> bool {
        let Some(data) = self.collections.get_mut(&collection) else {
            return false;
        };
        match data.records.remove(key) {
            Some(old) => {
                for (name, value) in old.indexes {
                    data.index.remove(&(name, value, key.to_string()));
                }
                self.used_bytes = self.used_bytes.saturating_sub(old.size);
                true
            }
            None => false,
        }
    }
}

/// [`LocalStore`] backed by ordered maps.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    state: RwLock<State>,
    quota_bytes: Option<u64>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes once stored bytes would exceed `quota_bytes`.
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            state: RwLock::default(),
            quota_bytes: Some(quota_bytes),
        }
    }

    pub async fn used_bytes(&self) -> u64 {
        self.state.read().await.used_bytes
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn open(&self) -> Result<()> {
        Ok(())
    }

    async fn put_raw(&self, collection: Collection, record: RawRecord) -> Result<()> {
        let size = record.size_bytes();
        let mut indexes = Vec::with_capacity(record.indexes.len());
        for (name, value) in record.indexes {
            indexes.push((resolve_index(collection, name)?, value));
        }

        let mut state = self.state.write().await;
        let previous = state
            .collections
            .get(&collection)
            .and_then(|data| data.records.get(&record.key))
            .map(|old| old.size)
            .unwrap_or(0);

        if let Some(quota) = self.quota_bytes {
            if state.used_bytes - previous + size > quota {
                return Err(StoreError::StorageFull {
                    collection: collection.to_string(),
                });
            }
        }

        state.remove(collection, &record.key);
        state.used_bytes += size;

        let data = state.collections.entry(collection).or_default();
        for (name, value) in &indexes {
            data.index.insert((*name, value.clone(), record.key.clone()));
        }
        data.records.insert(
            record.key,
            StoredRecord {
                body: record.body,
                indexes,
                size,
            },
        );
        Ok(())
    }

    async fn get_raw(&self, collection: Collection, key: &str) -> Result<Option<String>> {
        let state = self.state.read().await;
        Ok(state
            .collections
            .get(&collection)
            .and_then(|data| data.records.get(key))
            .map(|record| record.body.clone()))
    }

    async fn get_all_by_index_raw(
        &self,
        collection: Collection,
        index: &str,
        query: &IndexQuery,
    ) -> Result<Vec<String>> {
        let index = resolve_index(collection, index)?;
        let state = self.state.read().await;
        let Some(data) = state.collections.get(&collection) else {
            return Ok(Vec::new());
        };

        let lower = match query {
            IndexQuery::Eq(value) => (index, value.clone(), String::new()),
            IndexQuery::All => (index, IndexValue::Int(i64::MIN), String::new()),
        };

        let bodies = data
            .index
            .range(lower..)
            .take_while(|(name, value, _)| {
                *name == index
                    && match query {
                        IndexQuery::Eq(wanted) => value == wanted,
                        IndexQuery::All => true,
                    }
            })
            .filter_map(|(_, _, key)| data.records.get(key))
            .map(|record| record.body.clone())
            .collect();
        Ok(bodies)
    }

    async fn get_all_raw(&self, collection: Collection) -> Result<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .collections
            .get(&collection)
            .map(|data| data.records.values().map(|r| r.body.clone()).collect())
            .unwrap_or_default())
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state.remove(collection, key))
    }

    async fn clear(&self, collection: Collection) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(data) = state.collections.remove(&collection) {
            let freed: u64 = data.records.values().map(|r| r.size).sum();
            state.used_bytes = state.used_bytes.saturating_sub(freed);
        }
        Ok(())
    }

    async fn count(&self, collection: Collection) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state
            .collections
            .get(&collection)
            .map(|data| data.records.len() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CacheEntry, Chapter};
    use crate::store::LocalStoreExt;

    fn entry(key: &str, timestamp: i64, payload: &str) -> CacheEntry {
        CacheEntry {
            key: CacheEntry::compose_key("api", key),
            namespace: "api".into(),
            data: serde_json::Value::String(payload.into()),
            timestamp,
            ttl_ms: 60_000,
            size: payload.len() as u64,
        }
    }

    #[tokio::test]
    async fn test_quota_rejects_write_with_storage_full() {
        let sized = RawRecord::encode(&entry("a", 1, "xxxxxxxxxx")).unwrap();
        let store = MemoryLocalStore::with_quota(sized.size_bytes() + 10);

        store.put(&entry("a", 1, "xxxxxxxxxx")).await.unwrap();
        let err = store.put(&entry("b", 2, "yyyyyyyyyy")).await.unwrap_err();
        assert!(err.is_storage_full());

        // Replacing a record only charges the difference.
        store.put(&entry("a", 3, "zzzzzzzzzz")).await.unwrap();

        assert!(store.delete(Collection::CacheEntries, "api:a").await.unwrap());
        assert_eq!(store.used_bytes().await, 0);
        store.put(&entry("b", 2, "yyyyyyyyyy")).await.unwrap();
    }

    #[tokio::test]
    async fn test_rewrite_moves_index_entries_and_charges_record_size() {
        let store = MemoryLocalStore::new();
        let first = entry("a", 100, "xxxx");
        let expected = RawRecord::encode(&first).unwrap().size_bytes();
        store.put(&first).await.unwrap();
        assert_eq!(store.used_bytes().await, expected);

        store.put(&entry("a", 200, "xxxx")).await.unwrap();
        assert_eq!(store.count(Collection::CacheEntries).await.unwrap(), 1);

        let old: Vec<CacheEntry> = store
            .get_all_by_index("timestamp", IndexQuery::eq(100_i64))
            .await
            .unwrap();
        assert!(old.is_empty());
        let current: Vec<CacheEntry> = store
            .get_all_by_index("timestamp", IndexQuery::eq(200_i64))
            .await
            .unwrap();
        assert_eq!(current.len(), 1);
    }

    #[tokio::test]
    async fn test_timestamp_index_orders_oldest_first() {
        let store = MemoryLocalStore::new();
        store.put(&entry("new", 300, "n")).await.unwrap();
        store.put(&entry("old", 100, "o")).await.unwrap();
        store.put(&entry("mid", 200, "m")).await.unwrap();

        let entries: Vec<CacheEntry> = store
            .get_all_by_index("timestamp", IndexQuery::All)
            .await
            .unwrap();
        let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["api:old", "api:mid", "api:new"]);

        let by_namespace: Vec<CacheEntry> = store
            .get_all_by_index("namespace", IndexQuery::eq("api"))
            .await
            .unwrap();
        assert_eq!(by_namespace.len(), 3);
    }

    #[tokio::test]
    async fn test_eq_query_stops_at_value_boundary() {
        let store = MemoryLocalStore::new();
        for (id, book) in [(1, 41), (2, 42), (3, 42), (4, 43)] {
            store
                .put(&Chapter {
                    id,
                    book_id: book,
                    chapter_number: id as u32,
                    title: String::new(),
                    content: String::new(),
                    word_count: 0,
                    cached_at: 0,
                    downloaded: false,
                })
                .await
                .unwrap();
        }
        let ids: Vec<i64> = store
            .chapters_for_book(42)
            .await
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![2, 3]);

        store.clear(Collection::Chapters).await.unwrap();
        assert_eq!(store.count(Collection::Chapters).await.unwrap(), 0);
        assert_eq!(store.used_bytes().await, 0);
    }
}
