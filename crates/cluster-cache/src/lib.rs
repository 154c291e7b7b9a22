//! Watch-driven cache: a generic prefix-scoped local mirror kept
//! current by a KV watch and by acknowledged local writes.
//!
//! Reads never suspend and tolerate eventual consistency; this is not a
//! source of truth, it's a read-through convenience over the KV store.

use std::sync::Arc;

use cluster_common::Decoder;
use cluster_kv::{KvGateway, KvSnapshot, WatchHandle, WatchHandler};
use dashmap::DashMap;

/// A concurrent map from the trailing key segment (the part after
/// `prefix/`) to the decoded value.
pub struct WatchCache<T> {
    prefix: String,
    decoder: Arc<dyn Decoder<T>>,
    map: DashMap<String, T>,
}

impl<T> WatchCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(prefix: impl Into<String>, decoder: Arc<dyn Decoder<T>>) -> Arc<Self> {
        Arc::new(Self {
            prefix: prefix.into(),
            decoder,
            map: DashMap::new(),
        })
    }

    /// Non-blocking read. Absence here may just mean the watch hasn't
    /// caught up yet, not that the key is gone from the store.
    pub fn get(&self, trailing_key: &str) -> Option<T> {
        self.map.get(trailing_key).map(|entry| entry.value().clone())
    }

    pub fn snapshot(&self) -> Vec<(String, T)> {
        self.map
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Read-your-writes path: call this synchronously after a local
    /// `put` succeeds, before handing the result back to the caller.
    pub fn apply_local_put(&self, trailing_key: impl Into<String>, value: T) {
        self.map.insert(trailing_key.into(), value);
    }

    /// Read-your-writes path for deletes.
    pub fn apply_local_delete(&self, trailing_key: &str) {
        self.map.remove(trailing_key);
    }

    /// Start the watch that keeps this cache current. Pass the returned
    /// handle to `cancel().await` on shutdown.
    pub fn start_watch(self: &Arc<Self>, gateway: &KvGateway) -> WatchHandle {
        gateway.watch_prefix(self.prefix.clone(), Arc::clone(self))
    }

    fn trailing_segment<'a>(&self, full_key: &'a str) -> Option<&'a str> {
        full_key
            .strip_prefix(&self.prefix)
            .map(|rest| rest.trim_start_matches('/'))
            .filter(|rest| !rest.is_empty())
    }
}

#[async_trait::async_trait]
impl<T> WatchHandler for WatchCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn on_update(&self, prev: &KvSnapshot, next: &KvSnapshot) {
        for (key, bytes) in next.iter() {
            let Some(trailing) = self.trailing_segment(key) else {
                continue;
            };
            match self.decoder.decode(key, bytes) {
                Ok(value) => {
                    self.map.insert(trailing.to_string(), value);
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "cache entry failed to decode, skipping");
                }
            }
        }

        for key in prev.keys() {
            if next.contains_key(key) {
                continue;
            }
            if let Some(trailing) = self.trailing_segment(key) {
                self.map.remove(trailing);
            }
        }
    }
}
