//! A distributed counter: one of the façade's cluster-wide primitives,
//! implemented as a trivial CAS loop on one key under
//! `__vertx.counters/<name>`.

use bytes::Bytes;
use cluster_common::TransportError;
use cluster_kv::{KvGateway, PutOptions};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum CounterError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("counter value at {key} was not valid UTF-8/u64: {value:?}")]
    Corrupt { key: String, value: Vec<u8> },
}

/// A named counter backed by one KV key. `increment_and_get` retries
/// its CAS loop indefinitely on contention — callers that need a
/// bound should wrap the call in a timeout.
pub struct Counter {
    gateway: KvGateway,
    key: String,
}

impl Counter {
    pub(crate) fn new(gateway: KvGateway, name: &str) -> Self {
        Self {
            gateway,
            key: format!("__vertx.counters/{}", name),
        }
    }

    pub async fn get(&self) -> Result<u64, CounterError> {
        match self.gateway.get_with_index(&self.key).await? {
            Some((bytes, _)) => parse(&self.key, &bytes),
            None => Ok(0),
        }
    }

    pub async fn increment_and_get(&self) -> Result<u64, CounterError> {
        self.add_and_get(1).await
    }

    pub async fn add_and_get(&self, delta: i64) -> Result<u64, CounterError> {
        loop {
            let (current, index) = match self.gateway.get_with_index(&self.key).await? {
                Some((bytes, index)) => (parse(&self.key, &bytes)?, index),
                None => (0, 0),
            };
            let next = (current as i64 + delta).max(0) as u64;
            let applied = self
                .gateway
                .put(&self.key, Bytes::from(next.to_string()), PutOptions::cas(index))
                .await?;
            if applied {
                return Ok(next);
            }
            tracing::debug!(key = %self.key, "counter CAS lost, retrying");
        }
    }
}

fn parse(key: &str, bytes: &[u8]) -> Result<u64, CounterError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .ok_or_else(|| CounterError::Corrupt {
            key: key.to_string(),
            value: bytes.to_vec(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_common::ClusterConfig;

    #[test]
    fn parse_rejects_garbage() {
        let err = parse("k", b"not-a-number").unwrap_err();
        matches!(err, CounterError::Corrupt { .. });
    }

    #[test]
    fn counter_keys_are_namespaced() {
        let config = ClusterConfig::default();
        let gateway = KvGateway::new(&config);
        let counter = Counter::new(gateway, "page-views");
        assert_eq!(counter.key, "__vertx.counters/page-views");
    }
}
