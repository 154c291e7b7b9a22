//! Async multimap: a per-address multiset of event-bus subscribers,
//! each tied to the subscribing node's session.

mod choosable;
mod subscriber;

pub use choosable::ChoosableSet;
pub use subscriber::Subscriber;

use std::sync::Arc;

use cluster_common::{NodeId, TransportError};
use cluster_kv::{KvGateway, PutOptions};
use cluster_session::SessionManager;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum MultimapError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("no active session to add under")]
    NoSession,

    #[error("write rejected by the store (contention or invalidated session)")]
    WriteRejected,
}

/// `<mapName>/<address>/<nodeId>` registry, layered directly on the KV
/// gateway — entries are not cached locally, every `get` is a fresh
/// list read straight from the store, not a mirror.
pub struct AsyncMultimap {
    gateway: KvGateway,
    session: Arc<SessionManager>,
    map_name: String,
    self_node_id: NodeId,
}

impl AsyncMultimap {
    pub fn new(
        gateway: KvGateway,
        session: Arc<SessionManager>,
        map_name: impl Into<String>,
        self_node_id: NodeId,
    ) -> Self {
        Self {
            gateway,
            session,
            map_name: map_name.into(),
            self_node_id,
        }
    }

    fn key_for(&self, address: &str, node_id: &NodeId) -> String {
        format!("{}/{}/{}", self.map_name, address, node_id.as_str())
    }

    fn address_prefix(&self, address: &str) -> String {
        format!("{}/{}/", self.map_name, address)
    }

    /// Add (or overwrite, per I3) this node's subscription for
    /// `address`, bound to the node's current session.
    pub async fn add(&self, address: &str, sub: Subscriber) -> Result<(), MultimapError> {
        let session_id = self
            .session
            .current_session_id()
            .ok_or(MultimapError::NoSession)?;
        let key = self.key_for(address, &self.self_node_id);
        let applied = self
            .gateway
            .put(&key, sub.encode(), PutOptions::acquire(session_id))
            .await?;
        if !applied {
            return Err(MultimapError::WriteRejected);
        }
        Ok(())
    }

    /// List the subscribers for `address`, returning them in a
    /// round-robin-choosable container. Missing/undecodable entries are
    /// skipped silently.
    pub async fn get(&self, address: &str) -> Result<ChoosableSet<Subscriber>, MultimapError> {
        let entries = self.gateway.list(&self.address_prefix(address)).await?;
        let subs = entries
            .into_iter()
            .filter_map(|(key, bytes)| match Subscriber::decode(&key, &bytes) {
                Ok(sub) => Some(sub),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "multimap entry failed to decode, skipping");
                    None
                }
            })
            .collect();
        Ok(ChoosableSet::new(subs))
    }

    /// Remove the one entry that decodes equal to `sub` *and* whose
    /// owner matches `sub`'s embedded node id. Returns whether a key
    /// was actually deleted.
    pub async fn remove(&self, address: &str, sub: &Subscriber) -> Result<bool, MultimapError> {
        let entries = self.gateway.list(&self.address_prefix(address)).await?;
        for (key, bytes) in entries {
            if let Ok(decoded) = Subscriber::decode(&key, &bytes) {
                if &decoded == sub && decoded.node_id == sub.node_id {
                    self.gateway.delete(&key).await?;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Delete every entry across the whole multimap whose decoded value
    /// satisfies `pred`. Not atomic across keys: the deletes fan out
    /// concurrently and the call fails if any of them does.
    pub async fn remove_all_matching<F>(&self, pred: F) -> Result<usize, MultimapError>
    where
        F: Fn(&Subscriber) -> bool,
    {
        let entries = self.gateway.list(&format!("{}/", self.map_name)).await?;
        let to_delete: Vec<String> = entries
            .into_iter()
            .filter_map(|(key, bytes)| {
                Subscriber::decode(&key, &bytes)
                    .ok()
                    .filter(|sub| pred(sub))
                    .map(|_| key)
            })
            .collect();

        let results = futures::future::join_all(
            to_delete.iter().map(|key| self.gateway.delete(key)),
        )
        .await;

        let mut deleted = 0;
        for result in results {
            result?;
            deleted += 1;
        }
        Ok(deleted)
    }

    /// Sugar for `remove_all_matching(|s| s == &value)`.
    pub async fn remove_all_for_value(&self, value: &Subscriber) -> Result<usize, MultimapError> {
        self.remove_all_matching(|sub| sub == value).await
    }
}
