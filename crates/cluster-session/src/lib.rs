//! Per-node session lifecycle.
//!
//! Creates and destroys the KV session this node's ephemeral keys are
//! acquired under, bound to the node's liveness check. Caches exactly
//! one current session id; [`SessionManager::current_session_id`] is a
//! plain synchronous read, never a suspension point.

use cluster_common::{CheckId, NodeId, SessionId, TransportError};
use cluster_kv::{KvGateway, SessionBehavior};
use parking_lot::RwLock;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("no active session to destroy")]
    NoActiveSession,
}

pub struct SessionManager {
    gateway: KvGateway,
    node_id: NodeId,
    current: RwLock<Option<SessionId>>,
}

impl SessionManager {
    pub fn new(gateway: KvGateway, node_id: NodeId) -> Self {
        Self {
            gateway,
            node_id,
            current: RwLock::new(None),
        }
    }

    /// Create a session named `"session:" + node_id`, `behavior =
    /// Delete`, bound to `check_id` and the agent's own `serfHealth`
    /// check.
    pub async fn register_session(&self, check_id: CheckId) -> Result<SessionId, SessionError> {
        let name = format!("session:{}", self.node_id.as_str());
        let checks = vec![check_id, CheckId::serf_health()];

        let session_id = self
            .gateway
            .create_session(name, checks, SessionBehavior::Delete)
            .await?;

        tracing::info!(node_id = %self.node_id, session_id = %session_id, "session created");
        *self.current.write() = Some(session_id.clone());
        Ok(session_id)
    }

    /// Destroy the current session unconditionally. Idempotent: calling
    /// this with no active session (or after the agent already
    /// forgot it) is a success, not an error.
    pub async fn destroy_session(&self) -> Result<(), SessionError> {
        let session_id = self.current.write().take();
        match session_id {
            Some(id) => {
                self.gateway.destroy_session(&id).await?;
                tracing::info!(node_id = %self.node_id, session_id = %id, "session destroyed");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// The current session id. Never empty after a successful
    /// `register_session`, until `destroy_session` runs.
    pub fn current_session_id(&self) -> Option<SessionId> {
        self.current.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_common::ClusterConfig;

    #[test]
    fn fresh_manager_has_no_session() {
        let gateway = KvGateway::new(&ClusterConfig::default());
        let mgr = SessionManager::new(gateway, NodeId::new("node-a"));
        assert!(mgr.current_session_id().is_none());
    }
}
