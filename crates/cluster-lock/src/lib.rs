//! Lock: a name-to-key exclusive lock using session-acquire
//! semantics with a timeout.
//!
//! Each `try_lock` mints a fresh session bound to the node's health
//! check, so node death automatically releases the lock — the same
//! ephemerality mechanism as the multimap, applied to one sentinel key
//! per lock name.

mod backoff;

use std::time::Duration;

use bytes::Bytes;
use cluster_common::{CheckId, NodeId, SessionId, TransportError};
use cluster_kv::{KvGateway, PutOptions, SessionBehavior};
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum LockError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("lock acquisition timed out")]
    Timeout,
}

/// Factory for locks scoped by name, sharing one gateway and the
/// node's health check id.
pub struct LockFactory {
    gateway: KvGateway,
    node_id: NodeId,
    check_id: CheckId,
}

impl LockFactory {
    pub fn new(gateway: KvGateway, node_id: NodeId, check_id: CheckId) -> Self {
        Self {
            gateway,
            node_id,
            check_id,
        }
    }

    /// Attempt to acquire the lock named `name` within `timeout`.
    /// Retries with capped-jitter backoff on contention; on timeout the
    /// attempt's session is destroyed and the lock is not held.
    pub async fn try_lock(&self, name: &str, timeout: Duration) -> Result<LockGuard, LockError> {
        let session_name = format!("lock:{}:{}", name, self.node_id.as_str());
        let session_id = self
            .gateway
            .create_session(
                session_name,
                vec![self.check_id.clone(), CheckId::serf_health()],
                SessionBehavior::Delete,
            )
            .await?;

        let key = format!("__vertx.locks/{}", name);
        let deadline = tokio::time::Instant::now() + timeout;
        let mut attempt: u32 = 0;

        loop {
            let applied = self
                .gateway
                .put(&key, Bytes::from_static(b"held"), PutOptions::acquire(session_id.clone()))
                .await?;

            if applied {
                tracing::info!(lock = %name, session_id = %session_id, "lock acquired");
                return Ok(LockGuard {
                    gateway: self.gateway.clone(),
                    session_id: Mutex::new(Some(session_id)),
                });
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                let destroy_result = self.gateway.destroy_session(&session_id).await;
                if let Err(e) = destroy_result {
                    tracing::warn!(lock = %name, error = %e, "failed to destroy session on lock timeout");
                }
                return Err(LockError::Timeout);
            }

            let remaining = deadline - now;
            let wait = backoff::delay_for_attempt(attempt).min(remaining);
            attempt += 1;
            tokio::time::sleep(wait).await;
        }
    }
}

/// A held lock. `release()` is idempotent: calling it again once the
/// session is already gone is a no-op.
pub struct LockGuard {
    gateway: KvGateway,
    session_id: Mutex<Option<SessionId>>,
}

impl LockGuard {
    pub async fn release(&self) -> Result<(), LockError> {
        let held = self.session_id.lock().take();
        match held {
            Some(id) => {
                self.gateway.destroy_session(&id).await?;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::backoff::delay_for_attempt;
    use std::time::Duration;

    #[test]
    fn backoff_never_zero_jitter_exceeds_cap() {
        for attempt in 0..10 {
            assert!(delay_for_attempt(attempt) <= Duration::from_secs(1));
        }
    }
}
