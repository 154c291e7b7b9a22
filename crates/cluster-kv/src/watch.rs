//! Long-lived blocking-query loops for prefix watches and the service
//! catalog watch: spawn a task that loops over `tokio::select!` between
//! cancellation and the next blocking fetch, backing off on error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::catalog::ServiceSnapshot;
use crate::gateway::KvGateway;

/// A flat, unordered snapshot of one KV prefix, full key -> value.
pub type KvSnapshot = HashMap<String, Bytes>;

const LONG_POLL_WAIT: Duration = Duration::from_secs(55);
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Delivered one `(previous, next)` snapshot pair per change, serialized
/// per prefix: at most one handler invocation is ever in flight for a
/// given watch.
#[async_trait::async_trait]
pub trait WatchHandler: Send + Sync + 'static {
    async fn on_update(&self, prev: &KvSnapshot, next: &KvSnapshot);
}

#[async_trait::async_trait]
pub trait ServicesWatchHandler: Send + Sync + 'static {
    async fn on_update(&self, prev: &ServiceSnapshot, next: &ServiceSnapshot);
}

/// Handle to a running watch loop. Dropping it does not stop the loop —
/// call [`WatchHandle::cancel`] for that, which drains any in-flight
/// handler invocation before returning.
pub struct WatchHandle {
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub async fn cancel(self) {
        self.cancel_token.cancel();
        let _ = self.task.await;
    }
}

impl KvGateway {
    /// Start a long-lived watch over `prefix`. The handler fires once
    /// per agent-reported change with the pre- and post-change
    /// snapshots; out-of-order fetches are tolerated by always diffing
    /// against the last-delivered snapshot (last write wins).
    pub fn watch_prefix<H: WatchHandler>(&self, prefix: impl Into<String>, handler: Arc<H>) -> WatchHandle {
        let prefix = prefix.into();
        let gateway = self.clone();
        let cancel_token = CancellationToken::new();
        let cancel_token_clone = cancel_token.clone();

        let task = tokio::spawn(async move {
            let mut index: u64 = 0;
            let mut prev: KvSnapshot = HashMap::new();

            loop {
                tokio::select! {
                    _ = cancel_token_clone.cancelled() => {
                        tracing::debug!(prefix = %prefix, "kv watch cancelled");
                        break;
                    }
                    result = gateway.fetch_kv_snapshot(&prefix, index, LONG_POLL_WAIT) => {
                        match result {
                            Ok((next_index, next)) => {
                                if index == 0 || next_index != index {
                                    handler.on_update(&prev, &next).await;
                                    prev = next;
                                    index = next_index.max(1);
                                }
                            }
                            Err(e) => {
                                tracing::warn!(prefix = %prefix, error = %e, "kv watch fetch failed, backing off");
                                tokio::time::sleep(ERROR_BACKOFF).await;
                            }
                        }
                    }
                }
            }
        });

        WatchHandle { cancel_token, task }
    }

    /// Start a long-lived watch over the whole service catalog. Tag
    /// filtering (membership vs. everything else) is the caller's job —
    /// this delivers the raw serviceId -> tags snapshot.
    pub fn watch_services<H: ServicesWatchHandler>(&self, handler: Arc<H>) -> WatchHandle {
        let gateway = self.clone();
        let cancel_token = CancellationToken::new();
        let cancel_token_clone = cancel_token.clone();

        let task = tokio::spawn(async move {
            let mut index: u64 = 0;
            let mut prev: ServiceSnapshot = HashMap::new();

            loop {
                tokio::select! {
                    _ = cancel_token_clone.cancelled() => {
                        tracing::debug!("service catalog watch cancelled");
                        break;
                    }
                    result = gateway.fetch_services_snapshot(index, LONG_POLL_WAIT) => {
                        match result {
                            Ok((next_index, next)) => {
                                if index == 0 || next_index != index {
                                    handler.on_update(&prev, &next).await;
                                    prev = next;
                                    index = next_index.max(1);
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "service catalog watch fetch failed, backing off");
                                tokio::time::sleep(ERROR_BACKOFF).await;
                            }
                        }
                    }
                }
            }
        });

        WatchHandle { cancel_token, task }
    }
}
