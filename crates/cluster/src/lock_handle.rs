//! Binds a lock name and default timeout to the shared `LockFactory`,
//! matching the façade's per-name singleton (`getLock(name, timeout)`).

use std::sync::Arc;
use std::time::Duration;

use cluster_lock::{LockError, LockFactory, LockGuard};

pub struct ClusterLock {
    factory: Arc<LockFactory>,
    name: String,
    default_timeout: Duration,
}

impl ClusterLock {
    pub(crate) fn new(factory: Arc<LockFactory>, name: impl Into<String>, default_timeout: Duration) -> Self {
        Self {
            factory,
            name: name.into(),
            default_timeout,
        }
    }

    /// Attempt acquisition using the timeout this lock was obtained
    /// with via `Cluster::get_lock`.
    pub async fn try_lock(&self) -> Result<LockGuard, LockError> {
        self.factory.try_lock(&self.name, self.default_timeout).await
    }

    /// Attempt acquisition with an explicit timeout for this call only.
    pub async fn try_lock_for(&self, timeout: Duration) -> Result<LockGuard, LockError> {
        self.factory.try_lock(&self.name, timeout).await
    }
}
