//! Cluster façade: thin assembly over the crates below it, and the crate's one
//! published entry point.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cluster_cache::WatchCache;
use cluster_common::{CheckId, ClusterConfig, NodeId};
use cluster_kv::KvGateway;
use cluster_lock::LockFactory;
use cluster_membership::{MembershipListener, NodeManager, NodeState};
use cluster_multimap::AsyncMultimap;
use cluster_session::SessionManager;
use dashmap::DashMap;

use crate::counter::Counter;
use crate::error::ClusterError;
use crate::lock_handle::ClusterLock;

/// The assembled cluster coordination core for one node process.
///
/// Each sub-map (`AsyncMultimap`, `ClusterLock`, `Counter`) is cached as
/// a singleton keyed by name the first time it's requested.
pub struct Cluster {
    gateway: KvGateway,
    node: Arc<NodeManager>,
    lock_factory: Arc<LockFactory>,
    multimaps: DashMap<String, Arc<AsyncMultimap>>,
    locks: DashMap<String, Arc<ClusterLock>>,
    counters: DashMap<String, Arc<Counter>>,
}

impl Cluster {
    pub fn new(
        config: ClusterConfig,
        node_id: NodeId,
        advertise_host: String,
        node_meta: HashMap<String, String>,
    ) -> Arc<Self> {
        let gateway = KvGateway::new(&config);
        let check_id = CheckId::for_node(&node_id);
        let node = NodeManager::new(gateway.clone(), config, node_id.clone(), advertise_host, node_meta);
        let lock_factory = Arc::new(LockFactory::new(gateway.clone(), node_id, check_id));

        Arc::new(Self {
            gateway,
            node,
            lock_factory,
            multimaps: DashMap::new(),
            locks: DashMap::new(),
            counters: DashMap::new(),
        })
    }

    pub fn node_id(&self) -> &NodeId {
        self.node.node_id()
    }

    pub fn state(&self) -> NodeState {
        self.node.state()
    }

    pub async fn join(&self) -> Result<(), ClusterError> {
        self.node.join().await.map_err(ClusterError::from)
    }

    pub async fn leave(&self) {
        self.node.leave().await
    }

    pub fn members(&self) -> HashSet<NodeId> {
        self.node.members()
    }

    pub async fn set_listener(&self, listener: Arc<dyn MembershipListener>) {
        self.node.subscribe(listener).await
    }

    /// The node's local mirror of `__vertx.haInfo`, kept current by a
    /// background watch once the node has joined.
    pub fn ha_info(&self) -> &Arc<WatchCache<Bytes>> {
        self.node.ha_info()
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        self.node.session()
    }

    pub fn get_async_multimap(&self, name: &str) -> Arc<AsyncMultimap> {
        self.multimaps
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(AsyncMultimap::new(
                    self.gateway.clone(),
                    Arc::clone(self.node.session()),
                    name.to_string(),
                    self.node.node_id().clone(),
                ))
            })
            .clone()
    }

    pub fn get_lock(&self, name: &str, timeout: Duration) -> Arc<ClusterLock> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ClusterLock::new(Arc::clone(&self.lock_factory), name.to_string(), timeout)))
            .clone()
    }

    pub fn get_counter(&self, name: &str) -> Arc<Counter> {
        self.counters
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Counter::new(self.gateway.clone(), name)))
            .clone()
    }
}
