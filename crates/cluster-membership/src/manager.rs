//! Node manager: join/leave orchestration over the lower
//! components, the authoritative local membership set, and the
//! eventually-consistent HA-info mirror.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use cluster_common::{BytesCodec, ClusterConfig, NodeId};
use cluster_cache::WatchCache;
use cluster_health::HealthProbe;
use cluster_kv::{KvGateway, WatchHandle};
use cluster_session::SessionManager;
use dashmap::DashSet;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::listener::MembershipListener;
use crate::state::NodeState;
use crate::watcher::{MembershipState, MembershipWatcher};

const HA_INFO_PREFIX: &str = "__vertx.haInfo";

#[derive(Error, Debug)]
pub enum JoinError {
    #[error("a live, tagged service record already exists for this node id")]
    NodeIdReused,

    #[error("join step '{step}' failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("join did not complete within the configured timeout")]
    Timeout,

    #[error("join already attempted or completed for this node")]
    AlreadyStarted,
}

fn step<E>(name: &'static str) -> impl Fn(E) -> JoinError
where
    E: std::error::Error + Send + Sync + 'static,
{
    move |e| JoinError::Step {
        step: name,
        source: anyhow::Error::new(e),
    }
}

/// Owns this node's join/leave lifecycle, its membership view of the
/// cluster, and the HA-info mirror every other component layers on top
/// of (locks, multimap, and the counter all share this node's gateway
/// and session, but membership is the one that drives them into
/// existence).
pub struct NodeManager {
    gateway: KvGateway,
    config: ClusterConfig,
    node_id: NodeId,
    advertise_host: String,
    node_meta: HashMap<String, String>,
    session: Arc<SessionManager>,
    state: Mutex<NodeState>,
    health: Mutex<Option<HealthProbe>>,
    membership: Arc<MembershipState>,
    watch_handle: Mutex<Option<WatchHandle>>,
    ha_info: Arc<WatchCache<Bytes>>,
    ha_info_watch: Mutex<Option<WatchHandle>>,
}

impl NodeManager {
    pub fn new(
        gateway: KvGateway,
        config: ClusterConfig,
        node_id: NodeId,
        advertise_host: String,
        node_meta: HashMap<String, String>,
    ) -> Arc<Self> {
        let session = Arc::new(SessionManager::new(gateway.clone(), node_id.clone()));
        let membership = Arc::new(MembershipState {
            members: DashSet::new(),
            listeners: RwLock::new(Vec::new()),
            clustering_tag: config.clustering_tag.clone(),
            self_node_id: node_id.clone(),
        });
        let ha_info = WatchCache::<Bytes>::new(HA_INFO_PREFIX, Arc::new(BytesCodec));

        Arc::new(Self {
            gateway,
            config,
            node_id,
            advertise_host,
            node_meta,
            session,
            state: Mutex::new(NodeState::New),
            health: Mutex::new(None),
            membership,
            watch_handle: Mutex::new(None),
            ha_info,
            ha_info_watch: Mutex::new(None),
        })
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn state(&self) -> NodeState {
        *self.state.lock()
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn ha_info(&self) -> &Arc<WatchCache<Bytes>> {
        &self.ha_info
    }

    pub fn members(&self) -> std::collections::HashSet<NodeId> {
        self.membership.members.iter().map(|e| e.key().clone()).collect()
    }

    pub async fn subscribe(&self, listener: Arc<dyn MembershipListener>) {
        self.membership.listeners.write().await.push(listener);
    }

    /// Run the full join sequence, bounded by `config.join_timeout`. On
    /// any failure every step already completed is unwound best-effort,
    /// in reverse order.
    pub async fn join(&self) -> Result<(), JoinError> {
        {
            let mut state = self.state.lock();
            if !state.can_transition_to(NodeState::Joining) {
                return Err(JoinError::AlreadyStarted);
            }
            *state = NodeState::Joining;
        }

        let result = tokio::time::timeout(self.config.join_timeout, self.join_steps())
            .await
            .unwrap_or(Err(JoinError::Timeout));

        let mut state = self.state.lock();
        match &result {
            Ok(()) => *state = NodeState::Active,
            Err(_) => *state = NodeState::Failed,
        }
        result
    }

    async fn join_steps(&self) -> Result<(), JoinError> {
        let existing = self
            .gateway
            .list_services()
            .await
            .map_err(step("check_node_id_reuse"))?;
        let already_tagged = existing
            .get(self.node_id.as_str())
            .map(|tags| tags.iter().any(|t| t == &self.config.clustering_tag))
            .unwrap_or(false);
        if already_tagged {
            return Err(JoinError::NodeIdReused);
        }

        self.gateway
            .register_service(
                &self.node_id,
                vec![self.config.clustering_tag.clone()],
                self.node_meta.clone(),
            )
            .await
            .map_err(step("register_service"))?;

        let health_probe = match HealthProbe::start(
            self.gateway.clone(),
            self.node_id.clone(),
            self.advertise_host.clone(),
            self.config.tcp_probe_port_range,
            self.config.check_interval,
            self.config.deregister_after_critical,
        )
        .await
        {
            Ok(probe) => probe,
            Err(e) => {
                let _ = self.gateway.deregister_service(&self.node_id).await;
                return Err(JoinError::Step {
                    step: "start_health_probe",
                    source: anyhow::Error::new(e),
                });
            }
        };
        let check_id = health_probe.check_id().clone();
        *self.health.lock() = Some(health_probe);

        if let Err(e) = self.session.register_session(check_id).await {
            self.rollback_after_health_probe().await;
            return Err(JoinError::Step {
                step: "register_session",
                source: anyhow::Error::new(e),
            });
        }

        let seed = match self.gateway.list_services().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.rollback_after_session().await;
                return Err(JoinError::Step {
                    step: "seed_membership",
                    source: anyhow::Error::new(e),
                });
            }
        };
        for (id, tags) in seed.iter() {
            if tags.iter().any(|t| t == &self.config.clustering_tag) {
                self.membership.members.insert(NodeId::new(id.clone()));
            }
        }
        self.membership.members.insert(self.node_id.clone());

        if let Err(e) = self.preload_ha_info().await {
            self.rollback_after_session().await;
            return Err(JoinError::Step {
                step: "preload_ha_info",
                source: anyhow::Error::new(e),
            });
        }

        let watcher = Arc::new(MembershipWatcher {
            state: Arc::clone(&self.membership),
        });
        *self.watch_handle.lock() = Some(self.gateway.watch_services(watcher));
        *self.ha_info_watch.lock() = Some(self.ha_info.start_watch(&self.gateway));

        tracing::info!(node_id = %self.node_id, "node joined cluster");
        Ok(())
    }

    async fn preload_ha_info(&self) -> Result<(), cluster_common::TransportError> {
        let entries = self.gateway.list(HA_INFO_PREFIX).await?;
        for (key, bytes) in entries {
            if let Some(trailing) = key
                .strip_prefix(HA_INFO_PREFIX)
                .map(|rest| rest.trim_start_matches('/'))
                .filter(|rest| !rest.is_empty())
            {
                self.ha_info.apply_local_put(trailing.to_string(), bytes);
            }
        }
        Ok(())
    }

    async fn rollback_after_health_probe(&self) {
        let health_probe = self.health.lock().take();
        if let Some(probe) = health_probe {
            if let Err(e) = probe.stop().await {
                tracing::warn!(error = %e, "rollback: failed to stop health probe");
            }
        }
        if let Err(e) = self.gateway.deregister_service(&self.node_id).await {
            tracing::warn!(error = %e, "rollback: failed to deregister service");
        }
    }

    async fn rollback_after_session(&self) {
        if let Err(e) = self.session.destroy_session().await {
            tracing::warn!(error = %e, "rollback: failed to destroy session");
        }
        self.rollback_after_health_probe().await;
    }

    /// Best-effort ordered teardown: every step is attempted regardless
    /// of whether an earlier one failed.
    pub async fn leave(&self) {
        {
            let mut state = self.state.lock();
            if !state.can_transition_to(NodeState::Leaving) {
                return;
            }
            *state = NodeState::Leaving;
        }

        let watch_handle = self.watch_handle.lock().take();
        if let Some(handle) = watch_handle {
            handle.cancel().await;
        }
        let ha_info_watch = self.ha_info_watch.lock().take();
        if let Some(handle) = ha_info_watch {
            handle.cancel().await;
        }
        if let Err(e) = self.session.destroy_session().await {
            tracing::warn!(node_id = %self.node_id, error = %e, "leave: failed to destroy session");
        }
        let health_probe = self.health.lock().take();
        if let Some(probe) = health_probe {
            if let Err(e) = probe.stop().await {
                tracing::warn!(node_id = %self.node_id, error = %e, "leave: failed to stop health probe");
            }
        }
        if let Err(e) = self.gateway.deregister_service(&self.node_id).await {
            tracing::warn!(node_id = %self.node_id, error = %e, "leave: failed to deregister service");
        }

        self.membership.members.remove(&self.node_id);
        *self.state.lock() = NodeState::Stopped;
        tracing::info!(node_id = %self.node_id, "node left cluster");
    }
}
