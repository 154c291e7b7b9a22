//! Membership change notifications, delivered off the watch-dispatch
//! context: listener callbacks must never run on the context that
//! drives the watch loop.

use cluster_common::NodeId;

#[async_trait::async_trait]
pub trait MembershipListener: Send + Sync + 'static {
    async fn node_added(&self, node_id: &NodeId);
    async fn node_left(&self, node_id: &NodeId);
}
