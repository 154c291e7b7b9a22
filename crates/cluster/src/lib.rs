//! Cluster coordination core over an external Consul-style KV store.
//!
//! [`Cluster`] is the one entry point applications hold: it owns this
//! node's join/leave lifecycle, its membership view of the rest of the
//! cluster, and the per-name singleton multimaps, locks, and counters
//! layered on top of the same KV gateway.
//!
//! ```no_run
//! use std::collections::HashMap;
//! use cluster::Cluster;
//! use cluster_common::{ClusterConfig, NodeId};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cluster = Cluster::new(
//!     ClusterConfig::default(),
//!     NodeId::new("node-1"),
//!     "10.0.0.1".to_string(),
//!     HashMap::new(),
//! );
//! cluster.join().await?;
//! let members = cluster.members();
//! cluster.leave().await;
//! # Ok(())
//! # }
//! ```

mod counter;
mod error;
mod facade;
mod lock_handle;

pub use counter::{Counter, CounterError};
pub use error::ClusterError;
pub use facade::Cluster;
pub use lock_handle::ClusterLock;

pub use cluster_common::{ClusterConfig, KvEndpoint, NodeId, PortRange};
pub use cluster_membership::{JoinError, MembershipListener, NodeState};
pub use cluster_multimap::{ChoosableSet, Subscriber};
