//! Cluster configuration record.
//!
//! No CLI or environment variable parsing lives here — the embedding
//! application constructs and owns a `ClusterConfig`; that boundary is
//! not relaxed by adding an ambient stack elsewhere in this workspace.

use std::time::Duration;

/// Location of the KV agent this node talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEndpoint {
    pub host: String,
    pub port: u16,
}

impl Default for KvEndpoint {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8500,
        }
    }
}

impl KvEndpoint {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Inclusive port range the health probe opportunistically binds within.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub lo: u16,
    pub hi: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self { lo: 2000, hi: 64000 }
    }
}

/// Full configuration for a cluster node.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub kv_endpoint: KvEndpoint,
    pub tcp_probe_port_range: PortRange,
    pub check_interval: Duration,
    pub deregister_after_critical: Duration,
    pub join_timeout: Duration,
    pub lock_default_timeout: Duration,
    pub clustering_tag: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            kv_endpoint: KvEndpoint::default(),
            tcp_probe_port_range: PortRange::default(),
            check_interval: Duration::from_secs(10),
            deregister_after_critical: Duration::from_secs(60),
            join_timeout: Duration::from_secs(30),
            lock_default_timeout: Duration::from_secs(10),
            clustering_tag: "vertx-clustering".to_string(),
        }
    }
}
