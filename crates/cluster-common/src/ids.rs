//! Identifiers that thread through the KV key layout.

use std::fmt;

/// A process-assigned, stable node identity. Reuse across restarts of the
/// same `NodeId` is undefined behavior for this system; callers are
/// expected to mint a fresh one per process.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A KV-store session id, minted by `cluster-session` or `cluster-lock`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SessionId(pub String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A liveness check id, e.g. `"check:" + node_id` or the fixed `"serfHealth"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CheckId(pub String);

impl CheckId {
    pub fn for_node(node_id: &NodeId) -> Self {
        Self(format!("check:{}", node_id.as_str()))
    }

    /// The agent's own synthetic "is this process alive" check, always
    /// bound alongside the node's TCP check.
    pub fn serf_health() -> Self {
        Self("serfHealth".to_string())
    }
}

impl fmt::Display for CheckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CheckId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
