//! The subscriber record stored at each multimap entry.

use cluster_common::{DecodeError, NodeId};
use serde::{Deserialize, Serialize};

/// `(host, port, nodeId)` — identifies where a message for an address
/// should be delivered, and which node's session it is tied to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub host: String,
    pub port: u16,
    pub node_id: NodeId,
}

impl Subscriber {
    pub fn new(host: impl Into<String>, port: u16, node_id: NodeId) -> Self {
        Self {
            host: host.into(),
            port,
            node_id,
        }
    }

    pub(crate) fn encode(&self) -> bytes::Bytes {
        bytes::Bytes::from(serde_json::to_vec(self).expect("Subscriber always serializes"))
    }

    pub(crate) fn decode(key: &str, bytes: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(bytes).map_err(|e| DecodeError::new(key, e.to_string()))
    }
}
