//! Shared types for the cluster coordination core.
//!
//! Every `cluster-*` crate depends on this one for configuration records,
//! the ids that thread through the KV key layout, and the value codec
//! seam user values pass through unopaqued.

pub mod codec;
pub mod config;
pub mod error;
pub mod ids;

pub use codec::{Decoder, Encoder, ValueCodec};
pub use config::{ClusterConfig, KvEndpoint, PortRange};
pub use error::{DecodeError, TransportError};
pub use ids::{CheckId, NodeId, SessionId};
