//! Thin adapter over an external Consul-style KV agent.
//!
//! Owns no cluster state: just the HTTP client and the monotonic
//! watch-index bookkeeping a blocking-query loop needs to keep polling.
//! Every other component in this workspace reaches the KV agent only
//! through a [`KvGateway`].

mod catalog;
mod gateway;
mod session;
mod watch;

pub use catalog::{CheckSpec, CheckStatus, ServiceSnapshot};
pub use gateway::{KvGateway, PutOptions};
pub use session::SessionBehavior;
pub use watch::{KvSnapshot, ServicesWatchHandler, WatchHandle, WatchHandler};

pub use cluster_common::TransportError;
