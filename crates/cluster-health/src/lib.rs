//! Health probe: a TCP accept-and-close listener plus the agent
//! check that polls it.
//!
//! The listener itself carries no protocol — accepting a connection
//! *is* the health signal; the agent's periodic TCP probe is the
//! authoritative liveness signal.

use std::net::SocketAddr;
use std::time::Duration;

use cluster_common::{CheckId, NodeId, PortRange, TransportError};
use cluster_kv::{CheckSpec, CheckStatus, KvGateway};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Error, Debug)]
pub enum HealthError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to bind health probe listener: {0}")]
    Bind(#[source] std::io::Error),
}

/// A running health probe: the accept loop and the registered check.
pub struct HealthProbe {
    gateway: KvGateway,
    check_id: CheckId,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl HealthProbe {
    /// Allocate a port, start accepting connections on it, and register
    /// the agent check against it.
    pub async fn start(
        gateway: KvGateway,
        node_id: NodeId,
        advertise_host: String,
        port_range: PortRange,
        interval: Duration,
        deregister_after: Duration,
    ) -> Result<Self, HealthError> {
        let listener = bind_in_range(port_range).await?;
        let local_addr = listener.local_addr().map_err(HealthError::Bind)?;
        tracing::info!(addr = %local_addr, "health probe listener bound");

        let accept_task = tokio::spawn(accept_loop(listener));

        let check_id = CheckId::for_node(&node_id);
        gateway
            .register_check(CheckSpec {
                check_id: check_id.clone(),
                service_id: node_id,
                tcp_endpoint: (advertise_host, local_addr.port()),
                interval,
                deregister_after,
                initial_status: CheckStatus::Passing,
            })
            .await?;

        Ok(Self {
            gateway,
            check_id,
            local_addr,
            accept_task,
        })
    }

    pub fn check_id(&self) -> &CheckId {
        &self.check_id
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Deregister the check then stop accepting connections. Each step
    /// runs regardless of the other's outcome, matching the best-effort
    /// teardown policy used throughout the node lifecycle.
    pub async fn stop(self) -> Result<(), HealthError> {
        let result = self.gateway.deregister_check(&self.check_id).await;
        self.accept_task.abort();
        result.map_err(HealthError::from)
    }
}

async fn bind_in_range(range: PortRange) -> Result<TcpListener, HealthError> {
    for port in range.lo..=range.hi {
        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => return Ok(listener),
            Err(_) => continue,
        }
    }

    tracing::warn!(
        lo = range.lo,
        hi = range.hi,
        "configured port range exhausted, falling back to an OS-assigned port"
    );
    TcpListener::bind(("0.0.0.0", 0)).await.map_err(HealthError::Bind)
}

async fn accept_loop(listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((_socket, peer)) => {
                tracing::debug!(%peer, "health probe accepted and closed connection");
            }
            Err(e) => {
                tracing::warn!(error = %e, "health probe accept error");
            }
        }
    }
}
