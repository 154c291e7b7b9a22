//! Service and check registration — the `/v1/agent/service` and
//! `/v1/agent/check` surface used by `cluster-membership` (service
//! records) and `cluster-health` (TCP checks).

use std::collections::HashMap;
use std::time::Duration;

use cluster_common::{CheckId, NodeId, TransportError};

use crate::gateway::{map_reqwest_err, KvGateway};

/// serviceId -> tags, as delivered by a catalog listing/watch. Keyed the
/// same way whether it comes from a one-shot list or a watch delivery.
pub type ServiceSnapshot = HashMap<String, Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Passing,
    Warning,
    Critical,
}

impl CheckStatus {
    fn as_wire(&self) -> &'static str {
        match self {
            CheckStatus::Passing => "passing",
            CheckStatus::Warning => "warning",
            CheckStatus::Critical => "critical",
        }
    }
}

/// A TCP liveness check bound to a service.
#[derive(Debug, Clone)]
pub struct CheckSpec {
    pub check_id: CheckId,
    pub service_id: NodeId,
    pub tcp_endpoint: (String, u16),
    pub interval: Duration,
    pub deregister_after: Duration,
    pub initial_status: CheckStatus,
}

#[derive(serde::Serialize)]
struct RegisterServiceRequest {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Tags")]
    tags: Vec<String>,
    #[serde(rename = "Meta", skip_serializing_if = "HashMap::is_empty")]
    meta: HashMap<String, String>,
}

#[derive(serde::Serialize)]
struct RegisterCheckRequest {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "ServiceID")]
    service_id: String,
    #[serde(rename = "TCP")]
    tcp: String,
    #[serde(rename = "Interval")]
    interval: String,
    #[serde(rename = "DeregisterCriticalServiceAfter")]
    deregister_after: String,
    #[serde(rename = "Status")]
    status: String,
}

impl KvGateway {
    /// Register this node as a tagged service: `{id=nodeId, name=nodeId,
    /// tags ⊇ {clustering_tag}}`.
    pub async fn register_service(
        &self,
        node_id: &NodeId,
        tags: Vec<String>,
        meta: HashMap<String, String>,
    ) -> Result<(), TransportError> {
        let req = RegisterServiceRequest {
            id: node_id.as_str().to_string(),
            name: node_id.as_str().to_string(),
            tags,
            meta,
        };
        let url = format!("{}/v1/agent/service/register", self.base_url);
        let resp = self
            .client
            .put(&url)
            .json(&req)
            .send()
            .await
            .map_err(map_reqwest_err)?;
        ensure_success(resp).await
    }

    pub async fn deregister_service(&self, node_id: &NodeId) -> Result<(), TransportError> {
        let url = format!(
            "{}/v1/agent/service/deregister/{}",
            self.base_url,
            node_id.as_str()
        );
        let resp = self
            .client
            .put(&url)
            .send()
            .await
            .map_err(map_reqwest_err)?;
        ensure_success_or_not_found(resp).await
    }

    /// Register a TCP check bound to a service.
    pub async fn register_check(&self, check: CheckSpec) -> Result<(), TransportError> {
        let req = RegisterCheckRequest {
            id: check.check_id.0.clone(),
            name: check.check_id.0.clone(),
            service_id: check.service_id.as_str().to_string(),
            tcp: format!("{}:{}", check.tcp_endpoint.0, check.tcp_endpoint.1),
            interval: format!("{}s", check.interval.as_secs()),
            deregister_after: format!("{}s", check.deregister_after.as_secs()),
            status: check.initial_status.as_wire().to_string(),
        };
        let url = format!("{}/v1/agent/check/register", self.base_url);
        let resp = self
            .client
            .put(&url)
            .json(&req)
            .send()
            .await
            .map_err(map_reqwest_err)?;
        ensure_success(resp).await
    }

    pub async fn deregister_check(&self, check_id: &CheckId) -> Result<(), TransportError> {
        let url = format!(
            "{}/v1/agent/check/deregister/{}",
            self.base_url, check_id.0
        );
        let resp = self
            .client
            .put(&url)
            .send()
            .await
            .map_err(map_reqwest_err)?;
        ensure_success_or_not_found(resp).await
    }

    /// One-shot listing of the whole service catalog: serviceId -> tags.
    /// Used both for join-step-6 seeding and, with a blocking-query
    /// variant, for the membership watcher.
    pub async fn list_services(&self) -> Result<ServiceSnapshot, TransportError> {
        let (_, snapshot) = self.fetch_services_snapshot(0, Duration::from_secs(0)).await?;
        Ok(snapshot)
    }

    pub(crate) async fn fetch_services_snapshot(
        &self,
        index: u64,
        wait: Duration,
    ) -> Result<(u64, ServiceSnapshot), TransportError> {
        let mut url = format!("{}/v1/catalog/services", self.base_url);
        if index > 0 {
            url.push_str(&format!("?index={}&wait={}s", index, wait.as_secs().max(1)));
        }
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(map_reqwest_err)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::UnexpectedStatus { status, body });
        }

        let next_index = resp
            .headers()
            .get("X-Consul-Index")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(index);

        let snapshot: ServiceSnapshot = resp
            .json()
            .await
            .map_err(|e| TransportError::MalformedResponse(e.to_string()))?;

        Ok((next_index, snapshot))
    }
}

async fn ensure_success(resp: reqwest::Response) -> Result<(), TransportError> {
    if resp.status().is_success() {
        Ok(())
    } else {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(TransportError::UnexpectedStatus { status, body })
    }
}

async fn ensure_success_or_not_found(resp: reqwest::Response) -> Result<(), TransportError> {
    if resp.status().is_success() || resp.status() == reqwest::StatusCode::NOT_FOUND {
        Ok(())
    } else {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(TransportError::UnexpectedStatus { status, body })
    }
}
