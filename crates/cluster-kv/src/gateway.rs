//! KV get/put/delete/list — the literal `/v1/kv` surface.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use cluster_common::{ClusterConfig, SessionId, TransportError};

/// Options carried on a `put`: binding the key's lifetime to a session
/// (ephemerality) or gating the write on optimistic concurrency (CAS).
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Bind this key's lifetime to a session (ephemeral write).
    pub acquire_session: Option<SessionId>,
    /// Compare-and-set on the store's version index.
    pub cas: Option<u64>,
}

impl PutOptions {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn acquire(session: SessionId) -> Self {
        Self {
            acquire_session: Some(session),
            cas: None,
        }
    }

    pub fn cas(index: u64) -> Self {
        Self {
            acquire_session: None,
            cas: Some(index),
        }
    }
}

/// Thin async adapter over the KV agent's HTTP API.
#[derive(Clone)]
pub struct KvGateway {
    pub(crate) client: reqwest::Client,
    pub(crate) base_url: String,
    pub(crate) request_timeout: Duration,
}

impl KvGateway {
    /// Build a gateway for the agent named in `config.kv_endpoint`.
    pub fn new(config: &ClusterConfig) -> Self {
        Self::with_timeout(config, Duration::from_secs(10))
    }

    pub fn with_timeout(config: &ClusterConfig, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("reqwest client construction should never fail for default TLS config");
        Self {
            client,
            base_url: config.kv_endpoint.base_url(),
            request_timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Fetch a single key. `None` if absent.
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>, TransportError> {
        let url = self.url(&format!("/v1/kv/{}", key));
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(map_reqwest_err)?;

        match resp.status() {
            s if s == reqwest::StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let entries: Vec<RawKvEntry> = resp.json().await.map_err(|e| {
                    TransportError::MalformedResponse(e.to_string())
                })?;
                Ok(entries.into_iter().next().map(|e| e.decoded_value()))
            }
            s => {
                let body = resp.text().await.unwrap_or_default();
                Err(TransportError::UnexpectedStatus {
                    status: s.as_u16(),
                    body,
                })
            }
        }
    }

    /// Fetch a single key along with its store-assigned modify index, for
    /// callers that need to CAS against it (the distributed counter).
    pub async fn get_with_index(&self, key: &str) -> Result<Option<(Bytes, u64)>, TransportError> {
        let url = self.url(&format!("/v1/kv/{}", key));
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(map_reqwest_err)?;

        match resp.status() {
            s if s == reqwest::StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let entries: Vec<RawKvEntry> = resp.json().await.map_err(|e| {
                    TransportError::MalformedResponse(e.to_string())
                })?;
                Ok(entries
                    .into_iter()
                    .next()
                    .map(|e| (e.decoded_value(), e.modify_index)))
            }
            s => {
                let body = resp.text().await.unwrap_or_default();
                Err(TransportError::UnexpectedStatus {
                    status: s.as_u16(),
                    body,
                })
            }
        }
    }

    /// List every key under a prefix.
    pub async fn list(&self, prefix: &str) -> Result<Vec<(String, Bytes)>, TransportError> {
        let url = self.url(&format!("/v1/kv/{}?recurse", prefix));
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(map_reqwest_err)?;

        match resp.status() {
            s if s == reqwest::StatusCode::NOT_FOUND => Ok(Vec::new()),
            s if s.is_success() => {
                let entries: Vec<RawKvEntry> = resp.json().await.map_err(|e| {
                    TransportError::MalformedResponse(e.to_string())
                })?;
                Ok(entries
                    .into_iter()
                    .map(|e| {
                        let key = e.key.clone();
                        (key, e.decoded_value())
                    })
                    .collect())
            }
            s => {
                let body = resp.text().await.unwrap_or_default();
                Err(TransportError::UnexpectedStatus {
                    status: s.as_u16(),
                    body,
                })
            }
        }
    }

    /// Blocking-query variant of `list`, used by the watch loop: `index
    /// == 0` returns immediately with the current snapshot; otherwise the
    /// agent holds the request open up to `wait` for a change past
    /// `index`.
    pub(crate) async fn fetch_kv_snapshot(
        &self,
        prefix: &str,
        index: u64,
        wait: Duration,
    ) -> Result<(u64, HashMap<String, Bytes>), TransportError> {
        let mut url = self.url(&format!("/v1/kv/{}?recurse", prefix));
        if index > 0 {
            url.push_str(&format!("&index={}&wait={}s", index, wait.as_secs().max(1)));
        }
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(map_reqwest_err)?;

        let next_index = resp
            .headers()
            .get("X-Consul-Index")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(index);

        match resp.status() {
            s if s == reqwest::StatusCode::NOT_FOUND => {
                Ok((next_index, HashMap::new()))
            }
            s if s.is_success() => {
                let entries: Vec<RawKvEntry> = resp
                    .json()
                    .await
                    .map_err(|e| TransportError::MalformedResponse(e.to_string()))?;
                let snapshot = entries
                    .into_iter()
                    .map(|e| {
                        let key = e.key.clone();
                        (key, e.decoded_value())
                    })
                    .collect();
                Ok((next_index, snapshot))
            }
            s => {
                let body = resp.text().await.unwrap_or_default();
                Err(TransportError::UnexpectedStatus {
                    status: s.as_u16(),
                    body,
                })
            }
        }
    }

    /// Write a key, optionally binding ephemerality to a session or
    /// gating on a CAS index. Returns `false` if the write was rejected
    /// (CAS loss or acquire denied), never an error for that case.
    pub async fn put(
        &self,
        key: &str,
        value: Bytes,
        opts: PutOptions,
    ) -> Result<bool, TransportError> {
        let mut query: Vec<(String, String)> = Vec::new();
        if let Some(session) = &opts.acquire_session {
            query.push(("acquire".to_string(), session.0.clone()));
        }
        if let Some(index) = opts.cas {
            query.push(("cas".to_string(), index.to_string()));
        }

        let url = self.url(&format!("/v1/kv/{}", key));
        let resp = self
            .client
            .put(&url)
            .query(&query)
            .body(value)
            .send()
            .await
            .map_err(map_reqwest_err)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::UnexpectedStatus { status, body });
        }

        let body = resp.text().await.map_err(|e| {
            TransportError::MalformedResponse(e.to_string())
        })?;
        Ok(body.trim() == "true")
    }

    /// Delete one key. Absent keys are a no-op success.
    pub async fn delete(&self, key: &str) -> Result<(), TransportError> {
        let url = self.url(&format!("/v1/kv/{}", key));
        self.client
            .delete(&url)
            .send()
            .await
            .map_err(map_reqwest_err)?;
        Ok(())
    }

    /// Delete every key under a prefix.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<(), TransportError> {
        let url = self.url(&format!("/v1/kv/{}?recurse", prefix));
        self.client
            .delete(&url)
            .send()
            .await
            .map_err(map_reqwest_err)?;
        Ok(())
    }
}

/// The agent's wire shape for one KV entry: value is base64 in real
/// Consul; our fake agent (see `cluster-kv`'s tests and `cluster`'s test
/// harness) returns it the same way so the decode path is exercised.
#[derive(serde::Deserialize)]
pub(crate) struct RawKvEntry {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value")]
    pub value: Option<String>,
    #[serde(rename = "ModifyIndex", default)]
    pub modify_index: u64,
}

impl RawKvEntry {
    pub fn decoded_value(&self) -> Bytes {
        use base64::Engine;
        match &self.value {
            Some(b64) => match base64::engine::general_purpose::STANDARD.decode(b64) {
                Ok(bytes) => Bytes::from(bytes),
                Err(_) => Bytes::new(),
            },
            None => Bytes::new(),
        }
    }
}

pub(crate) fn map_reqwest_err(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(Duration::from_secs(0))
    } else {
        TransportError::Request(e.to_string())
    }
}
