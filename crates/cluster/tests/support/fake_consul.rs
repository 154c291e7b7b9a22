//! In-process fake Consul agent for integration tests.
//!
//! Reproduces just enough of the real agent's HTTP API — `/v1/kv`,
//! `/v1/session`, `/v1/agent/service`, `/v1/agent/check`,
//! `/v1/catalog/services` — for `cluster-kv`'s gateway to drive a full
//! join/leave/lock/multimap flow without a live Consul process: bind an
//! ephemeral port, spawn `axum::serve` with a graceful shutdown channel,
//! hand back a handle carrying the base URL.
//!
//! Blocking queries (`?index=N&wait=T`) are implemented as short
//! polling against the in-memory index counters rather than a real
//! raft-backed long poll — good enough to exercise the same
//! client-side diff logic `cluster-kv::watch` relies on.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};

#[derive(Debug, Clone)]
struct KvEntry {
    value: Vec<u8>,
    modify_index: u64,
    session: Option<String>,
}

#[derive(Debug, Clone)]
struct ServiceEntry {
    tags: Vec<String>,
}

#[derive(Debug, Clone)]
struct CheckEntry {
    service_id: String,
    status: String,
}

#[derive(Debug, Clone)]
struct SessionEntry {
    checks: Vec<String>,
    behavior: String,
}

#[derive(Default)]
struct Inner {
    kv: HashMap<String, KvEntry>,
    kv_index: u64,
    services: HashMap<String, ServiceEntry>,
    services_index: u64,
    checks: HashMap<String, CheckEntry>,
    sessions: HashMap<String, SessionEntry>,
    session_seq: u64,
}

pub struct FakeAgent {
    inner: Mutex<Inner>,
}

impl FakeAgent {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
        })
    }

    /// Test-only hook standing in for "the agent's periodic TCP probe
    /// found this node's check critical for `deregister_after`": applies
    /// every bound session's invalidation behavior and forgets the
    /// check, without requiring the test to actually wait out real
    /// check/deregister timers.
    pub async fn fail_check(&self, check_id: &str) {
        let mut inner = self.inner.lock().await;
        inner.checks.remove(check_id);

        let dying: Vec<String> = inner
            .sessions
            .iter()
            .filter(|(_, s)| s.checks.iter().any(|c| c == check_id))
            .map(|(id, _)| id.clone())
            .collect();

        for session_id in dying {
            invalidate_session(&mut inner, &session_id);
        }
    }
}

fn invalidate_session(inner: &mut Inner, session_id: &str) {
    let Some(session) = inner.sessions.remove(session_id) else {
        return;
    };
    if session.behavior == "delete" {
        let dead_keys: Vec<String> = inner
            .kv
            .iter()
            .filter(|(_, e)| e.session.as_deref() == Some(session_id))
            .map(|(k, _)| k.clone())
            .collect();
        for key in dead_keys {
            inner.kv.remove(&key);
        }
        inner.kv_index += 1;
    } else {
        for entry in inner.kv.values_mut() {
            if entry.session.as_deref() == Some(session_id) {
                entry.session = None;
            }
        }
    }
}

pub struct FakeAgentHandle {
    pub base_url: String,
    pub host: String,
    pub port: u16,
    agent: Arc<FakeAgent>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl FakeAgentHandle {
    /// A [`cluster::ClusterConfig`] pointed at this agent, with every
    /// other field left at its default.
    pub fn cluster_config(&self) -> cluster::ClusterConfig {
        cluster::ClusterConfig {
            kv_endpoint: cluster::KvEndpoint {
                host: self.host.clone(),
                port: self.port,
            },
            ..Default::default()
        }
    }

    /// Simulate check-driven session invalidation for every session
    /// bound to `check_id`: node death -> check critical -> session(s)
    /// invalidated -> DELETE-behavior keys gone.
    pub async fn fail_check(&self, check_id: &str) {
        self.agent.fail_check(check_id).await;
    }

    pub fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn start() -> FakeAgentHandle {
    let agent = FakeAgent::new();

    let app = Router::new()
        .route("/v1/kv/{*key}", get(kv_get).put(kv_put).delete(kv_delete))
        .route("/v1/session/create", put(session_create))
        .route("/v1/session/destroy/{id}", put(session_destroy))
        .route("/v1/agent/service/register", put(service_register))
        .route("/v1/agent/service/deregister/{id}", put(service_deregister))
        .route("/v1/agent/check/register", put(check_register))
        .route("/v1/agent/check/deregister/{id}", put(check_deregister))
        .route("/v1/catalog/services", get(catalog_services))
        .with_state(Arc::clone(&agent));

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("fake consul agent should bind an ephemeral port");
    let addr = listener.local_addr().expect("listener has a local addr");
    let base_url = format!("http://{}", addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    FakeAgentHandle {
        base_url,
        host: addr.ip().to_string(),
        port: addr.port(),
        agent,
        shutdown_tx: Some(shutdown_tx),
    }
}

fn parse_query(raw: Option<String>) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let Some(raw) = raw else { return out };
    for pair in raw.split('&') {
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((k, v)) => {
                out.insert(k.to_string(), urlencoding::decode(v).unwrap_or_default().into_owned());
            }
            None => {
                out.insert(pair.to_string(), String::new());
            }
        }
    }
    out
}

fn index_header(index: u64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("x-consul-index"),
        index.to_string().parse().unwrap(),
    );
    headers
}

#[derive(serde::Serialize)]
struct WireKvEntry {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value")]
    value: Option<String>,
    #[serde(rename = "ModifyIndex")]
    modify_index: u64,
}

fn to_wire(key: &str, entry: &KvEntry) -> WireKvEntry {
    use base64::Engine;
    WireKvEntry {
        key: key.to_string(),
        value: Some(base64::engine::general_purpose::STANDARD.encode(&entry.value)),
        modify_index: entry.modify_index,
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(15);

/// Blocking-query wait, implemented as short polling rather than a true
/// long-poll: returns as soon as the watched index moves past what the
/// caller last saw, or when `wait` elapses, whichever comes first.
async fn wait_for_kv_change(agent: &FakeAgent, requested_index: u64, wait: Duration) {
    if requested_index == 0 {
        return;
    }
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        if agent.inner.lock().await.kv_index != requested_index {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            return;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn wait_for_services_change(agent: &FakeAgent, requested_index: u64, wait: Duration) {
    if requested_index == 0 {
        return;
    }
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        if agent.inner.lock().await.services_index != requested_index {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            return;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn kv_get(
    State(agent): State<Arc<FakeAgent>>,
    Path(key): Path<String>,
    RawQuery(raw): RawQuery,
) -> Response {
    let query = parse_query(raw);
    let recurse = query.contains_key("recurse");
    let requested_index: u64 = query.get("index").and_then(|v| v.parse().ok()).unwrap_or(0);
    let wait = parse_wait(query.get("wait"));

    wait_for_kv_change(&agent, requested_index, wait).await;

    let inner = agent.inner.lock().await;
    let index = inner.kv_index;
    if recurse {
        let entries: Vec<WireKvEntry> = inner
            .kv
            .iter()
            .filter(|(k, _)| k.starts_with(&key))
            .map(|(k, e)| to_wire(k, e))
            .collect();
        (StatusCode::OK, index_header(index), Json(entries)).into_response()
    } else {
        match inner.kv.get(&key) {
            Some(entry) => {
                (StatusCode::OK, index_header(index), Json(vec![to_wire(&key, entry)])).into_response()
            }
            None => (StatusCode::NOT_FOUND, index_header(index)).into_response(),
        }
    }
}

fn parse_wait(raw: Option<&String>) -> Duration {
    match raw {
        Some(s) => {
            let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u64>().map(Duration::from_secs).unwrap_or(Duration::from_secs(1))
        }
        None => Duration::from_secs(1),
    }
}

async fn kv_put(
    State(agent): State<Arc<FakeAgent>>,
    Path(key): Path<String>,
    RawQuery(raw): RawQuery,
    body: axum::body::Bytes,
) -> Response {
    let query = parse_query(raw);
    let acquire = query.get("acquire").cloned();
    let cas: Option<u64> = query.get("cas").and_then(|v| v.parse().ok());

    let mut inner = agent.inner.lock().await;
    let existing = inner.kv.get(&key).cloned();

    if let Some(idx) = cas {
        let ok = match &existing {
            None => idx == 0,
            Some(e) => e.modify_index == idx,
        };
        if !ok {
            return (StatusCode::OK, "false").into_response();
        }
    }

    if let Some(session_id) = &acquire {
        let held_by_other = existing
            .as_ref()
            .and_then(|e| e.session.as_ref())
            .map(|held| held != session_id)
            .unwrap_or(false);
        if held_by_other {
            return (StatusCode::OK, "false").into_response();
        }
    }

    inner.kv_index += 1;
    let next_index = inner.kv_index;
    let session = acquire.or_else(|| existing.as_ref().and_then(|e| e.session.clone()));
    inner.kv.insert(
        key,
        KvEntry {
            value: body.to_vec(),
            modify_index: next_index,
            session,
        },
    );
    drop(inner);

    (StatusCode::OK, "true").into_response()
}

async fn kv_delete(
    State(agent): State<Arc<FakeAgent>>,
    Path(key): Path<String>,
    RawQuery(raw): RawQuery,
) -> Response {
    let query = parse_query(raw);
    let recurse = query.contains_key("recurse");

    let mut inner = agent.inner.lock().await;
    if recurse {
        let dead: Vec<String> = inner.kv.keys().filter(|k| k.starts_with(&key)).cloned().collect();
        for k in dead {
            inner.kv.remove(&k);
        }
    } else {
        inner.kv.remove(&key);
    }
    inner.kv_index += 1;
    drop(inner);

    (StatusCode::OK, "true").into_response()
}

#[derive(serde::Deserialize)]
struct CreateSessionRequest {
    #[serde(rename = "Name")]
    #[allow(dead_code)]
    name: String,
    #[serde(rename = "Checks")]
    checks: Vec<String>,
    #[serde(rename = "Behavior")]
    behavior: String,
}

#[derive(serde::Serialize)]
struct CreateSessionResponse {
    #[serde(rename = "ID")]
    id: String,
}

async fn session_create(
    State(agent): State<Arc<FakeAgent>>,
    Json(req): Json<CreateSessionRequest>,
) -> Response {
    let mut inner = agent.inner.lock().await;
    inner.session_seq += 1;
    let id = format!("session-{}", inner.session_seq);
    inner.sessions.insert(
        id.clone(),
        SessionEntry {
            checks: req.checks,
            behavior: req.behavior,
        },
    );
    Json(CreateSessionResponse { id }).into_response()
}

async fn session_destroy(State(agent): State<Arc<FakeAgent>>, Path(id): Path<String>) -> Response {
    let mut inner = agent.inner.lock().await;
    invalidate_session(&mut inner, &id);
    drop(inner);
    StatusCode::OK.into_response()
}

#[derive(serde::Deserialize)]
struct RegisterServiceRequest {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Tags")]
    tags: Vec<String>,
}

async fn service_register(
    State(agent): State<Arc<FakeAgent>>,
    Json(req): Json<RegisterServiceRequest>,
) -> Response {
    let mut inner = agent.inner.lock().await;
    inner.services.insert(req.id, ServiceEntry { tags: req.tags });
    inner.services_index += 1;
    drop(inner);
    StatusCode::OK.into_response()
}

async fn service_deregister(State(agent): State<Arc<FakeAgent>>, Path(id): Path<String>) -> Response {
    let mut inner = agent.inner.lock().await;
    inner.services.remove(&id);
    inner.services_index += 1;
    drop(inner);
    StatusCode::OK.into_response()
}

#[derive(serde::Deserialize)]
struct RegisterCheckRequest {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "ServiceID")]
    service_id: String,
    #[serde(rename = "Status")]
    status: String,
}

async fn check_register(
    State(agent): State<Arc<FakeAgent>>,
    Json(req): Json<RegisterCheckRequest>,
) -> Response {
    let mut inner = agent.inner.lock().await;
    inner.checks.insert(
        req.id,
        CheckEntry {
            service_id: req.service_id,
            status: req.status,
        },
    );
    StatusCode::OK.into_response()
}

async fn check_deregister(State(agent): State<Arc<FakeAgent>>, Path(id): Path<String>) -> Response {
    let mut inner = agent.inner.lock().await;
    inner.checks.remove(&id);
    StatusCode::OK.into_response()
}

async fn catalog_services(State(agent): State<Arc<FakeAgent>>, RawQuery(raw): RawQuery) -> Response {
    let query = parse_query(raw);
    let requested_index: u64 = query.get("index").and_then(|v| v.parse().ok()).unwrap_or(0);
    let wait = parse_wait(query.get("wait"));

    wait_for_services_change(&agent, requested_index, wait).await;

    let inner = agent.inner.lock().await;
    let index = inner.services_index;
    let snapshot: HashMap<String, Vec<String>> = inner
        .services
        .iter()
        .map(|(id, svc)| (id.clone(), svc.tags.clone()))
        .collect();
    (StatusCode::OK, index_header(index), Json(snapshot)).into_response()
}
