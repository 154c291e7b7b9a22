//! Session create/destroy — the `/v1/session` surface used by
//! `cluster-session` and `cluster-lock`.

use cluster_common::{CheckId, SessionId, TransportError};

use crate::gateway::{map_reqwest_err, KvGateway};

/// What happens to keys acquired under a session once it is invalidated.
/// Every session this workspace creates uses `Delete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionBehavior {
    Delete,
    Release,
}

impl SessionBehavior {
    fn as_wire(&self) -> &'static str {
        match self {
            SessionBehavior::Delete => "delete",
            SessionBehavior::Release => "release",
        }
    }
}

#[derive(serde::Serialize)]
struct CreateSessionRequest {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Checks")]
    checks: Vec<String>,
    #[serde(rename = "Behavior")]
    behavior: String,
}

#[derive(serde::Deserialize)]
struct CreateSessionResponse {
    #[serde(rename = "ID")]
    id: String,
}

impl KvGateway {
    /// Create a session bound to the given checks, `behavior = Delete`
    /// unless the caller overrides it. `name` should already embed the
    /// owning node/lock identity (`"session:" + nodeId`, or the lock's
    /// per-acquisition name).
    pub async fn create_session(
        &self,
        name: String,
        checks: Vec<CheckId>,
        behavior: SessionBehavior,
    ) -> Result<SessionId, TransportError> {
        let req = CreateSessionRequest {
            name,
            checks: checks.into_iter().map(|c| c.0).collect(),
            behavior: behavior.as_wire().to_string(),
        };

        let url = format!("{}/v1/session/create", self.base_url);
        let resp = self
            .client
            .put(&url)
            .json(&req)
            .send()
            .await
            .map_err(map_reqwest_err)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::UnexpectedStatus { status, body });
        }

        let parsed: CreateSessionResponse = resp
            .json()
            .await
            .map_err(|e| TransportError::MalformedResponse(e.to_string()))?;
        Ok(SessionId(parsed.id))
    }

    /// Destroy a session. Unconditional and idempotent: destroying a
    /// session the agent no longer knows about is success, not an error.
    pub async fn destroy_session(&self, id: &SessionId) -> Result<(), TransportError> {
        let url = format!("{}/v1/session/destroy/{}", self.base_url, id.0);
        let resp = self
            .client
            .put(&url)
            .send()
            .await
            .map_err(map_reqwest_err)?;

        match resp.status() {
            s if s.is_success() => Ok(()),
            s if s == reqwest::StatusCode::NOT_FOUND => Ok(()),
            s => {
                let status = s.as_u16();
                let body = resp.text().await.unwrap_or_default();
                Err(TransportError::UnexpectedStatus { status, body })
            }
        }
    }
}
