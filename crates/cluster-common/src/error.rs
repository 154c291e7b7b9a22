//! Error types shared across KV-adjacent crates.

use thiserror::Error;

/// KV agent unreachable, timed out, or returned a malformed response.
/// Retry at component granularity is caller-chosen; nothing in this
/// workspace auto-retries a `TransportError`.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("kv agent request failed: {0}")]
    Request(String),

    #[error("kv agent returned unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("kv agent response could not be parsed: {0}")]
    MalformedResponse(String),

    #[error("kv agent request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// A single entry in a watched or listed prefix failed to decode. Never
/// fails the containing `list`/watch call; the affected key is treated
/// as absent.
#[derive(Error, Debug, Clone)]
#[error("failed to decode entry at key {key}: {reason}")]
pub struct DecodeError {
    pub key: String,
    pub reason: String,
}

impl DecodeError {
    pub fn new(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
