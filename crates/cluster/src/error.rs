//! Top-level error type composing every crate-boundary error in the
//! workspace: each crate owns its own error enum, converging into one
//! façade error rather than a single monolithic type reused everywhere.

use cluster_common::TransportError;
use cluster_health::HealthError;
use cluster_lock::LockError;
use cluster_membership::JoinError;
use cluster_multimap::MultimapError;
use cluster_session::SessionError;
use thiserror::Error;

use crate::counter::CounterError;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error(transparent)]
    Join(#[from] JoinError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Health(#[from] HealthError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Multimap(#[from] MultimapError),

    #[error(transparent)]
    Counter(#[from] CounterError),
}
