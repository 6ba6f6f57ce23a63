//! Coordinator error types

use crate::session::SessionPhase;

/// Failure reported by the native backend for a single command.
///
/// The backend surfaces errors as reason strings; the coordinator never
/// inspects them beyond forwarding to the caller.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct BackendError(pub String);

impl BackendError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

impl From<String> for BackendError {
    fn from(reason: String) -> Self {
        Self(reason)
    }
}

impl From<&str> for BackendError {
    fn from(reason: &str) -> Self {
        Self(reason.to_string())
    }
}

/// Errors produced by the coordinator core.
///
/// Every failure path maps to a variant; there is no unrecoverable
/// condition. `Busy` and the validation variants are rejected locally
/// without touching the backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoordinatorError {
    #[error("another transition is in flight ({phase})")]
    Busy { phase: SessionPhase },

    #[error("already connected to server {server_id}, disconnect first")]
    AlreadyConnected { server_id: String },

    #[error("unknown server: {0}")]
    UnknownServer(String),

    #[error("no servers configured")]
    NoServersConfigured,

    #[error("switching requires at least two configured servers")]
    NotEnoughServers,

    #[error("no active session")]
    NotConnected,

    #[error("invalid transition from {from}: {event}")]
    InvalidTransition {
        from: SessionPhase,
        event: &'static str,
    },

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<BackendError> for CoordinatorError {
    fn from(err: BackendError) -> Self {
        CoordinatorError::Backend(err.0)
    }
}
