//! Session state machine
//!
//! One [`SessionState`] value exists per coordinator and is the single
//! source of truth for "what is currently running". Every mutation goes
//! through [`SessionState::apply`]; views only ever see read-only
//! [`SessionSnapshot`]s published over a watch channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoordinatorError;

/// Coarse phase of the session, without the per-phase payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Failed,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Connecting => "connecting",
            SessionPhase::Connected => "connected",
            SessionPhase::Disconnecting => "disconnecting",
            SessionPhase::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authoritative session record.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Connecting {
        server_id: String,
    },
    Connected {
        server_id: String,
        started_at: DateTime<Utc>,
    },
    Disconnecting {
        server_id: String,
    },
    Failed {
        server_id: String,
        reason: String,
    },
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Idle
    }
}

/// Inputs to the transition function.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// User or reconciler intent to start a session.
    Connect { server_id: String },
    /// The backend confirmed the pending transition (start or stop).
    BackendConfirmed,
    /// The backend rejected the pending transition.
    BackendRejected { reason: String },
    /// User or system intent to stop the session.
    Disconnect,
    /// The backend reported the process stopped without a matching local
    /// disconnect (crash, external kill, sleep/resume).
    ExternalStop,
    /// Explicit dismissal of a failed attempt.
    Acknowledge,
}

impl SessionEvent {
    fn name(&self) -> &'static str {
        match self {
            SessionEvent::Connect { .. } => "connect",
            SessionEvent::BackendConfirmed => "backend-confirmed",
            SessionEvent::BackendRejected { .. } => "backend-rejected",
            SessionEvent::Disconnect => "disconnect",
            SessionEvent::ExternalStop => "external-stop",
            SessionEvent::Acknowledge => "acknowledge",
        }
    }
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        match self {
            SessionState::Idle => SessionPhase::Idle,
            SessionState::Connecting { .. } => SessionPhase::Connecting,
            SessionState::Connected { .. } => SessionPhase::Connected,
            SessionState::Disconnecting { .. } => SessionPhase::Disconnecting,
            SessionState::Failed { .. } => SessionPhase::Failed,
        }
    }

    /// A transition is currently in flight; new lifecycle commands are
    /// rejected rather than queued.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting { .. } | SessionState::Disconnecting { .. }
        )
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected { .. })
    }

    /// Server bound to the current or most recent attempt.
    pub fn bound_server_id(&self) -> Option<&str> {
        match self {
            SessionState::Idle => None,
            SessionState::Connecting { server_id }
            | SessionState::Connected { server_id, .. }
            | SessionState::Disconnecting { server_id }
            | SessionState::Failed { server_id, .. } => Some(server_id),
        }
    }

    /// The transition function. Returns the successor state or rejects the
    /// event; no other code mutates session state.
    pub fn apply(&self, event: SessionEvent) -> Result<SessionState, CoordinatorError> {
        match (self, &event) {
            (SessionState::Idle, SessionEvent::Connect { server_id })
            | (SessionState::Failed { .. }, SessionEvent::Connect { server_id }) => {
                Ok(SessionState::Connecting {
                    server_id: server_id.clone(),
                })
            }

            (SessionState::Connecting { server_id }, SessionEvent::BackendConfirmed) => {
                Ok(SessionState::Connected {
                    server_id: server_id.clone(),
                    started_at: Utc::now(),
                })
            }

            (SessionState::Connecting { server_id }, SessionEvent::BackendRejected { reason }) => {
                Ok(SessionState::Failed {
                    server_id: server_id.clone(),
                    reason: reason.clone(),
                })
            }

            (SessionState::Connected { server_id, .. }, SessionEvent::Disconnect)
            | (SessionState::Connected { server_id, .. }, SessionEvent::ExternalStop) => {
                Ok(SessionState::Disconnecting {
                    server_id: server_id.clone(),
                })
            }

            (SessionState::Disconnecting { .. }, SessionEvent::BackendConfirmed) => {
                Ok(SessionState::Idle)
            }

            (
                SessionState::Disconnecting { server_id },
                SessionEvent::BackendRejected { reason },
            ) => Ok(SessionState::Failed {
                server_id: server_id.clone(),
                reason: reason.clone(),
            }),

            (SessionState::Failed { .. }, SessionEvent::Acknowledge) => Ok(SessionState::Idle),
            (SessionState::Idle, SessionEvent::Acknowledge) => Ok(SessionState::Idle),

            (SessionState::Connected { server_id, .. }, SessionEvent::Connect { .. }) => {
                Err(CoordinatorError::AlreadyConnected {
                    server_id: server_id.clone(),
                })
            }

            (state, _) if state.is_busy() => Err(CoordinatorError::Busy {
                phase: state.phase(),
            }),

            (SessionState::Idle, SessionEvent::Disconnect)
            | (SessionState::Failed { .. }, SessionEvent::Disconnect) => {
                Err(CoordinatorError::NotConnected)
            }

            (state, event) => Err(CoordinatorError::InvalidTransition {
                from: state.phase(),
                event: event.name(),
            }),
        }
    }

    /// Read-only view for subscribers.
    pub fn snapshot(&self) -> SessionSnapshot {
        let (started_at, uptime_secs) = match self {
            SessionState::Connected { started_at, .. } => {
                let uptime = (Utc::now() - *started_at).num_seconds().max(0) as u64;
                (Some(*started_at), uptime)
            }
            _ => (None, 0),
        };

        SessionSnapshot {
            phase: self.phase(),
            bound_server_id: self.bound_server_id().map(str::to_string),
            started_at,
            uptime_secs,
            last_error: match self {
                SessionState::Failed { reason, .. } => Some(reason.clone()),
                _ => None,
            },
        }
    }
}

/// Serializable snapshot of the session, published to views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub bound_server_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_secs: u64,
    pub last_error: Option<String>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        SessionState::Idle.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(id: &str) -> SessionEvent {
        SessionEvent::Connect {
            server_id: id.to_string(),
        }
    }

    #[test]
    fn test_full_lifecycle_walk() {
        let state = SessionState::Idle;

        let state = state.apply(connect("a")).unwrap();
        assert_eq!(state.phase(), SessionPhase::Connecting);
        assert_eq!(state.bound_server_id(), Some("a"));

        let state = state.apply(SessionEvent::BackendConfirmed).unwrap();
        assert!(state.is_connected());
        assert_eq!(state.bound_server_id(), Some("a"));

        let state = state.apply(SessionEvent::Disconnect).unwrap();
        assert_eq!(state.phase(), SessionPhase::Disconnecting);

        let state = state.apply(SessionEvent::BackendConfirmed).unwrap();
        assert_eq!(state, SessionState::Idle);
        assert_eq!(state.bound_server_id(), None);
    }

    #[test]
    fn test_connect_rejected_while_connected() {
        let state = SessionState::Connected {
            server_id: "a".into(),
            started_at: Utc::now(),
        };
        let err = state.apply(connect("b")).unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::AlreadyConnected { server_id } if server_id == "a"
        ));
    }

    #[test]
    fn test_commands_rejected_while_busy() {
        let state = SessionState::Connecting {
            server_id: "a".into(),
        };
        assert!(matches!(
            state.apply(connect("b")),
            Err(CoordinatorError::Busy {
                phase: SessionPhase::Connecting
            })
        ));
        assert!(matches!(
            state.apply(SessionEvent::Disconnect),
            Err(CoordinatorError::Busy { .. })
        ));

        let state = SessionState::Disconnecting {
            server_id: "a".into(),
        };
        assert!(matches!(
            state.apply(connect("b")),
            Err(CoordinatorError::Busy {
                phase: SessionPhase::Disconnecting
            })
        ));
    }

    #[test]
    fn test_rejection_lands_in_failed_with_reason() {
        let state = SessionState::Connecting {
            server_id: "a".into(),
        };
        let state = state
            .apply(SessionEvent::BackendRejected {
                reason: "bind: address in use".into(),
            })
            .unwrap();
        assert_eq!(state.phase(), SessionPhase::Failed);
        assert_eq!(state.bound_server_id(), Some("a"));
        assert_eq!(
            state.snapshot().last_error.as_deref(),
            Some("bind: address in use")
        );
    }

    #[test]
    fn test_failed_clears_via_acknowledge_or_connect() {
        let failed = SessionState::Failed {
            server_id: "a".into(),
            reason: "boom".into(),
        };

        assert_eq!(
            failed.apply(SessionEvent::Acknowledge).unwrap(),
            SessionState::Idle
        );

        let state = failed.apply(connect("b")).unwrap();
        assert_eq!(state.phase(), SessionPhase::Connecting);
        assert_eq!(state.bound_server_id(), Some("b"));
    }

    #[test]
    fn test_external_stop_path() {
        let state = SessionState::Connected {
            server_id: "a".into(),
            started_at: Utc::now(),
        };
        let state = state.apply(SessionEvent::ExternalStop).unwrap();
        assert_eq!(state.phase(), SessionPhase::Disconnecting);
        let state = state.apply(SessionEvent::BackendConfirmed).unwrap();
        assert_eq!(state, SessionState::Idle);
    }

    #[test]
    fn test_disconnect_without_session() {
        assert!(matches!(
            SessionState::Idle.apply(SessionEvent::Disconnect),
            Err(CoordinatorError::NotConnected)
        ));
    }

    #[test]
    fn test_idle_snapshot_has_no_binding() {
        let snapshot = SessionState::Idle.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Idle);
        assert!(snapshot.bound_server_id.is_none());
        assert!(snapshot.started_at.is_none());
        assert_eq!(snapshot.uptime_secs, 0);
        assert!(snapshot.last_error.is_none());
    }

    #[test]
    fn test_invalid_event_does_not_panic() {
        let err = SessionState::Idle
            .apply(SessionEvent::BackendConfirmed)
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidTransition { .. }));
    }
}
