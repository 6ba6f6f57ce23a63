//! Proxy session lifecycle coordinator.
//!
//! The coordinator sits between a UI and a native proxy backend: it owns
//! the server registry, a single-session state machine, session-scoped
//! telemetry and reconciliation against the backend's ground truth. The
//! backend itself (process supervision, system proxy, persistence) is
//! reached through the [`ProxyBackend`] trait and a [`BackendEvent`]
//! channel, so the whole core is testable against a scripted backend.
//!
//! ```no_run
//! use std::sync::Arc;
//! use proxy_coordinator::{Coordinator, CoordinatorConfig, ProxyBackend};
//!
//! # async fn run(backend: Arc<dyn ProxyBackend>) -> Result<(), proxy_coordinator::CoordinatorError> {
//! let (_events_tx, events_rx) = tokio::sync::mpsc::channel(16);
//! let coordinator = Coordinator::new(backend, CoordinatorConfig::default());
//! coordinator.start(events_rx).await?;
//!
//! let servers = coordinator.servers().await;
//! if let Some(server) = servers.first() {
//!     coordinator.connect(&server.id).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod profile;
mod reconciler;
pub mod registry;
pub mod session;
pub mod telemetry;

pub use backend::{
    BackendConfig, BackendEvent, ConnectionTest, NetworkSpeed, ProxyBackend, ProxyMode,
    ProxyStatus,
};
pub use config::CoordinatorConfig;
pub use coordinator::Coordinator;
pub use error::{BackendError, CoordinatorError};
pub use profile::{ProfileOptions, Protocol, ServerProfile};
pub use registry::ServerRegistry;
pub use session::{SessionPhase, SessionSnapshot};
pub use telemetry::TelemetrySnapshot;
