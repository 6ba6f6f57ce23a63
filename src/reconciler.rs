//! Backend reconciliation
//!
//! The backend process can start, stop or change mode without the
//! coordinator being the initiator (crash, external CLI, sleep/resume).
//! Everything that folds backend ground truth back into local state goes
//! through [`Inner::apply_backend_truth`]: the startup pass, the event
//! listener and the optional periodic check. Backend truth wins;
//! corrections are logged, never surfaced as user errors.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::backend::{BackendEvent, ProxyStatus};
use crate::coordinator::Inner;
use crate::error::CoordinatorError;
use crate::session::SessionEvent;

impl Inner {
    pub(crate) async fn reconcile_from_backend(&self) -> Result<(), CoordinatorError> {
        let status = self.backend.get_proxy_status().await?;
        self.apply_backend_truth(&status).await;
        Ok(())
    }

    /// Fold a ground-truth status report into local state.
    ///
    /// Skips when a transition is in flight; the in-flight command will
    /// land on fresher truth than this report, and the next pass catches
    /// any remaining drift.
    pub(crate) async fn apply_backend_truth(&self, status: &ProxyStatus) {
        *self.mode.write().await = status.proxy_mode;

        let mut cell = self.session.lock().await;
        if cell.state.is_busy() {
            tracing::debug!(
                "reconcile skipped, transition in flight ({})",
                cell.state.phase()
            );
            return;
        }

        match (status.is_running, cell.state.is_connected()) {
            // Proxy running but we think nothing is: adopt the session.
            (true, false) => {
                let name = match status.current_server.as_deref() {
                    Some(name) => name,
                    None => {
                        tracing::warn!("backend running without a server name, leaving session");
                        return;
                    }
                };
                let server_id = match self.registry.resolve_name(name).await {
                    Some(id) => id,
                    None => {
                        tracing::warn!(
                            "backend running on unresolvable server '{}', leaving session",
                            name
                        );
                        return;
                    }
                };

                tracing::warn!("adopting externally started session on '{}' ({})", name, server_id);
                let adopted = cell
                    .state
                    .apply(SessionEvent::Connect { server_id })
                    .and_then(|s| s.apply(SessionEvent::BackendConfirmed));
                match adopted {
                    Ok(next) => {
                        cell.state = next;
                        self.enter_connected(&mut cell).await;
                        self.publish(&cell);
                    }
                    Err(err) => tracing::warn!("could not adopt backend session: {}", err),
                }
            }

            // Proxy stopped but we think a session is active: clear it.
            (false, true) => {
                tracing::warn!("backend reports proxy stopped, clearing local session");
                let cleared = cell
                    .state
                    .apply(SessionEvent::ExternalStop)
                    .and_then(|s| s.apply(SessionEvent::BackendConfirmed));
                match cleared {
                    Ok(next) => {
                        self.leave_connected(&mut cell).await;
                        cell.state = next;
                        self.publish(&cell);
                    }
                    Err(err) => tracing::warn!("could not clear local session: {}", err),
                }
            }

            // Both running: verify we are bound to the server the backend
            // actually runs, and rebind if not.
            (true, true) => {
                let resolved = match status.current_server.as_deref() {
                    Some(name) => self.registry.resolve_name(name).await.map(|id| (name, id)),
                    None => None,
                };
                if let Some((name, server_id)) = resolved {
                    if cell.state.bound_server_id() != Some(server_id.as_str()) {
                        tracing::warn!("rebinding session to '{}' ({})", name, server_id);
                        let rebound = cell
                            .state
                            .apply(SessionEvent::ExternalStop)
                            .and_then(|s| s.apply(SessionEvent::BackendConfirmed))
                            .and_then(|s| s.apply(SessionEvent::Connect { server_id }))
                            .and_then(|s| s.apply(SessionEvent::BackendConfirmed));
                        match rebound {
                            Ok(next) => {
                                self.leave_connected(&mut cell).await;
                                cell.state = next;
                                self.enter_connected(&mut cell).await;
                                self.publish(&cell);
                            }
                            Err(err) => tracing::warn!("could not rebind session: {}", err),
                        }
                    }
                }
            }

            // Agreement. A Failed session stays Failed until acknowledged.
            (false, false) => {}
        }
    }
}

/// Drain the backend's notification channel for the life of the
/// coordinator. Status events trigger a full refetch so decisions are made
/// on current truth, not a possibly stale payload.
pub(crate) fn spawn_event_listener(
    inner: Arc<Inner>,
    mut events: mpsc::Receiver<BackendEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                BackendEvent::ProxyStatusChanged {
                    is_running,
                    current_server,
                } => {
                    tracing::debug!("proxy status changed: running={}", is_running);
                    match inner.backend.get_proxy_status().await {
                        Ok(status) => inner.apply_backend_truth(&status).await,
                        Err(err) => {
                            tracing::warn!(
                                "status refetch failed, reconciling from event payload: {}",
                                err
                            );
                            let status = ProxyStatus {
                                is_running,
                                status: String::new(),
                                current_server,
                                proxy_mode: *inner.mode.read().await,
                                uptime: 0,
                                upload_speed: 0,
                                download_speed: 0,
                                total_upload: 0,
                                total_download: 0,
                            };
                            inner.apply_backend_truth(&status).await;
                        }
                    }
                }
                BackendEvent::ProxyModeChanged { proxy_mode } => {
                    tracing::info!("proxy mode changed externally to {}", proxy_mode);
                    *inner.mode.write().await = proxy_mode;
                }
            }
        }
        tracing::debug!("backend event channel closed");
    })
}

/// Low-frequency safety net behind the event channel; off by default.
pub(crate) fn spawn_periodic_reconcile(inner: Arc<Inner>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The immediate first tick duplicates the startup pass; skip it.
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(err) = inner.reconcile_from_backend().await {
                tracing::warn!("periodic reconciliation failed: {}", err);
            }
        }
    })
}
