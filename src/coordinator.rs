//! Session coordinator
//!
//! [`Coordinator`] owns all mutable state: the session cell (state machine
//! plus the telemetry poll task bound to it), the server registry cache,
//! the telemetry aggregator and the background task handles. Lifecycle
//! commands serialize through one `tokio::sync::Mutex`; the lock is held
//! while applying transitions but never across a backend start/stop await,
//! so status queries and telemetry reads stay responsive mid-transition.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::backend::{BackendEvent, ConnectionTest, NetworkSpeed, ProxyBackend, ProxyMode};
use crate::config::CoordinatorConfig;
use crate::error::CoordinatorError;
use crate::profile::ServerProfile;
use crate::registry::ServerRegistry;
use crate::reconciler;
use crate::session::{SessionEvent, SessionSnapshot, SessionState};
use crate::telemetry::{spawn_poll_loop, TelemetryAggregator, TelemetrySnapshot};

/// Session state plus the poll task whose lifetime is tied to it.
pub(crate) struct SessionCell {
    pub(crate) state: SessionState,
    pub(crate) poll_task: Option<JoinHandle<()>>,
}

pub(crate) struct Inner {
    pub(crate) config: CoordinatorConfig,
    pub(crate) backend: Arc<dyn ProxyBackend>,
    pub(crate) registry: ServerRegistry,
    pub(crate) telemetry: Arc<TelemetryAggregator>,
    pub(crate) session: Mutex<SessionCell>,
    pub(crate) snapshot_tx: watch::Sender<SessionSnapshot>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    pub(crate) mode: RwLock<ProxyMode>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    pub(crate) fn publish(&self, cell: &SessionCell) {
        self.snapshot_tx.send_replace(cell.state.snapshot());
    }

    /// Post-transition work for entering Connected: capture the session
    /// baseline, then start the poll loop. Ordering matters; the baseline
    /// must be in place before the first sample can land.
    pub(crate) async fn enter_connected(&self, cell: &mut SessionCell) {
        let baseline = match self.backend.get_network_speed().await {
            Ok(sample) => sample,
            Err(err) => {
                tracing::warn!("baseline capture failed, reusing last totals: {}", err);
                let (total_upload, total_download) = self.telemetry.last_totals().await;
                NetworkSpeed {
                    upload_speed: 0,
                    download_speed: 0,
                    total_upload,
                    total_download,
                }
            }
        };
        self.telemetry.begin_session(baseline).await;
        cell.poll_task = Some(spawn_poll_loop(
            self.backend.clone(),
            self.telemetry.clone(),
            self.config.clone(),
        ));
    }

    /// Post-transition work for leaving Connected: stop the poll loop and
    /// clear the session-scoped telemetry.
    pub(crate) async fn leave_connected(&self, cell: &mut SessionCell) {
        if let Some(task) = cell.poll_task.take() {
            task.abort();
        }
        self.telemetry.end_session().await;
    }
}

/// Handle to the coordinator. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn new(backend: Arc<dyn ProxyBackend>, config: CoordinatorConfig) -> Self {
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                config,
                backend: backend.clone(),
                registry: ServerRegistry::new(backend),
                telemetry: Arc::new(TelemetryAggregator::new()),
                session: Mutex::new(SessionCell {
                    state: SessionState::Idle,
                    poll_task: None,
                }),
                snapshot_tx,
                snapshot_rx,
                mode: RwLock::new(ProxyMode::default()),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Load the server list, seed the tracked proxy mode, reconcile against
    /// backend ground truth and start the background tasks. `events` is the
    /// backend's notification channel.
    pub async fn start(
        &self,
        events: mpsc::Receiver<BackendEvent>,
    ) -> Result<(), CoordinatorError> {
        self.inner.registry.refresh().await?;

        match self.inner.backend.get_app_config().await {
            Ok(config) => *self.inner.mode.write().await = config.proxy_mode,
            Err(err) => tracing::warn!("could not load persisted proxy mode: {}", err),
        }

        if let Err(err) = self.inner.reconcile_from_backend().await {
            tracing::warn!("startup reconciliation failed: {}", err);
        }

        let mut tasks = self.inner.tasks.lock().await;
        tasks.push(reconciler::spawn_event_listener(
            self.inner.clone(),
            events,
        ));
        if let Some(period) = self.inner.config.reconcile_interval {
            tasks.push(reconciler::spawn_periodic_reconcile(
                self.inner.clone(),
                period,
            ));
        }

        tracing::info!("coordinator started");
        Ok(())
    }

    /// Stop an active session, then tear down the background tasks.
    pub async fn shutdown(&self) {
        let connected = self.inner.session.lock().await.state.is_connected();
        if connected {
            if let Err(err) = self.disconnect().await {
                tracing::warn!("disconnect during shutdown failed: {}", err);
            }
        }

        let mut cell = self.inner.session.lock().await;
        if let Some(task) = cell.poll_task.take() {
            task.abort();
        }
        drop(cell);

        for task in self.inner.tasks.lock().await.drain(..) {
            task.abort();
        }
        tracing::info!("coordinator stopped");
    }

    /// Start a session on the given server.
    ///
    /// The session moves to Connecting before the backend is asked to
    /// start, so concurrent commands see the transition and are rejected.
    pub async fn connect(&self, server_id: &str) -> Result<(), CoordinatorError> {
        if self.inner.registry.is_empty().await {
            return Err(CoordinatorError::NoServersConfigured);
        }
        let profile = self
            .inner
            .registry
            .get(server_id)
            .await
            .ok_or_else(|| CoordinatorError::UnknownServer(server_id.to_string()))?;

        {
            let mut cell = self.inner.session.lock().await;
            cell.state = cell.state.apply(SessionEvent::Connect {
                server_id: server_id.to_string(),
            })?;
            self.inner.publish(&cell);
        }

        tracing::info!("connecting to '{}' ({})", profile.name, server_id);
        match self.inner.backend.start_proxy(server_id).await {
            Ok(()) => {
                let mut cell = self.inner.session.lock().await;
                cell.state = cell.state.apply(SessionEvent::BackendConfirmed)?;
                self.inner.enter_connected(&mut cell).await;
                self.inner.publish(&cell);
                tracing::info!("connected to '{}'", profile.name);
                Ok(())
            }
            Err(err) => {
                let reason = err.0;
                tracing::error!("backend refused to start proxy: {}", reason);
                let mut cell = self.inner.session.lock().await;
                cell.state = cell.state.apply(SessionEvent::BackendRejected {
                    reason: reason.clone(),
                })?;
                self.inner.publish(&cell);
                Err(CoordinatorError::Backend(reason))
            }
        }
    }

    /// Stop the active session.
    pub async fn disconnect(&self) -> Result<(), CoordinatorError> {
        {
            let mut cell = self.inner.session.lock().await;
            cell.state = cell.state.apply(SessionEvent::Disconnect)?;
            self.inner.leave_connected(&mut cell).await;
            self.inner.publish(&cell);
        }

        tracing::info!("disconnecting");
        match self.inner.backend.stop_proxy().await {
            Ok(()) => {
                let mut cell = self.inner.session.lock().await;
                cell.state = cell.state.apply(SessionEvent::BackendConfirmed)?;
                self.inner.publish(&cell);
                tracing::info!("disconnected");
                Ok(())
            }
            Err(err) => {
                let reason = err.0;
                tracing::error!("backend failed to stop proxy: {}", reason);
                let mut cell = self.inner.session.lock().await;
                cell.state = cell.state.apply(SessionEvent::BackendRejected {
                    reason: reason.clone(),
                })?;
                self.inner.publish(&cell);
                Err(CoordinatorError::Backend(reason))
            }
        }
    }

    /// Move the session to another server: a full disconnect followed by a
    /// connect, never an overlapping pair of backend calls.
    pub async fn switch(&self, server_id: &str) -> Result<(), CoordinatorError> {
        let count = self.inner.registry.len().await;
        if count == 0 {
            return Err(CoordinatorError::NoServersConfigured);
        }
        if count < 2 {
            return Err(CoordinatorError::NotEnoughServers);
        }
        if self.inner.registry.get(server_id).await.is_none() {
            return Err(CoordinatorError::UnknownServer(server_id.to_string()));
        }

        let connected = {
            let cell = self.inner.session.lock().await;
            if cell.state.is_busy() {
                return Err(CoordinatorError::Busy {
                    phase: cell.state.phase(),
                });
            }
            cell.state.is_connected()
        };

        if connected {
            self.disconnect().await?;
        }
        self.connect(server_id).await
    }

    /// Dismiss a failed attempt, returning the session to Idle.
    pub async fn acknowledge_failure(&self) -> Result<(), CoordinatorError> {
        let mut cell = self.inner.session.lock().await;
        cell.state = cell.state.apply(SessionEvent::Acknowledge)?;
        self.inner.publish(&cell);
        Ok(())
    }

    /// Change the system proxy mode and persist it in the backend's
    /// settings store. Persistence failure is logged, not fatal; the mode
    /// did change.
    pub async fn set_mode(&self, mode: ProxyMode) -> Result<(), CoordinatorError> {
        self.inner.backend.set_proxy_mode(mode).await?;
        *self.inner.mode.write().await = mode;
        tracing::info!("proxy mode set to {}", mode);

        match self.inner.backend.get_app_config().await {
            Ok(mut config) => {
                config.proxy_mode = mode;
                if let Err(err) = self.inner.backend.save_app_config(&config).await {
                    tracing::warn!("could not persist proxy mode: {}", err);
                }
            }
            Err(err) => tracing::warn!("could not load settings to persist proxy mode: {}", err),
        }
        Ok(())
    }

    pub async fn mode(&self) -> ProxyMode {
        *self.inner.mode.read().await
    }

    /// Current session view with a fresh uptime.
    pub async fn session(&self) -> SessionSnapshot {
        self.inner.session.lock().await.state.snapshot()
    }

    /// Watch channel carrying every published session snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot_rx.clone()
    }

    pub async fn telemetry(&self) -> TelemetrySnapshot {
        self.inner.telemetry.snapshot().await
    }

    /// Take a telemetry sample on demand. Subject to the same minimum
    /// spacing as the poll loop; a too-soon call returns the current
    /// snapshot without touching the backend.
    pub async fn refresh_telemetry(&self) -> Result<TelemetrySnapshot, CoordinatorError> {
        if !self
            .inner
            .telemetry
            .try_begin_attempt(self.inner.config.min_sample_spacing)
            .await
        {
            return Ok(self.inner.telemetry.snapshot().await);
        }

        match self.inner.backend.get_network_speed().await {
            Ok(sample) => {
                self.inner.telemetry.record_sample(&sample).await;
                Ok(self.inner.telemetry.snapshot().await)
            }
            Err(err) => {
                self.inner.telemetry.record_failure().await;
                Err(err.into())
            }
        }
    }

    /// Re-read backend ground truth and correct the local session.
    pub async fn reconcile_now(&self) -> Result<(), CoordinatorError> {
        self.inner.reconcile_from_backend().await
    }

    // Registry surface.

    pub async fn servers(&self) -> Vec<ServerProfile> {
        self.inner.registry.list().await
    }

    pub async fn refresh_servers(&self) -> Result<(), CoordinatorError> {
        self.inner.registry.refresh().await
    }

    pub async fn add_server(
        &self,
        draft: ServerProfile,
    ) -> Result<ServerProfile, CoordinatorError> {
        self.inner.registry.create(draft).await
    }

    pub async fn update_server(
        &self,
        profile: ServerProfile,
    ) -> Result<ServerProfile, CoordinatorError> {
        self.inner.registry.update(profile).await
    }

    /// Delete a server. If it backs the active session the session is
    /// stopped first; the profile is never deleted out from under a
    /// running proxy.
    pub async fn delete_server(&self, server_id: &str) -> Result<(), CoordinatorError> {
        let stop_first = {
            let cell = self.inner.session.lock().await;
            let bound = cell.state.bound_server_id() == Some(server_id);
            if bound && cell.state.is_busy() {
                return Err(CoordinatorError::Busy {
                    phase: cell.state.phase(),
                });
            }
            bound && cell.state.is_connected()
        };

        if stop_first {
            tracing::info!("server {} backs the active session, stopping first", server_id);
            self.disconnect().await?;
        }
        self.inner.registry.delete(server_id).await
    }

    /// Probe a server through the backend.
    pub async fn test_server(&self, server_id: &str) -> Result<ConnectionTest, CoordinatorError> {
        if self.inner.registry.get(server_id).await.is_none() {
            return Err(CoordinatorError::UnknownServer(server_id.to_string()));
        }
        let result = self.inner.backend.test_server_connection(server_id).await?;
        tracing::debug!(
            "connection test for {}: success={} ping={}ms",
            server_id,
            result.success,
            result.ping
        );
        Ok(result)
    }
}
