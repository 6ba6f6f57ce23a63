//! Telemetry aggregation
//!
//! Accumulates backend throughput samples into current rates, lifetime
//! totals and session-scoped traffic. The poll loop runs only while the
//! session is connected; it is spawned by the coordinator after the
//! session baseline has been captured and aborted on every exit from
//! the connected phase.

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};

use crate::backend::{NetworkSpeed, ProxyBackend};
use crate::config::CoordinatorConfig;

/// Aggregated throughput view exposed to subscribers.
///
/// `total_*` are lifetime counters owned by the backend; `session_*` are
/// derived against the baseline captured when the session connected and
/// are clamped at zero if the backend's counters reset underneath us.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TelemetrySnapshot {
    pub upload_speed: u64,
    pub download_speed: u64,
    pub total_upload: u64,
    pub total_download: u64,
    pub session_upload: u64,
    pub session_download: u64,
}

#[derive(Debug, Default)]
struct TelemetryInner {
    snapshot: TelemetrySnapshot,
    /// Lifetime (upload, download) totals at the instant the session
    /// entered Connected. `None` outside a session.
    baseline: Option<(u64, u64)>,
    consecutive_failures: u32,
    last_attempt: Option<Instant>,
}

/// Shared telemetry state. Owned by the coordinator, read-only for views.
#[derive(Debug, Default)]
pub struct TelemetryAggregator {
    inner: RwLock<TelemetryInner>,
}

impl TelemetryAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> TelemetrySnapshot {
        self.inner.read().await.snapshot
    }

    /// Lifetime totals from the most recent sample, used as a fallback
    /// baseline when the capture sample itself fails.
    pub(crate) async fn last_totals(&self) -> (u64, u64) {
        let inner = self.inner.read().await;
        (inner.snapshot.total_upload, inner.snapshot.total_download)
    }

    /// Capture the session baseline. Must happen before the poll loop
    /// starts so no sample can race an unset baseline.
    pub(crate) async fn begin_session(&self, baseline: NetworkSpeed) {
        let mut inner = self.inner.write().await;
        inner.baseline = Some((baseline.total_upload, baseline.total_download));
        inner.consecutive_failures = 0;
        inner.last_attempt = None;
        inner.snapshot = TelemetrySnapshot {
            upload_speed: 0,
            download_speed: 0,
            total_upload: baseline.total_upload,
            total_download: baseline.total_download,
            session_upload: 0,
            session_download: 0,
        };
    }

    /// Clear the baseline and zero the transient fields. Lifetime totals
    /// are left untouched; they represent all-time usage.
    pub(crate) async fn end_session(&self) {
        let mut inner = self.inner.write().await;
        inner.baseline = None;
        inner.consecutive_failures = 0;
        inner.last_attempt = None;
        inner.snapshot.upload_speed = 0;
        inner.snapshot.download_speed = 0;
        inner.snapshot.session_upload = 0;
        inner.snapshot.session_download = 0;
    }

    /// Enforce the minimum inter-sample spacing. Returns false when the
    /// previous attempt was too recent (timer tick racing a manual
    /// refresh); records the attempt time otherwise.
    pub(crate) async fn try_begin_attempt(&self, min_spacing: Duration) -> bool {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        if let Some(last) = inner.last_attempt {
            if now.duration_since(last) < min_spacing {
                return false;
            }
        }
        inner.last_attempt = Some(now);
        true
    }

    pub(crate) async fn record_sample(&self, sample: &NetworkSpeed) {
        let mut inner = self.inner.write().await;
        inner.consecutive_failures = 0;
        // No baseline means no session; session counters stay at zero.
        let (session_upload, session_download) = match inner.baseline {
            Some((base_up, base_down)) => (
                sample.total_upload.saturating_sub(base_up),
                sample.total_download.saturating_sub(base_down),
            ),
            None => (0, 0),
        };
        inner.snapshot = TelemetrySnapshot {
            upload_speed: sample.upload_speed,
            download_speed: sample.download_speed,
            total_upload: sample.total_upload,
            total_download: sample.total_download,
            session_upload,
            session_download,
        };
    }

    /// Count a sampling failure; returns the new consecutive count.
    pub(crate) async fn record_failure(&self) -> u32 {
        let mut inner = self.inner.write().await;
        inner.consecutive_failures += 1;
        inner.consecutive_failures
    }

    pub(crate) async fn reset_failures(&self) {
        self.inner.write().await.consecutive_failures = 0;
    }
}

/// Spawn the telemetry poll loop. The caller owns the handle and must
/// abort it on every exit from the connected phase.
pub(crate) fn spawn_poll_loop(
    backend: Arc<dyn ProxyBackend>,
    telemetry: Arc<TelemetryAggregator>,
    config: CoordinatorConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            if !telemetry.try_begin_attempt(config.min_sample_spacing).await {
                continue;
            }

            match backend.get_network_speed().await {
                Ok(sample) => telemetry.record_sample(&sample).await,
                Err(err) => {
                    let failures = telemetry.record_failure().await;
                    tracing::warn!("telemetry sample failed ({}/{}): {}", failures, config.failure_threshold, err);

                    if failures >= config.failure_threshold {
                        tracing::warn!(
                            "telemetry backing off for {}s after {} consecutive failures",
                            config.failure_backoff.as_secs(),
                            failures
                        );
                        tokio::time::sleep(config.failure_backoff).await;
                        telemetry.reset_failures().await;
                        interval.reset();
                    }
                }
            }
        }
    })
}
