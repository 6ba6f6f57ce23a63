//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Nominal telemetry poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Minimum spacing between two telemetry samples, guarding against a timer
/// tick racing a manual refresh.
pub const DEFAULT_MIN_SAMPLE_SPACING: Duration = Duration::from_millis(500);

/// Consecutive sampling failures tolerated before backing off.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Pause applied once the failure threshold is reached.
pub const DEFAULT_FAILURE_BACKOFF: Duration = Duration::from_secs(30);

/// Tunables for the coordinator's background loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Telemetry poll interval while a session is connected.
    pub poll_interval: Duration,

    /// Minimum spacing between telemetry samples.
    pub min_sample_spacing: Duration,

    /// Consecutive sampling failures before the poll loop backs off.
    pub failure_threshold: u32,

    /// How long the poll loop pauses after hitting the failure threshold.
    pub failure_backoff: Duration,

    /// Optional low-frequency reconciliation against backend ground truth.
    /// `None` disables the periodic check; the event channel and startup
    /// pass still reconcile.
    pub reconcile_interval: Option<Duration>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            min_sample_spacing: DEFAULT_MIN_SAMPLE_SPACING,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            failure_backoff: DEFAULT_FAILURE_BACKOFF,
            reconcile_interval: None,
        }
    }
}
