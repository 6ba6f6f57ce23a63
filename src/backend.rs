//! Native backend interface
//!
//! The process supervisor, TUN driver, system proxy configuration and
//! settings store live in a native backend outside this crate. The
//! coordinator reaches them through [`ProxyBackend`] (request/response) and
//! receives out-of-band notifications as [`BackendEvent`]s.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::profile::ServerProfile;

/// System proxy mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    Global,
    Pac,
    Direct,
}

impl ProxyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyMode::Global => "global",
            ProxyMode::Pac => "pac",
            ProxyMode::Direct => "direct",
        }
    }
}

impl Default for ProxyMode {
    fn default() -> Self {
        ProxyMode::Pac
    }
}

impl std::str::FromStr for ProxyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "global" => Ok(ProxyMode::Global),
            "pac" => Ok(ProxyMode::Pac),
            "direct" => Ok(ProxyMode::Direct),
            _ => Err(format!("Unknown proxy mode: {}", s)),
        }
    }
}

impl std::fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ground-truth proxy status as reported by the backend.
///
/// `current_server` carries the server *display name*, not its id; the
/// reconciler resolves it through the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyStatus {
    pub is_running: bool,
    pub status: String,
    pub current_server: Option<String>,
    pub proxy_mode: ProxyMode,
    pub uptime: u64,
    pub upload_speed: u64,
    pub download_speed: u64,
    pub total_upload: u64,
    pub total_download: u64,
}

/// Instantaneous network throughput sample.
///
/// Speeds are bytes/s; totals are cumulative lifetime bytes since the
/// backend started counting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NetworkSpeed {
    pub upload_speed: u64,
    pub download_speed: u64,
    pub total_upload: u64,
    pub total_download: u64,
}

/// Result of probing a server through the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTest {
    pub success: bool,
    /// Round-trip latency in milliseconds; zero when the probe failed.
    pub ping: u64,
    pub message: String,
}

/// Persisted application settings owned by the backend's config store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub proxy_mode: ProxyMode,
    pub http_port: u16,
    pub socks_port: u16,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            proxy_mode: ProxyMode::default(),
            http_port: 10809,
            socks_port: 10808,
        }
    }
}

/// Asynchronous notification pushed by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum BackendEvent {
    /// `proxy-status-changed`: the proxy process started or stopped
    /// outside a locally initiated transition.
    ProxyStatusChanged {
        is_running: bool,
        current_server: Option<String>,
    },
    /// `proxy-mode-changed`: the system proxy mode was changed elsewhere.
    ProxyModeChanged { proxy_mode: ProxyMode },
}

/// Command surface of the native backend.
///
/// Each call may fail; failures carry the backend's reason string.
#[async_trait]
pub trait ProxyBackend: Send + Sync {
    async fn get_servers(&self) -> Result<Vec<ServerProfile>, BackendError>;

    /// Persist a new profile, returning the authoritative id.
    async fn add_server(&self, profile: &ServerProfile) -> Result<String, BackendError>;

    async fn update_server(&self, profile: &ServerProfile) -> Result<(), BackendError>;

    async fn delete_server(&self, server_id: &str) -> Result<(), BackendError>;

    /// Launch the proxy process for the given server. Fails if the backend
    /// cannot bind or launch.
    async fn start_proxy(&self, server_id: &str) -> Result<(), BackendError>;

    async fn stop_proxy(&self) -> Result<(), BackendError>;

    async fn get_proxy_status(&self) -> Result<ProxyStatus, BackendError>;

    async fn get_network_speed(&self) -> Result<NetworkSpeed, BackendError>;

    async fn set_proxy_mode(&self, mode: ProxyMode) -> Result<(), BackendError>;

    async fn get_app_config(&self) -> Result<BackendConfig, BackendError>;

    async fn save_app_config(&self, config: &BackendConfig) -> Result<(), BackendError>;

    async fn test_server_connection(&self, server_id: &str) -> Result<ConnectionTest, BackendError>;
}
