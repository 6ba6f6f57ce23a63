//! Scripted backend for integration tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use proxy_coordinator::{
    BackendConfig, BackendError, ConnectionTest, NetworkSpeed, Protocol, ProxyBackend, ProxyMode,
    ProxyStatus, ServerProfile,
};

/// Install a subscriber once so `RUST_LOG=debug cargo test` shows the
/// coordinator's decisions.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

pub fn profile(id: &str, name: &str) -> ServerProfile {
    let mut profile = ServerProfile::draft(name, Protocol::Vless, "proxy.example.com", 443);
    profile.id = id.to_string();
    profile
}

fn stopped_status() -> ProxyStatus {
    ProxyStatus {
        is_running: false,
        status: "stopped".into(),
        current_server: None,
        proxy_mode: ProxyMode::default(),
        uptime: 0,
        upload_speed: 0,
        download_speed: 0,
        total_upload: 0,
        total_download: 0,
    }
}

/// Backend double: records every call, lets tests queue failures and
/// shape the status / speed it reports, and mirrors start/stop into the
/// status like the real process supervisor would.
pub struct MockBackend {
    pub servers: Mutex<Vec<ServerProfile>>,
    calls: Mutex<Vec<String>>,
    status: Mutex<ProxyStatus>,
    speed: Mutex<NetworkSpeed>,
    speed_results: Mutex<VecDeque<Result<NetworkSpeed, BackendError>>>,
    speed_call_times: Mutex<Vec<Instant>>,
    start_results: Mutex<VecDeque<Result<(), BackendError>>>,
    stop_results: Mutex<VecDeque<Result<(), BackendError>>>,
    start_gate: Mutex<Option<Arc<Notify>>>,
    app_config: Mutex<BackendConfig>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            servers: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            status: Mutex::new(stopped_status()),
            speed: Mutex::new(NetworkSpeed::default()),
            speed_results: Mutex::new(VecDeque::new()),
            speed_call_times: Mutex::new(Vec::new()),
            start_results: Mutex::new(VecDeque::new()),
            stop_results: Mutex::new(VecDeque::new()),
            start_gate: Mutex::new(None),
            app_config: Mutex::new(BackendConfig::default()),
        }
    }
}

impl MockBackend {
    pub fn with_servers(servers: Vec<ServerProfile>) -> Self {
        let backend = Self::default();
        *backend.servers.lock().unwrap() = servers;
        backend
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Index of the first call equal to `name`, panicking when absent.
    pub fn call_index(&self, name: &str) -> usize {
        let calls = self.calls();
        calls
            .iter()
            .position(|c| c == name)
            .unwrap_or_else(|| panic!("no call '{}' in {:?}", name, calls))
    }

    pub fn set_running(&self, server_name: Option<&str>) {
        let mut status = self.status.lock().unwrap();
        status.is_running = server_name.is_some();
        status.status = if server_name.is_some() {
            "running".into()
        } else {
            "stopped".into()
        };
        status.current_server = server_name.map(str::to_string);
    }

    pub fn set_speed(&self, speed: NetworkSpeed) {
        *self.speed.lock().unwrap() = speed;
    }

    pub fn queue_speed_errors(&self, count: usize) {
        let mut queue = self.speed_results.lock().unwrap();
        for _ in 0..count {
            queue.push_back(Err(BackendError::new("stats unavailable")));
        }
    }

    pub fn queue_start_error(&self, reason: &str) {
        self.start_results
            .lock()
            .unwrap()
            .push_back(Err(BackendError::new(reason)));
    }

    pub fn queue_stop_error(&self, reason: &str) {
        self.stop_results
            .lock()
            .unwrap()
            .push_back(Err(BackendError::new(reason)));
    }

    /// Make `start_proxy` block until the returned handle is notified.
    pub fn gate_start(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.start_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn speed_call_times(&self) -> Vec<Instant> {
        self.speed_call_times.lock().unwrap().clone()
    }

    pub fn app_config(&self) -> BackendConfig {
        self.app_config.lock().unwrap().clone()
    }

    pub fn set_app_config(&self, config: BackendConfig) {
        *self.app_config.lock().unwrap() = config;
    }
}

#[async_trait]
impl ProxyBackend for MockBackend {
    async fn get_servers(&self) -> Result<Vec<ServerProfile>, BackendError> {
        self.record("get_servers");
        Ok(self.servers.lock().unwrap().clone())
    }

    async fn add_server(&self, profile: &ServerProfile) -> Result<String, BackendError> {
        self.record(format!("add_server:{}", profile.name));
        self.servers.lock().unwrap().push(profile.clone());
        Ok(profile.id.clone())
    }

    async fn update_server(&self, profile: &ServerProfile) -> Result<(), BackendError> {
        self.record(format!("update_server:{}", profile.id));
        let mut servers = self.servers.lock().unwrap();
        match servers.iter_mut().find(|s| s.id == profile.id) {
            Some(slot) => {
                *slot = profile.clone();
                Ok(())
            }
            None => Err(BackendError::new("no such server")),
        }
    }

    async fn delete_server(&self, server_id: &str) -> Result<(), BackendError> {
        self.record(format!("delete_server:{}", server_id));
        self.servers.lock().unwrap().retain(|s| s.id != server_id);
        Ok(())
    }

    async fn start_proxy(&self, server_id: &str) -> Result<(), BackendError> {
        self.record(format!("start_proxy:{}", server_id));
        let gate = self.start_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(result) = self.start_results.lock().unwrap().pop_front() {
            result?;
        }
        let name = self
            .servers
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == server_id)
            .map(|s| s.name.clone());
        self.set_running(name.as_deref());
        Ok(())
    }

    async fn stop_proxy(&self) -> Result<(), BackendError> {
        self.record("stop_proxy");
        if let Some(result) = self.stop_results.lock().unwrap().pop_front() {
            result?;
        }
        self.set_running(None);
        Ok(())
    }

    async fn get_proxy_status(&self) -> Result<ProxyStatus, BackendError> {
        self.record("get_proxy_status");
        Ok(self.status.lock().unwrap().clone())
    }

    async fn get_network_speed(&self) -> Result<NetworkSpeed, BackendError> {
        self.record("get_network_speed");
        self.speed_call_times.lock().unwrap().push(Instant::now());
        if let Some(result) = self.speed_results.lock().unwrap().pop_front() {
            return result;
        }
        Ok(*self.speed.lock().unwrap())
    }

    async fn set_proxy_mode(&self, mode: ProxyMode) -> Result<(), BackendError> {
        self.record(format!("set_proxy_mode:{}", mode));
        self.status.lock().unwrap().proxy_mode = mode;
        Ok(())
    }

    async fn get_app_config(&self) -> Result<BackendConfig, BackendError> {
        self.record("get_app_config");
        Ok(self.app_config.lock().unwrap().clone())
    }

    async fn save_app_config(&self, config: &BackendConfig) -> Result<(), BackendError> {
        self.record("save_app_config");
        *self.app_config.lock().unwrap() = config.clone();
        Ok(())
    }

    async fn test_server_connection(
        &self,
        server_id: &str,
    ) -> Result<ConnectionTest, BackendError> {
        self.record(format!("test_server_connection:{}", server_id));
        Ok(ConnectionTest {
            success: true,
            ping: 42,
            message: "ok".into(),
        })
    }
}
