//! Server profile data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Supported outbound protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Vmess,
    Vless,
    Trojan,
    Socks5,
    Http,
}

impl Protocol {
    pub fn all() -> Vec<Protocol> {
        vec![
            Protocol::Vmess,
            Protocol::Vless,
            Protocol::Trojan,
            Protocol::Socks5,
            Protocol::Http,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Vmess => "vmess",
            Protocol::Vless => "vless",
            Protocol::Trojan => "trojan",
            Protocol::Socks5 => "socks5",
            Protocol::Http => "http",
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "vmess" => Ok(Protocol::Vmess),
            "vless" => Ok(Protocol::Vless),
            "trojan" => Ok(Protocol::Trojan),
            "socks5" => Ok(Protocol::Socks5),
            "http" => Ok(Protocol::Http),
            _ => Err(format!("Unknown protocol: {}", s)),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol-specific credential and transport settings.
///
/// Which fields are meaningful depends on [`Protocol`]: vmess/vless use
/// `uuid` and `security`, trojan uses `password`, socks5/http use
/// `username`/`password`. Transport fields apply to protocols carried over
/// ws/h2/grpc.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileOptions {
    pub uuid: Option<String>,
    pub password: Option<String>,
    pub username: Option<String>,
    pub security: Option<String>,
    /// Transport network type (tcp, ws, h2, grpc).
    pub network: Option<String>,
    pub path: Option<String>,
    pub host: Option<String>,
    pub tls: bool,
    pub sni: Option<String>,
    pub allow_insecure: bool,
    pub mux: bool,
}

/// A configured proxy server.
///
/// Identity (`id`) and `created_at` are immutable once the profile is
/// created; updates only rewrite the editable fields and `updated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerProfile {
    pub id: String,
    pub name: String,
    pub protocol: Protocol,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub options: ProfileOptions,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServerProfile {
    /// Build a draft profile for registration. The registry stamps the
    /// authoritative id and timestamps when it persists the draft.
    pub fn draft(name: impl Into<String>, protocol: Protocol, address: impl Into<String>, port: u16) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            name: name.into(),
            protocol,
            address: address.into(),
            port,
            options: ProfileOptions::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_options(mut self, options: ProfileOptions) -> Self {
        self.options = options;
        self
    }
}
