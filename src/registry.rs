//! Server registry
//!
//! Cached view of the backend's persisted server list. Persistence is
//! authoritative: every mutation goes to the backend first and the cache
//! is updated only after the call succeeds, so a backend failure never
//! leaves the cache ahead of disk.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::backend::ProxyBackend;
use crate::error::CoordinatorError;
use crate::profile::ServerProfile;

pub struct ServerRegistry {
    backend: Arc<dyn ProxyBackend>,
    servers: RwLock<Vec<ServerProfile>>,
}

impl ServerRegistry {
    pub fn new(backend: Arc<dyn ProxyBackend>) -> Self {
        Self {
            backend,
            servers: RwLock::new(Vec::new()),
        }
    }

    /// Replace the cache with the backend's current list.
    pub async fn refresh(&self) -> Result<(), CoordinatorError> {
        let servers = self.backend.get_servers().await?;
        tracing::debug!("registry refreshed: {} servers", servers.len());
        *self.servers.write().await = servers;
        Ok(())
    }

    pub async fn list(&self) -> Vec<ServerProfile> {
        self.servers.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.servers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.servers.read().await.is_empty()
    }

    pub async fn get(&self, server_id: &str) -> Option<ServerProfile> {
        self.servers
            .read()
            .await
            .iter()
            .find(|s| s.id == server_id)
            .cloned()
    }

    /// Resolve a display name to a server id. Duplicate names are
    /// ambiguous and resolve to nothing rather than an arbitrary pick.
    pub async fn resolve_name(&self, name: &str) -> Option<String> {
        let servers = self.servers.read().await;
        let mut matches = servers.iter().filter(|s| s.name == name);
        let first = matches.next()?;
        if matches.next().is_some() {
            tracing::warn!("server name '{}' is ambiguous, refusing to resolve", name);
            return None;
        }
        Some(first.id.clone())
    }

    /// Persist a new profile. The draft's id and timestamps are stamped
    /// here; the backend may return a different authoritative id.
    pub async fn create(&self, draft: ServerProfile) -> Result<ServerProfile, CoordinatorError> {
        let now = Utc::now();
        let mut profile = draft;
        profile.id = Uuid::new_v4().to_string();
        profile.created_at = now;
        profile.updated_at = now;

        let id = self.backend.add_server(&profile).await?;
        profile.id = id;

        tracing::info!("registered server '{}' ({})", profile.name, profile.id);
        self.servers.write().await.push(profile.clone());
        Ok(profile)
    }

    /// Rewrite the editable fields of an existing profile. Identity and
    /// `created_at` are taken from the stored record, never the caller.
    pub async fn update(&self, profile: ServerProfile) -> Result<ServerProfile, CoordinatorError> {
        let existing = self
            .get(&profile.id)
            .await
            .ok_or_else(|| CoordinatorError::UnknownServer(profile.id.clone()))?;

        let mut updated = profile;
        updated.created_at = existing.created_at;
        updated.updated_at = Utc::now();

        self.backend.update_server(&updated).await?;

        let mut servers = self.servers.write().await;
        if let Some(slot) = servers.iter_mut().find(|s| s.id == updated.id) {
            *slot = updated.clone();
        }
        Ok(updated)
    }

    /// Remove a profile. The coordinator enforces the stop-first rule for
    /// the currently bound server before calling this.
    pub async fn delete(&self, server_id: &str) -> Result<(), CoordinatorError> {
        if self.get(server_id).await.is_none() {
            return Err(CoordinatorError::UnknownServer(server_id.to_string()));
        }

        self.backend.delete_server(server_id).await?;

        let mut servers = self.servers.write().await;
        servers.retain(|s| s.id != server_id);
        tracing::info!("deleted server {}", server_id);
        Ok(())
    }
}
