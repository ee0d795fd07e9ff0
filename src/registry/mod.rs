//! Agent Connection Registry
//!
//! Tracks which agents are connected, accepts heartbeats and demotes silent
//! agents to offline from a background liveness sweep.
//!
//! # Locking
//!
//! All connection state lives behind a single `RwLock`. Calls into the
//! [`HostStatusUpdater`] are network operations and are always made after
//! the lock has been released, so a slow host inventory never stalls
//! heartbeat processing for unrelated agents.

mod connection;
mod sweep;

pub use connection::{
    AgentConnection, ConnectionStatus, HeartbeatRequest, Registration, RegisterRequest,
    RegistryStats, ResourceUsage, SystemInfo,
};

use crate::config::RegistrySettings;
use crate::error::{FleetError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use sweep::SweepHandle;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Host inventory kept in sync with agent connections
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HostStatusUpdater: Send + Sync {
    /// Record install/version/system info for the agent's host, returning the host ID
    async fn update_agent_status(
        &self,
        ip_address: &str,
        agent_id: &str,
        version: &str,
        system_info: &SystemInfo,
    ) -> Result<String>;

    /// Forward heartbeat resource usage
    async fn update_heartbeat(&self, agent_id: &str, usage: ResourceUsage) -> Result<()>;

    /// Flag the agent's host as offline
    async fn mark_host_offline(&self, agent_id: &str) -> Result<()>;
}

/// Liveness thresholds
#[derive(Debug, Clone, Copy)]
pub struct LivenessConfig {
    pub heartbeat_timeout: Duration,
    pub check_interval: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        LivenessConfig::from(&RegistrySettings::default())
    }
}

impl From<&RegistrySettings> for LivenessConfig {
    fn from(settings: &RegistrySettings) -> Self {
        Self {
            heartbeat_timeout: settings.heartbeat_timeout(),
            check_interval: settings.check_interval(),
        }
    }
}

/// Both indices over the same set of connections
///
/// One agent per IP: registering a new agent from an IP that another agent
/// holds evicts the previous holder from both indices.
#[derive(Default)]
struct RegistryState {
    by_id: HashMap<String, AgentConnection>,
    /// IP address -> agent ID
    by_ip: HashMap<String, String>,
}

impl RegistryState {
    fn insert(&mut self, conn: AgentConnection) {
        if let Some(prev) = self.by_id.get(&conn.agent_id) {
            if prev.ip_address != conn.ip_address {
                let prev_ip = prev.ip_address.clone();
                self.release_ip(&prev_ip, &conn.agent_id);
            }
        }
        if !conn.ip_address.is_empty() {
            if let Some(owner) = self
                .by_ip
                .insert(conn.ip_address.clone(), conn.agent_id.clone())
            {
                if owner != conn.agent_id && self.by_id.remove(&owner).is_some() {
                    warn!(
                        "Agent {} replaced agent {} at {}",
                        conn.agent_id, owner, conn.ip_address
                    );
                }
            }
        }
        self.by_id.insert(conn.agent_id.clone(), conn);
    }

    fn remove(&mut self, agent_id: &str) -> Option<AgentConnection> {
        let conn = self.by_id.remove(agent_id)?;
        self.release_ip(&conn.ip_address, agent_id);
        Some(conn)
    }

    /// Drop the IP entry only if this agent still owns it
    fn release_ip(&mut self, ip: &str, agent_id: &str) {
        if self.by_ip.get(ip).map(String::as_str) == Some(agent_id) {
            self.by_ip.remove(ip);
        }
    }
}

/// Shared core used by both the registry handle and the sweep task
pub(crate) struct RegistryCore {
    state: RwLock<RegistryState>,
    host_status: Arc<dyn HostStatusUpdater>,
    liveness: LivenessConfig,
}

impl RegistryCore {
    /// Demote every stale connection to offline and notify the host inventory
    ///
    /// Returns the IDs that were demoted in this pass.
    pub(crate) async fn sweep_stale(&self) -> Vec<String> {
        let timeout = self.liveness.heartbeat_timeout;

        let stale: Vec<String> = {
            let state = self.state.read().await;
            let now = Utc::now();
            state
                .by_id
                .values()
                .filter(|c| c.status != ConnectionStatus::Offline && !c.is_online_at(now, timeout))
                .map(|c| c.agent_id.clone())
                .collect()
        };

        if stale.is_empty() {
            return Vec::new();
        }

        // Re-check under the write lock: a heartbeat may have landed in between
        let mut demoted = Vec::with_capacity(stale.len());
        {
            let mut state = self.state.write().await;
            let now = Utc::now();
            for agent_id in stale {
                if let Some(conn) = state.by_id.get_mut(&agent_id) {
                    if conn.status != ConnectionStatus::Offline
                        && !conn.is_online_at(now, timeout)
                    {
                        conn.status = ConnectionStatus::Offline;
                        demoted.push(agent_id);
                    }
                }
            }
        }

        for agent_id in &demoted {
            warn!("Agent {} missed heartbeats, marking offline", agent_id);
            if let Err(e) = self.host_status.mark_host_offline(agent_id).await {
                warn!("Failed to mark host of agent {} offline: {}", agent_id, e);
            }
        }

        demoted
    }
}

/// Thread-safe registry of agent connections
#[derive(Clone)]
pub struct ConnectionRegistry {
    core: Arc<RegistryCore>,
    sweep: Arc<Mutex<Option<SweepHandle>>>,
}

impl ConnectionRegistry {
    /// Create new empty registry
    pub fn new(host_status: Arc<dyn HostStatusUpdater>, liveness: LivenessConfig) -> Self {
        Self {
            core: Arc::new(RegistryCore {
                state: RwLock::new(RegistryState::default()),
                host_status,
                liveness,
            }),
            sweep: Arc::new(Mutex::new(None)),
        }
    }

    pub fn liveness(&self) -> LivenessConfig {
        self.core.liveness
    }

    /// Register (or re-register) an agent
    ///
    /// The connection is stored before the host inventory is contacted; a
    /// failing inventory is reported in [`Registration::host_sync_error`] and
    /// does not undo the registration.
    pub async fn register(&self, req: RegisterRequest) -> Result<Registration> {
        if req.agent_id.is_empty() {
            return Err(FleetError::InvalidRequest("agent_id is required".to_string()));
        }

        let mut conn = AgentConnection::from_request(&req, Utc::now());
        {
            let mut state = self.core.state.write().await;
            if let Some(prev) = state.by_id.get(&req.agent_id) {
                conn.host_id = prev.host_id.clone();
            }
            state.insert(conn.clone());
        }

        info!(
            "Agent {} registered from {} (version {})",
            req.agent_id, req.ip_address, req.version
        );

        let host_sync_error = match self
            .core
            .host_status
            .update_agent_status(&req.ip_address, &req.agent_id, &req.version, &req.system_info)
            .await
        {
            Ok(host_id) => {
                let mut state = self.core.state.write().await;
                if let Some(stored) = state.by_id.get_mut(&req.agent_id) {
                    stored.host_id = Some(host_id.clone());
                }
                conn.host_id = Some(host_id);
                None
            }
            Err(e) => {
                warn!(
                    "Agent {} registered but host status update failed: {}",
                    req.agent_id, e
                );
                Some(e.to_string())
            }
        };

        Ok(Registration {
            connection: conn,
            host_sync_error,
        })
    }

    /// Get agent by ID
    pub async fn get_agent(&self, agent_id: &str) -> Option<AgentConnection> {
        let state = self.core.state.read().await;
        state.by_id.get(agent_id).cloned()
    }

    /// Get agent by IP address
    pub async fn get_agent_by_ip(&self, ip_address: &str) -> Option<AgentConnection> {
        let state = self.core.state.read().await;
        state
            .by_ip
            .get(ip_address)
            .and_then(|agent_id| state.by_id.get(agent_id))
            .cloned()
    }

    /// Remove an agent from both indices
    pub async fn unregister(&self, agent_id: &str) -> Option<AgentConnection> {
        let removed = self.core.state.write().await.remove(agent_id);
        if removed.is_some() {
            info!("Agent {} unregistered", agent_id);
        }
        removed
    }

    /// Refresh liveness and resource usage
    ///
    /// A heartbeat from a disconnected or offline agent restores it to
    /// connected.
    pub async fn handle_heartbeat(&self, req: HeartbeatRequest) -> Result<AgentConnection> {
        let conn = {
            let mut state = self.core.state.write().await;
            let conn = state
                .by_id
                .get_mut(&req.agent_id)
                .ok_or_else(|| FleetError::not_found("agent", req.agent_id.clone()))?;

            conn.last_heartbeat = Utc::now();
            conn.usage = req.usage;
            if conn.status != ConnectionStatus::Connected {
                info!(
                    "Agent {} is back ({} -> connected)",
                    conn.agent_id, conn.status
                );
                conn.status = ConnectionStatus::Connected;
            }
            conn.clone()
        };

        debug!("Heartbeat from agent {}", req.agent_id);

        if let Err(e) = self
            .core
            .host_status
            .update_heartbeat(&req.agent_id, req.usage)
            .await
        {
            warn!("Failed to forward heartbeat for agent {}: {}", req.agent_id, e);
        }

        Ok(conn)
    }

    /// Mark an agent as disconnected and its host offline
    pub async fn handle_disconnect(&self, agent_id: &str) -> Result<()> {
        {
            let mut state = self.core.state.write().await;
            let conn = state
                .by_id
                .get_mut(agent_id)
                .ok_or_else(|| FleetError::not_found("agent", agent_id))?;
            conn.status = ConnectionStatus::Disconnected;
        }

        info!("Agent {} disconnected", agent_id);
        self.core.host_status.mark_host_offline(agent_id).await
    }

    /// Snapshot of all connections, ordered by agent ID
    pub async fn list_agents(&self) -> Vec<AgentConnection> {
        let state = self.core.state.read().await;
        let mut agents: Vec<AgentConnection> = state.by_id.values().cloned().collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents
    }

    /// Number of registered agents
    pub async fn count(&self) -> usize {
        self.core.state.read().await.by_id.len()
    }

    pub async fn stats(&self) -> RegistryStats {
        let state = self.core.state.read().await;
        let mut stats = RegistryStats {
            total: state.by_id.len(),
            ..Default::default()
        };
        for conn in state.by_id.values() {
            match conn.status {
                ConnectionStatus::Connected => stats.connected += 1,
                ConnectionStatus::Disconnected => stats.disconnected += 1,
                ConnectionStatus::Offline => stats.offline += 1,
            }
        }
        stats
    }

    /// Run one liveness pass immediately
    pub async fn sweep_now(&self) -> Vec<String> {
        self.core.sweep_stale().await
    }

    /// Start the liveness sweep (no-op if already running)
    pub async fn start(&self) {
        let mut slot = self.sweep.lock().await;
        if slot.as_ref().map(SweepHandle::is_running).unwrap_or(false) {
            return;
        }
        *slot = Some(SweepHandle::spawn(
            self.core.clone(),
            self.core.liveness.check_interval,
        ));
    }

    /// Stop the liveness sweep (no-op if not running)
    pub async fn stop(&self) {
        let handle = self.sweep.lock().await.take();
        if let Some(mut handle) = handle {
            handle.stop().await;
        }
    }

    pub async fn is_sweep_running(&self) -> bool {
        self.sweep
            .lock()
            .await
            .as_ref()
            .map(SweepHandle::is_running)
            .unwrap_or(false)
    }
}
