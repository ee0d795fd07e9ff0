//! Agent connection records and the requests that create or refresh them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Connection state of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Registered and sending heartbeats
    Connected,
    /// Agent announced it is going away
    Disconnected,
    /// Demoted by the liveness sweep
    Offline,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Offline => "offline",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the host an agent runs on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub cpu_cores: u32,
    pub total_memory_bytes: u64,
    pub total_disk_bytes: u64,
    #[serde(default)]
    pub kernel_version: String,
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

/// Latest resource usage reported in a heartbeat
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
}

/// A live (or recently live) agent connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConnection {
    pub agent_id: String,
    pub ip_address: String,
    pub hostname: String,
    pub os_type: String,
    pub arch: String,
    pub version: String,
    pub system_info: SystemInfo,
    /// Host inventory ID returned by the host-status collaborator
    pub host_id: Option<String>,
    pub status: ConnectionStatus,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub usage: ResourceUsage,
}

impl AgentConnection {
    pub(crate) fn from_request(req: &RegisterRequest, now: DateTime<Utc>) -> Self {
        Self {
            agent_id: req.agent_id.clone(),
            ip_address: req.ip_address.clone(),
            hostname: req.hostname.clone(),
            os_type: req.os_type.clone(),
            arch: req.arch.clone(),
            version: req.version.clone(),
            system_info: req.system_info.clone(),
            host_id: None,
            status: ConnectionStatus::Connected,
            connected_at: now,
            last_heartbeat: now,
            usage: ResourceUsage::default(),
        }
    }

    /// Connected and heard from within `timeout`
    pub fn is_online(&self, timeout: Duration) -> bool {
        self.is_online_at(Utc::now(), timeout)
    }

    /// `is_online` evaluated against an explicit clock reading
    pub fn is_online_at(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        if self.status != ConnectionStatus::Connected {
            return false;
        }
        match chrono::Duration::from_std(timeout) {
            Ok(timeout) => now.signed_duration_since(self.last_heartbeat) < timeout,
            // Timeout too large to represent: never stale
            Err(_) => true,
        }
    }
}

/// Sent by an agent when it first connects
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub agent_id: String,
    pub ip_address: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub os_type: String,
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub system_info: SystemInfo,
}

/// Periodic liveness signal
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub agent_id: String,
    #[serde(default)]
    pub usage: ResourceUsage,
}

/// Result of a registration
///
/// The connection is registered even when the host inventory could not be
/// updated; `host_sync_error` carries that failure back to the agent.
#[derive(Debug, Clone)]
pub struct Registration {
    pub connection: AgentConnection,
    pub host_sync_error: Option<String>,
}

/// Counts by connection status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total: usize,
    pub connected: usize,
    pub disconnected: usize,
    pub offline: usize,
}
