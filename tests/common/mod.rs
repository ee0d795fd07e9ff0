//! Common test utilities and helpers

#![allow(dead_code)]

use async_trait::async_trait;
use fleetwatch_core::registry::{LivenessConfig, ResourceUsage, SystemInfo};
use fleetwatch_core::supervision::{ClusterNode, NodeRole, TrackedProcess};
use fleetwatch_core::{
    AgentConfigSender, ClusterNodeProvider, ConnectionRegistry, FleetError, HostStatusUpdater,
    MonitorConfig, RegisterRequest, Result,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Host inventory that records calls and can be told to fail
#[derive(Default)]
pub struct RecordingHostStatus {
    pub registered: Mutex<Vec<String>>,
    pub heartbeats: Mutex<Vec<(String, ResourceUsage)>>,
    pub offline: Mutex<Vec<String>>,
    pub fail_registration: Mutex<bool>,
}

impl RecordingHostStatus {
    pub fn offline_calls(&self) -> Vec<String> {
        self.offline.lock().unwrap().clone()
    }
}

#[async_trait]
impl HostStatusUpdater for RecordingHostStatus {
    async fn update_agent_status(
        &self,
        _ip_address: &str,
        agent_id: &str,
        _version: &str,
        _system_info: &SystemInfo,
    ) -> Result<String> {
        if *self.fail_registration.lock().unwrap() {
            return Err(FleetError::Collaborator("inventory unavailable".to_string()));
        }
        self.registered.lock().unwrap().push(agent_id.to_string());
        Ok(format!("host-{}", agent_id))
    }

    async fn update_heartbeat(&self, agent_id: &str, usage: ResourceUsage) -> Result<()> {
        self.heartbeats
            .lock()
            .unwrap()
            .push((agent_id.to_string(), usage));
        Ok(())
    }

    async fn mark_host_offline(&self, agent_id: &str) -> Result<()> {
        self.offline.lock().unwrap().push(agent_id.to_string());
        Ok(())
    }
}

/// Cluster inventory backed by a map
#[derive(Default)]
pub struct FakeClusterNodes {
    pub clusters: Mutex<HashMap<String, Vec<ClusterNode>>>,
}

impl FakeClusterNodes {
    pub fn with_cluster(cluster_id: &str, nodes: Vec<ClusterNode>) -> Self {
        let fake = Self::default();
        fake.clusters
            .lock()
            .unwrap()
            .insert(cluster_id.to_string(), nodes);
        fake
    }
}

#[async_trait]
impl ClusterNodeProvider for FakeClusterNodes {
    async fn get_nodes_by_cluster_id(&self, cluster_id: &str) -> Result<Vec<ClusterNode>> {
        Ok(self
            .clusters
            .lock()
            .unwrap()
            .get(cluster_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// One recorded config push
#[derive(Debug, Clone)]
pub struct Push {
    pub agent_id: String,
    pub config_version: i64,
    pub processes: Vec<TrackedProcess>,
}

/// Config transport that records pushes and fails for chosen agents
#[derive(Default)]
pub struct RecordingSender {
    pub pushes: Mutex<Vec<Push>>,
    pub unreachable: Mutex<HashSet<String>>,
    pub delay: Option<Duration>,
    /// Extra delay for pushes of one config version
    pub slow_version: Option<(i64, Duration)>,
}

impl RecordingSender {
    pub fn pushes(&self) -> Vec<Push> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentConfigSender for RecordingSender {
    async fn send_monitor_config(
        &self,
        agent_id: &str,
        config: &MonitorConfig,
        processes: &[TrackedProcess],
    ) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((version, delay)) = self.slow_version {
            if version == config.config_version {
                tokio::time::sleep(delay).await;
            }
        }
        if self.unreachable.lock().unwrap().contains(agent_id) {
            return Err(FleetError::Collaborator(format!("{} unreachable", agent_id)));
        }
        self.pushes.lock().unwrap().push(Push {
            agent_id: agent_id.to_string(),
            config_version: config.config_version,
            processes: processes.to_vec(),
        });
        Ok(())
    }
}

pub fn node(node_id: &str, agent_id: &str, role: NodeRole, pid: i64) -> ClusterNode {
    ClusterNode {
        node_id: node_id.to_string(),
        host_id: format!("host-{}", agent_id),
        agent_id: agent_id.to_string(),
        install_dir: format!("/opt/seatunnel/{}", node_id),
        role,
        pid,
    }
}

pub fn register_request(agent_id: &str, ip: &str) -> RegisterRequest {
    RegisterRequest {
        agent_id: agent_id.to_string(),
        ip_address: ip.to_string(),
        hostname: format!("{}.example.internal", agent_id),
        os_type: "linux".to_string(),
        arch: "amd64".to_string(),
        version: "2.3.8".to_string(),
        system_info: SystemInfo::default(),
    }
}

/// Registry with fast liveness settings for timing tests
pub fn fast_registry(host: Arc<RecordingHostStatus>) -> ConnectionRegistry {
    ConnectionRegistry::new(
        host,
        LivenessConfig {
            heartbeat_timeout: Duration::from_millis(50),
            check_interval: Duration::from_millis(10),
        },
    )
}
