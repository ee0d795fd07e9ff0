//! Built-in collaborators for running the control plane on its own
//!
//! Without a surrounding platform the binary keeps its host inventory in
//! memory, reads cluster membership from the config file and logs config
//! pushes instead of sending them over a transport.

use crate::config::ClusterInventory;
use crate::error::Result;
use crate::registry::{HostStatusUpdater, ResourceUsage, SystemInfo};
use crate::supervision::{
    AgentConfigSender, ClusterNode, ClusterNodeProvider, MonitorConfig, TrackedProcess,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Host inventory entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    pub host_id: String,
    pub ip_address: String,
    pub agent_id: String,
    pub agent_version: String,
    pub system_info: SystemInfo,
    pub usage: ResourceUsage,
    pub online: bool,
    pub updated_at: DateTime<Utc>,
}

/// Host inventory keyed by IP address
#[derive(Default)]
pub struct InventoryHostStatus {
    hosts: RwLock<HashMap<String, HostRecord>>,
}

impl InventoryHostStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn hosts(&self) -> Vec<HostRecord> {
        let mut hosts: Vec<_> = self.hosts.read().await.values().cloned().collect();
        hosts.sort_by(|a, b| a.host_id.cmp(&b.host_id));
        hosts
    }

    pub async fn host_for_agent(&self, agent_id: &str) -> Option<HostRecord> {
        self.hosts
            .read()
            .await
            .values()
            .find(|h| h.agent_id == agent_id)
            .cloned()
    }
}

fn host_id_for(ip_address: &str) -> String {
    format!("host-{}", ip_address.replace([':', '.'], "-"))
}

#[async_trait]
impl HostStatusUpdater for InventoryHostStatus {
    async fn update_agent_status(
        &self,
        ip_address: &str,
        agent_id: &str,
        version: &str,
        system_info: &SystemInfo,
    ) -> Result<String> {
        let mut hosts = self.hosts.write().await;
        let record = hosts
            .entry(ip_address.to_string())
            .or_insert_with(|| HostRecord {
                host_id: host_id_for(ip_address),
                ip_address: ip_address.to_string(),
                agent_id: String::new(),
                agent_version: String::new(),
                system_info: SystemInfo::default(),
                usage: ResourceUsage::default(),
                online: false,
                updated_at: Utc::now(),
            });
        record.agent_id = agent_id.to_string();
        record.agent_version = version.to_string();
        record.system_info = system_info.clone();
        record.online = true;
        record.updated_at = Utc::now();
        Ok(record.host_id.clone())
    }

    async fn update_heartbeat(&self, agent_id: &str, usage: ResourceUsage) -> Result<()> {
        let mut hosts = self.hosts.write().await;
        if let Some(record) = hosts.values_mut().find(|h| h.agent_id == agent_id) {
            record.usage = usage;
            record.online = true;
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_host_offline(&self, agent_id: &str) -> Result<()> {
        let mut hosts = self.hosts.write().await;
        if let Some(record) = hosts.values_mut().find(|h| h.agent_id == agent_id) {
            record.online = false;
            record.updated_at = Utc::now();
            info!("Host {} marked offline", record.host_id);
        }
        Ok(())
    }
}

/// Cluster membership read from `[[clusters]]`
pub struct StaticClusterNodes {
    clusters: HashMap<String, Vec<ClusterNode>>,
}

impl StaticClusterNodes {
    pub fn new(inventory: &[ClusterInventory]) -> Self {
        let clusters = inventory
            .iter()
            .map(|c| (c.id.clone(), c.nodes.clone()))
            .collect();
        Self { clusters }
    }

    pub fn cluster_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.clusters.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl ClusterNodeProvider for StaticClusterNodes {
    async fn get_nodes_by_cluster_id(&self, cluster_id: &str) -> Result<Vec<ClusterNode>> {
        // Unknown clusters have no nodes rather than being an error
        Ok(self.clusters.get(cluster_id).cloned().unwrap_or_default())
    }
}

/// Logs every push instead of delivering it
#[derive(Debug, Default)]
pub struct LoggingConfigSender;

#[async_trait]
impl AgentConfigSender for LoggingConfigSender {
    async fn send_monitor_config(
        &self,
        agent_id: &str,
        config: &MonitorConfig,
        processes: &[TrackedProcess],
    ) -> Result<()> {
        info!(
            "Config push to agent {}: cluster {} v{} auto_restart={} ({} process(es))",
            agent_id,
            config.cluster_id,
            config.config_version,
            config.auto_restart,
            processes.len()
        );
        for process in processes {
            debug!(
                "  {} pid={} dir={} node={}",
                process.name, process.pid, process.install_dir, process.node_id
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervision::NodeRole;

    #[tokio::test]
    async fn test_inventory_tracks_agent_host() {
        let inventory = InventoryHostStatus::new();
        let host_id = inventory
            .update_agent_status("10.0.0.5", "a1", "1.2.0", &SystemInfo::default())
            .await
            .unwrap();
        assert_eq!(host_id, "host-10-0-0-5");

        let usage = ResourceUsage {
            cpu_percent: 12.5,
            memory_percent: 40.0,
            disk_percent: 71.0,
        };
        inventory.update_heartbeat("a1", usage).await.unwrap();
        inventory.mark_host_offline("a1").await.unwrap();

        let host = inventory.host_for_agent("a1").await.unwrap();
        assert_eq!(host.usage, usage);
        assert!(!host.online);

        // Same IP keeps the same host
        let again = inventory
            .update_agent_status("10.0.0.5", "a2", "1.3.0", &SystemInfo::default())
            .await
            .unwrap();
        assert_eq!(again, host_id);
        assert_eq!(inventory.hosts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_static_cluster_nodes() {
        let provider = StaticClusterNodes::new(&[ClusterInventory {
            id: "etl".to_string(),
            nodes: vec![ClusterNode {
                node_id: "n1".to_string(),
                host_id: "h1".to_string(),
                agent_id: "a1".to_string(),
                install_dir: "/opt/seatunnel".to_string(),
                role: NodeRole::Master,
                pid: 0,
            }],
        }]);

        assert_eq!(provider.cluster_ids(), vec!["etl".to_string()]);
        assert_eq!(provider.get_nodes_by_cluster_id("etl").await.unwrap().len(), 1);
        assert!(provider.get_nodes_by_cluster_id("other").await.unwrap().is_empty());
    }
}
