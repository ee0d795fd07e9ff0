//! Config fan-out to the agents of a cluster
//!
//! Best-effort: one push per agent, failures are logged and skipped, nothing
//! is retried. An agent that misses a push keeps its previous config until
//! the next update or a manual sync.

use super::policy::MonitorConfig;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Process responsibility of a cluster node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Master,
    Worker,
    /// Master and worker in one process
    Hybrid,
}

impl NodeRole {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeRole::Master => "master",
            NodeRole::Worker => "worker",
            NodeRole::Hybrid => "hybrid",
        }
    }

    /// Name the agent tracks the process under
    pub fn process_name(self) -> &'static str {
        match self {
            NodeRole::Master => "seatunnel-master",
            NodeRole::Worker => "seatunnel-worker",
            NodeRole::Hybrid => "seatunnel",
        }
    }
}

/// Engine node as known to the cluster inventory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub node_id: String,
    pub host_id: String,
    pub agent_id: String,
    pub install_dir: String,
    pub role: NodeRole,
    /// Last reported PID, 0 when not running
    #[serde(default)]
    pub pid: i64,
}

/// Process entry an agent should monitor and restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedProcess {
    pub name: String,
    pub pid: i64,
    pub install_dir: String,
    pub role: NodeRole,
    pub node_id: String,
}

impl TrackedProcess {
    fn from_node(node: &ClusterNode) -> Self {
        Self {
            name: node.role.process_name().to_string(),
            pid: node.pid,
            install_dir: node.install_dir.clone(),
            role: node.role,
            node_id: node.node_id.clone(),
        }
    }
}

/// Source of cluster membership
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterNodeProvider: Send + Sync {
    async fn get_nodes_by_cluster_id(&self, cluster_id: &str) -> Result<Vec<ClusterNode>>;
}

/// Transport that delivers a config push to one agent
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AgentConfigSender: Send + Sync {
    async fn send_monitor_config(
        &self,
        agent_id: &str,
        config: &MonitorConfig,
        processes: &[TrackedProcess],
    ) -> Result<()>;
}

/// Outcome of one fan-out
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FanoutReport {
    pub cluster_id: String,
    pub config_version: i64,
    /// Agents that accepted the push
    pub delivered: Vec<String>,
    /// Agent ID and error for each failed push
    pub failed: Vec<(String, String)>,
}

impl FanoutReport {
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Group nodes by owning agent and build each agent's process list
///
/// Nodes without an agent are skipped. A node is tracked when auto-restart
/// is on (so the agent can start it) or when it is already running. Agents
/// whose list ends up empty are kept so they still receive the config.
pub fn plan_pushes(
    config: &MonitorConfig,
    nodes: &[ClusterNode],
) -> BTreeMap<String, Vec<TrackedProcess>> {
    let mut plan: BTreeMap<String, Vec<TrackedProcess>> = BTreeMap::new();
    for node in nodes {
        if node.agent_id.is_empty() {
            debug!("Node {} has no agent, skipping", node.node_id);
            continue;
        }
        let processes = plan.entry(node.agent_id.clone()).or_default();
        if config.auto_restart || node.pid > 0 {
            processes.push(TrackedProcess::from_node(node));
        }
    }
    plan
}

/// Push `config` to every agent owning nodes in the cluster
pub async fn push_config(
    sender: &dyn AgentConfigSender,
    config: &MonitorConfig,
    nodes: &[ClusterNode],
) -> FanoutReport {
    let mut report = FanoutReport {
        cluster_id: config.cluster_id.clone(),
        config_version: config.config_version,
        ..Default::default()
    };

    for (agent_id, processes) in plan_pushes(config, nodes) {
        match sender.send_monitor_config(&agent_id, config, &processes).await {
            Ok(()) => {
                debug!(
                    "Pushed config v{} to agent {} ({} process(es))",
                    config.config_version,
                    agent_id,
                    processes.len()
                );
                report.delivered.push(agent_id);
            }
            Err(e) => {
                warn!(
                    "Failed to push config v{} of cluster {} to agent {}: {}",
                    config.config_version, config.cluster_id, agent_id, e
                );
                report.failed.push((agent_id, e.to_string()));
            }
        }
    }

    report
}
