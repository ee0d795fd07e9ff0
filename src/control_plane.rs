//! Composition root
//!
//! Builds every component once at startup from a [`FleetConfig`] and a set
//! of collaborators, and owns their background loops. Nothing is created
//! lazily: after [`ControlPlane::new`] returns, all components exist, and
//! [`ControlPlane::start`] / [`ControlPlane::shutdown`] are the only
//! lifecycle transitions.

use crate::config::FleetConfig;
use crate::dispatch::CommandDispatcher;
use crate::error::Result;
use crate::health::{self, HealthSummary};
use crate::registry::{ConnectionRegistry, HostStatusUpdater, LivenessConfig};
use crate::standalone::{InventoryHostStatus, LoggingConfigSender, StaticClusterNodes};
use crate::storage::{self, SupervisionStore};
use crate::supervision::{AgentConfigSender, ClusterNodeProvider, SupervisionConfigService};
use crate::tasks::{TaskCleanupHandle, TaskOrchestrator};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// External systems the control plane talks to
#[derive(Clone)]
pub struct Collaborators {
    pub host_status: Arc<dyn HostStatusUpdater>,
    pub cluster_nodes: Arc<dyn ClusterNodeProvider>,
    pub config_sender: Arc<dyn AgentConfigSender>,
    pub store: Arc<dyn SupervisionStore>,
}

impl Collaborators {
    /// In-process collaborators driven by the config file
    pub async fn standalone(config: &FleetConfig) -> Result<Self> {
        Ok(Self {
            host_status: Arc::new(InventoryHostStatus::new()),
            cluster_nodes: Arc::new(StaticClusterNodes::new(&config.clusters)),
            config_sender: Arc::new(LoggingConfigSender),
            store: storage::open_store(&config.storage).await?,
        })
    }
}

pub struct ControlPlane {
    config: FleetConfig,
    registry: ConnectionRegistry,
    dispatcher: Arc<CommandDispatcher>,
    tasks: Arc<TaskOrchestrator>,
    supervision: Arc<SupervisionConfigService>,
    store: Arc<dyn SupervisionStore>,
    cleanup: Mutex<Option<TaskCleanupHandle>>,
}

impl ControlPlane {
    pub fn new(config: FleetConfig, collaborators: Collaborators) -> Self {
        let registry = ConnectionRegistry::new(
            collaborators.host_status,
            LivenessConfig::from(&config.registry),
        );
        let dispatcher = Arc::new(CommandDispatcher::with_default_timeout(
            config.dispatcher.default_timeout(),
        ));
        let tasks = Arc::new(TaskOrchestrator::with_default_max_retries(
            config.tasks.default_max_retries,
        ));
        let supervision = Arc::new(SupervisionConfigService::new(
            collaborators.store.clone(),
            collaborators.cluster_nodes,
            collaborators.config_sender,
        ));

        Self {
            config,
            registry,
            dispatcher,
            tasks,
            supervision,
            store: collaborators.store,
            cleanup: Mutex::new(None),
        }
    }

    /// Build with the standalone collaborators
    pub async fn standalone(config: FleetConfig) -> Result<Self> {
        let collaborators = Collaborators::standalone(&config).await?;
        Ok(Self::new(config, collaborators))
    }

    /// Start the liveness sweep and task cleanup loops
    pub async fn start(&self) {
        self.registry.start().await;

        let mut cleanup = self.cleanup.lock().await;
        if !cleanup.as_ref().map(TaskCleanupHandle::is_running).unwrap_or(false) {
            *cleanup = Some(TaskCleanupHandle::spawn(
                self.tasks.clone(),
                self.config.tasks.cleanup_interval(),
                self.config.tasks.max_task_age(),
            ));
        }
        info!("Control plane started");
    }

    /// Stop background loops and wait for in-flight config pushes
    pub async fn shutdown(&self) {
        self.registry.stop().await;
        let cleanup = self.cleanup.lock().await.take();
        if let Some(mut handle) = cleanup {
            handle.stop().await;
        }
        self.supervision.shutdown().await;
        info!("Control plane stopped");
    }

    pub async fn is_cleanup_running(&self) -> bool {
        self.cleanup
            .lock()
            .await
            .as_ref()
            .map(TaskCleanupHandle::is_running)
            .unwrap_or(false)
    }

    pub async fn health(&self) -> HealthSummary {
        health::run_health_checks(self).await
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<CommandDispatcher> {
        &self.dispatcher
    }

    pub fn tasks(&self) -> &Arc<TaskOrchestrator> {
        &self.tasks
    }

    pub fn supervision(&self) -> &Arc<SupervisionConfigService> {
        &self.supervision
    }

    pub fn store(&self) -> &Arc<dyn SupervisionStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_memory_config() -> FleetConfig {
        let mut config = FleetConfig::default();
        config.storage.in_memory = true;
        config
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let plane = ControlPlane::standalone(in_memory_config()).await.unwrap();
        assert!(!plane.registry().is_sweep_running().await);

        plane.start().await;
        plane.start().await;
        assert!(plane.registry().is_sweep_running().await);
        assert!(plane.is_cleanup_running().await);

        plane.shutdown().await;
        assert!(!plane.registry().is_sweep_running().await);
        assert!(!plane.is_cleanup_running().await);
    }

    #[tokio::test]
    async fn test_config_flows_into_components() {
        let mut config = in_memory_config();
        config.tasks.default_max_retries = 7;
        let plane = ControlPlane::standalone(config).await.unwrap();

        let task = plane
            .tasks()
            .create_task(crate::tasks::CreateTaskRequest::new("install", "h1"), "op")
            .await
            .unwrap();
        assert_eq!(task.max_retries, 7);
        assert_eq!(
            plane.registry().liveness().heartbeat_timeout,
            std::time::Duration::from_secs(30)
        );
    }
}
