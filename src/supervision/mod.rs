//! Process supervision configuration
//!
//! Owns the per-cluster auto-restart policy, versions every accepted change
//! and pushes it to the agents of the cluster. Also fronts the ledger of
//! process lifecycle events those agents report back.
//!
//! Fan-out started by an update runs detached from the caller on the
//! service's own task tracker, so it survives the request that triggered it.
//! [`SupervisionConfigService::shutdown`] stops new fan-outs and waits for
//! the in-flight ones.
//!
//! Fan-outs of one cluster run one at a time and always push the stored
//! config, so an agent never ends on an older version than it was sent.

mod events;
mod fanout;
mod policy;

pub use events::{
    EventFilter, EventPage, EventStats, EventType, ProcessEvent, ProcessEventReport,
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
pub use fanout::{
    plan_pushes, push_config, AgentConfigSender, ClusterNode, ClusterNodeProvider, FanoutReport,
    NodeRole, TrackedProcess,
};
pub use policy::{MonitorConfig, MonitorConfigUpdate};

#[cfg(test)]
pub use fanout::{MockAgentConfigSender, MockClusterNodeProvider};

use crate::error::{FleetError, Result};
use crate::storage::SupervisionStore;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

/// Collaborators a fan-out needs, cheap to clone into a detached task
#[derive(Clone)]
struct FanoutDeps {
    store: Arc<dyn SupervisionStore>,
    nodes: Arc<dyn ClusterNodeProvider>,
    sender: Arc<dyn AgentConfigSender>,
    /// One fan-out at a time per cluster
    cluster_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl FanoutDeps {
    async fn cluster_lock(&self, cluster_id: &str) -> Arc<Mutex<()>> {
        self.cluster_locks
            .lock()
            .await
            .entry(cluster_id.to_string())
            .or_default()
            .clone()
    }

    /// Push the stored config of a cluster unless a newer version than
    /// `version` has already been saved
    ///
    /// A newer save spawns its own fan-out, so the stale one returns an
    /// empty report without pushing.
    async fn run(&self, cluster_id: &str, version: i64) -> Result<FanoutReport> {
        let lock = self.cluster_lock(cluster_id).await;
        let _guard = lock.lock().await;

        let config = self
            .store
            .get_config(cluster_id)
            .await?
            .ok_or_else(|| FleetError::not_found("monitor config", cluster_id))?;
        if config.config_version > version {
            debug!(
                "Config v{} of cluster {} superseded by v{}, skipping push",
                version, cluster_id, config.config_version
            );
            return Ok(FanoutReport {
                cluster_id: cluster_id.to_string(),
                config_version: config.config_version,
                ..Default::default()
            });
        }

        let nodes = self.nodes.get_nodes_by_cluster_id(cluster_id).await?;
        let report = push_config(self.sender.as_ref(), &config, &nodes).await;
        if !self
            .store
            .mark_synced(cluster_id, config.config_version, Utc::now())
            .await?
        {
            debug!(
                "Config of cluster {} changed during push of v{}, not stamping",
                cluster_id, config.config_version
            );
        }

        info!(
            "Synced config v{} of cluster {}: {}/{} agent(s) reached",
            config.config_version,
            cluster_id,
            report.delivered.len(),
            report.attempted()
        );
        Ok(report)
    }
}

pub struct SupervisionConfigService {
    deps: FanoutDeps,
    fanouts: TaskTracker,
    shutdown: CancellationToken,
    /// Serializes read-modify-write of configs
    update_lock: Mutex<()>,
}

impl SupervisionConfigService {
    pub fn new(
        store: Arc<dyn SupervisionStore>,
        nodes: Arc<dyn ClusterNodeProvider>,
        sender: Arc<dyn AgentConfigSender>,
    ) -> Self {
        Self {
            deps: FanoutDeps {
                store,
                nodes,
                sender,
                cluster_locks: Arc::new(Mutex::new(HashMap::new())),
            },
            fanouts: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            update_lock: Mutex::new(()),
        }
    }

    /// Current config of a cluster, created with defaults on first access
    ///
    /// A stored config with non-positive numeric fields is healed and
    /// written back before it is returned.
    pub async fn get_or_create_config(&self, cluster_id: &str) -> Result<MonitorConfig> {
        let _guard = self.update_lock.lock().await;
        self.load_or_create(cluster_id).await
    }

    async fn load_or_create(&self, cluster_id: &str) -> Result<MonitorConfig> {
        if cluster_id.is_empty() {
            return Err(FleetError::InvalidRequest("cluster_id is required".to_string()));
        }

        match self.deps.store.get_config(cluster_id).await? {
            Some(mut config) => {
                if config.heal() {
                    info!("Healed stored monitor config of cluster {}", cluster_id);
                    self.deps.store.save_config(&config).await?;
                }
                Ok(config)
            }
            None => {
                let config = MonitorConfig::new(cluster_id);
                self.deps.store.save_config(&config).await?;
                debug!("Created default monitor config for cluster {}", cluster_id);
                Ok(config)
            }
        }
    }

    /// Validate and apply a partial update, then push it to the cluster
    ///
    /// The update succeeds once persisted. The push runs in the background
    /// and its failures are only logged.
    pub async fn update_config(
        &self,
        cluster_id: &str,
        update: &MonitorConfigUpdate,
    ) -> Result<MonitorConfig> {
        update.validate()?;

        let config = {
            let _guard = self.update_lock.lock().await;
            let mut config = self.load_or_create(cluster_id).await?;
            update.apply_to(&mut config);
            self.deps.store.save_config(&config).await?;
            config
        };

        info!(
            "Monitor config of cluster {} updated to v{}",
            cluster_id, config.config_version
        );
        self.spawn_fanout(cluster_id, config.config_version);
        Ok(config)
    }

    fn spawn_fanout(&self, cluster_id: &str, version: i64) {
        if self.shutdown.is_cancelled() {
            info!(
                "Shutting down, not pushing config v{} of cluster {}",
                version, cluster_id
            );
            return;
        }

        let deps = self.deps.clone();
        let cluster_id = cluster_id.to_string();
        self.fanouts.spawn(async move {
            if let Err(e) = deps.run(&cluster_id, version).await {
                error!(
                    "Fan-out of config v{} for cluster {} failed: {}",
                    version, cluster_id, e
                );
            }
        });
    }

    /// Push the current config to the cluster and wait for the outcome
    pub async fn sync_cluster(&self, cluster_id: &str) -> Result<FanoutReport> {
        let config = self.get_or_create_config(cluster_id).await?;
        self.deps.run(cluster_id, config.config_version).await
    }

    /// Drop a cluster's config on teardown; returns whether one existed
    pub async fn delete_cluster_config(&self, cluster_id: &str) -> Result<bool> {
        let _guard = self.update_lock.lock().await;
        let removed = self.deps.store.delete_config(cluster_id).await?;
        self.deps.cluster_locks.lock().await.remove(cluster_id);
        if removed {
            info!("Deleted monitor config of cluster {}", cluster_id);
        }
        Ok(removed)
    }

    /// Append an event to the ledger
    pub async fn record_event(&self, mut event: ProcessEvent) -> Result<ProcessEvent> {
        if event.cluster_id.is_empty() {
            return Err(FleetError::InvalidRequest("cluster_id is required".to_string()));
        }
        event.id = self.deps.store.insert_event(&event).await?;
        debug!(
            "Recorded {} event for node {} of cluster {}",
            event.event_type, event.node_id, event.cluster_id
        );
        Ok(event)
    }

    /// Append an agent-reported event to the ledger
    pub async fn record_event_from_report(
        &self,
        report: ProcessEventReport,
    ) -> Result<ProcessEvent> {
        self.record_event(report.into_event()).await
    }

    /// One page of events, newest first
    pub async fn list_events(&self, filter: &EventFilter) -> Result<EventPage> {
        let filter = filter.normalized();
        let (events, total) = self.deps.store.query_events(&filter).await?;
        Ok(EventPage {
            events,
            total,
            page: filter.page,
            page_size: filter.page_size,
        })
    }

    /// Counts per event type, zero for types that never occurred
    pub async fn get_event_stats(
        &self,
        cluster_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<EventStats> {
        let counts = self.deps.store.count_events(cluster_id, since).await?;
        Ok(EventStats::from_counts(cluster_id, since, counts))
    }

    /// Fan-outs still running
    pub fn pending_fanouts(&self) -> usize {
        self.fanouts.len()
    }

    /// Stop starting fan-outs and wait for the running ones
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.fanouts.close();
        self.fanouts.wait().await;
        info!("Supervision config service stopped");
    }
}
