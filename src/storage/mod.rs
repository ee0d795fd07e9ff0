//! Storage layer for supervision state
//!
//! Persists per-cluster monitor configs and the append-only process event
//! ledger. Two backends: in-memory for tests and ephemeral runs, SQLite for
//! everything else.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::config::StorageSettings;
use crate::error::Result;
use crate::supervision::{EventFilter, EventType, MonitorConfig, ProcessEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

/// Storage backend trait for supervision state
#[async_trait]
pub trait SupervisionStore: Send + Sync {
    /// Fetch the config of a cluster, if one was ever saved
    async fn get_config(&self, cluster_id: &str) -> Result<Option<MonitorConfig>>;

    /// Insert or replace the config of `config.cluster_id`
    ///
    /// An existing row keeps its `last_sync_at`; only
    /// [`mark_synced`](Self::mark_synced) moves it.
    async fn save_config(&self, config: &MonitorConfig) -> Result<()>;

    /// Stamp the last fan-out if the stored config is still `config_version`
    ///
    /// Returns whether the stamp was written.
    async fn mark_synced(
        &self,
        cluster_id: &str,
        config_version: i64,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Remove a cluster's config; returns whether one existed
    async fn delete_config(&self, cluster_id: &str) -> Result<bool>;

    /// Append an event, returning its assigned ID
    async fn insert_event(&self, event: &ProcessEvent) -> Result<i64>;

    /// One page of matching events, newest first, plus the total match count
    ///
    /// `filter` must already be normalized.
    async fn query_events(&self, filter: &EventFilter) -> Result<(Vec<ProcessEvent>, u64)>;

    /// Per-type event counts for a cluster; types with no events may be absent
    async fn count_events(
        &self,
        cluster_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<(EventType, u64)>>;
}

/// Open the backend selected by `[storage]`
pub async fn open_store(settings: &StorageSettings) -> Result<Arc<dyn SupervisionStore>> {
    if settings.in_memory {
        info!("Using in-memory supervision store");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = SqliteStore::open(&settings.db_path, settings.pool_size).await?;
    Ok(Arc::new(store))
}
