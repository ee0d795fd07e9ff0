//! In-memory storage backend

use crate::error::Result;
use crate::storage::SupervisionStore;
use crate::supervision::{EventFilter, EventType, MonitorConfig, ProcessEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    configs: HashMap<String, MonitorConfig>,
    events: Vec<ProcessEvent>,
    next_event_id: i64,
}

/// Volatile store backed by a lock-guarded map
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SupervisionStore for MemoryStore {
    async fn get_config(&self, cluster_id: &str) -> Result<Option<MonitorConfig>> {
        Ok(self.tables.read().await.configs.get(cluster_id).cloned())
    }

    async fn save_config(&self, config: &MonitorConfig) -> Result<()> {
        let mut tables = self.tables.write().await;
        let mut config = config.clone();
        if let Some(stored) = tables.configs.get(&config.cluster_id) {
            config.last_sync_at = stored.last_sync_at;
        }
        tables.configs.insert(config.cluster_id.clone(), config);
        Ok(())
    }

    async fn mark_synced(
        &self,
        cluster_id: &str,
        config_version: i64,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.configs.get_mut(cluster_id) {
            Some(config) if config.config_version == config_version => {
                config.last_sync_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_config(&self, cluster_id: &str) -> Result<bool> {
        Ok(self
            .tables
            .write()
            .await
            .configs
            .remove(cluster_id)
            .is_some())
    }

    async fn insert_event(&self, event: &ProcessEvent) -> Result<i64> {
        let mut tables = self.tables.write().await;
        tables.next_event_id += 1;
        let id = tables.next_event_id;
        let mut event = event.clone();
        event.id = id;
        tables.events.push(event);
        Ok(id)
    }

    async fn query_events(&self, filter: &EventFilter) -> Result<(Vec<ProcessEvent>, u64)> {
        let tables = self.tables.read().await;
        let mut matched: Vec<&ProcessEvent> =
            tables.events.iter().filter(|e| filter.matches(e)).collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matched.len() as u64;
        let page = matched
            .into_iter()
            .skip(filter.offset())
            .take(filter.page_size as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn count_events(
        &self,
        cluster_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<(EventType, u64)>> {
        let tables = self.tables.read().await;
        let mut counts: BTreeMap<EventType, u64> = BTreeMap::new();
        for event in tables
            .events
            .iter()
            .filter(|e| e.cluster_id == cluster_id)
            .filter(|e| since.map_or(true, |t| e.created_at >= t))
        {
            *counts.entry(event.event_type).or_insert(0) += 1;
        }
        Ok(counts.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(cluster: &str, event_type: EventType, age_secs: i64) -> ProcessEvent {
        ProcessEvent {
            id: 0,
            cluster_id: cluster.to_string(),
            node_id: "n1".to_string(),
            host_id: "h1".to_string(),
            event_type,
            pid: 100,
            process_name: "seatunnel".to_string(),
            install_dir: "/opt/seatunnel".to_string(),
            role: "hybrid".to_string(),
            details: String::new(),
            created_at: Utc::now() - chrono::Duration::seconds(age_secs),
        }
    }

    #[tokio::test]
    async fn test_config_roundtrip_and_sync_stamp() {
        let store = MemoryStore::new();
        assert!(store.get_config("c1").await.unwrap().is_none());

        let config = MonitorConfig::new("c1");
        store.save_config(&config).await.unwrap();
        let at = Utc::now();
        assert!(store.mark_synced("c1", 1, at).await.unwrap());

        let loaded = store.get_config("c1").await.unwrap().unwrap();
        assert_eq!(loaded.last_sync_at, Some(at));
        assert_eq!(loaded.config_version, 1);

        assert!(store.delete_config("c1").await.unwrap());
        assert!(!store.delete_config("c1").await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_sync_stamp_is_skipped() {
        let store = MemoryStore::new();
        let mut config = MonitorConfig::new("c1");
        config.config_version = 3;
        store.save_config(&config).await.unwrap();

        assert!(!store.mark_synced("c1", 2, Utc::now()).await.unwrap());
        assert!(!store.mark_synced("missing", 1, Utc::now()).await.unwrap());
        assert!(store.get_config("c1").await.unwrap().unwrap().last_sync_at.is_none());
    }

    #[tokio::test]
    async fn test_save_keeps_sync_stamp() {
        let store = MemoryStore::new();
        let snapshot = MonitorConfig::new("c1");
        store.save_config(&snapshot).await.unwrap();
        let at = Utc::now();
        store.mark_synced("c1", 1, at).await.unwrap();

        // Write back a copy taken before the stamp
        let mut update = snapshot.clone();
        update.config_version = 2;
        store.save_config(&update).await.unwrap();

        let loaded = store.get_config("c1").await.unwrap().unwrap();
        assert_eq!(loaded.config_version, 2);
        assert_eq!(loaded.last_sync_at, Some(at));
    }

    #[tokio::test]
    async fn test_query_newest_first_paged() {
        let store = MemoryStore::new();
        for age in [30, 10, 20] {
            store.insert_event(&event("c1", EventType::Started, age)).await.unwrap();
        }
        store.insert_event(&event("c2", EventType::Started, 0)).await.unwrap();

        let filter = EventFilter {
            cluster_id: Some("c1".to_string()),
            page: 1,
            page_size: 2,
            ..Default::default()
        };
        let (rows, total) = store.query_events(&filter).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(rows.len(), 2);
        assert!(rows[0].created_at > rows[1].created_at);

        let filter = EventFilter { page: 2, ..filter };
        let (rows, _) = store.query_events(&filter).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_count_since() {
        let store = MemoryStore::new();
        store.insert_event(&event("c1", EventType::Crashed, 7200)).await.unwrap();
        store.insert_event(&event("c1", EventType::Restarted, 10)).await.unwrap();

        let since = Utc::now() - chrono::Duration::seconds(3600);
        let counts = store.count_events("c1", Some(since)).await.unwrap();
        assert_eq!(counts, vec![(EventType::Restarted, 1)]);
    }
}
