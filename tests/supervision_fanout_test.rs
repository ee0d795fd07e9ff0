//! Supervision config fan-out and event ledger tests

mod common;

use chrono::{Duration as ChronoDuration, SubsecRound, Utc};
use common::{node, FakeClusterNodes, RecordingSender};
use fleetwatch_core::supervision::{
    EventFilter, EventType, NodeRole, ProcessEvent, ProcessEventReport,
};
use fleetwatch_core::{
    FleetError, MemoryStore, MonitorConfig, MonitorConfigUpdate, SqliteStore,
    SupervisionConfigService, SupervisionStore,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn two_agent_cluster() -> FakeClusterNodes {
    FakeClusterNodes::with_cluster(
        "c1",
        vec![
            node("n1", "agent-a", NodeRole::Master, 101),
            node("n2", "agent-a", NodeRole::Worker, 0),
            node("n3", "agent-b", NodeRole::Worker, 0),
            node("n4", "", NodeRole::Worker, 0),
        ],
    )
}

fn service(
    store: Arc<dyn SupervisionStore>,
    sender: Arc<RecordingSender>,
) -> SupervisionConfigService {
    SupervisionConfigService::new(store, Arc::new(two_agent_cluster()), sender)
}

fn event(cluster_id: &str, node_id: &str, event_type: EventType, age_secs: i64) -> ProcessEvent {
    ProcessEvent {
        id: 0,
        cluster_id: cluster_id.to_string(),
        node_id: node_id.to_string(),
        host_id: "host-1".to_string(),
        event_type,
        pid: 4242,
        process_name: "seatunnel-worker".to_string(),
        install_dir: "/opt/seatunnel".to_string(),
        role: "worker".to_string(),
        details: String::new(),
        created_at: Utc::now().trunc_subsecs(6) - ChronoDuration::seconds(age_secs),
    }
}

#[tokio::test]
async fn test_update_pushes_once_per_agent() {
    let sender = Arc::new(RecordingSender::default());
    let svc = service(Arc::new(MemoryStore::new()), sender.clone());

    let update = MonitorConfigUpdate {
        restart_delay_secs: Some(30),
        ..Default::default()
    };
    let config = svc.update_config("c1", &update).await.unwrap();
    assert_eq!(config.config_version, 2);
    assert_eq!(config.restart_delay_secs, 30);

    svc.shutdown().await;

    let mut pushes = sender.pushes();
    pushes.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
    assert_eq!(pushes.len(), 2);
    assert_eq!(pushes[0].agent_id, "agent-a");
    assert_eq!(pushes[0].processes.len(), 2);
    assert_eq!(pushes[0].processes[0].name, "seatunnel-master");
    assert_eq!(pushes[1].agent_id, "agent-b");
    assert!(pushes.iter().all(|p| p.config_version == 2));

    let stored = svc.get_or_create_config("c1").await.unwrap();
    assert!(stored.last_sync_at.is_some());
}

#[tokio::test]
async fn test_rejected_update_keeps_version() {
    let sender = Arc::new(RecordingSender::default());
    let svc = service(Arc::new(MemoryStore::new()), sender.clone());
    let before = svc.get_or_create_config("c1").await.unwrap();

    let update = MonitorConfigUpdate {
        max_restarts: Some(2),
        time_window_secs: Some(30),
        ..Default::default()
    };
    let err = svc.update_config("c1", &update).await.unwrap_err();
    assert!(matches!(
        err,
        FleetError::ValidationOutOfRange {
            field: "time_window",
            ..
        }
    ));

    svc.shutdown().await;
    let after = svc.get_or_create_config("c1").await.unwrap();
    assert_eq!(after.config_version, before.config_version);
    assert_eq!(after.max_restarts, before.max_restarts);
    assert!(sender.pushes().is_empty());
}

#[tokio::test]
async fn test_partial_failure_is_reported_not_raised() {
    let sender = Arc::new(RecordingSender::default());
    sender
        .unreachable
        .lock()
        .unwrap()
        .insert("agent-b".to_string());
    let svc = service(Arc::new(MemoryStore::new()), sender.clone());

    let report = svc.sync_cluster("c1").await.unwrap();
    assert_eq!(report.delivered, vec!["agent-a".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "agent-b");
    assert!(!report.is_complete());
}

#[tokio::test]
async fn test_disabled_restart_only_tracks_running_nodes() {
    let sender = Arc::new(RecordingSender::default());
    let svc = service(Arc::new(MemoryStore::new()), sender.clone());

    let update = MonitorConfigUpdate {
        auto_restart: Some(false),
        ..Default::default()
    };
    svc.update_config("c1", &update).await.unwrap();
    svc.shutdown().await;

    let pushes = sender.pushes();
    let agent_a = pushes.iter().find(|p| p.agent_id == "agent-a").unwrap();
    assert_eq!(agent_a.processes.len(), 1);
    assert_eq!(agent_a.processes[0].pid, 101);
    let agent_b = pushes.iter().find(|p| p.agent_id == "agent-b").unwrap();
    assert!(agent_b.processes.is_empty());
}

#[tokio::test]
async fn test_shutdown_waits_for_inflight_fanout() {
    let sender = Arc::new(RecordingSender {
        delay: Some(Duration::from_millis(50)),
        ..Default::default()
    });
    let svc = service(Arc::new(MemoryStore::new()), sender.clone());

    svc.update_config("c1", &MonitorConfigUpdate::default())
        .await
        .unwrap();
    svc.shutdown().await;
    assert_eq!(svc.pending_fanouts(), 0);
    assert_eq!(sender.pushes().len(), 2);

    // Updates after shutdown persist but push nothing
    let config = svc
        .update_config("c1", &MonitorConfigUpdate::default())
        .await
        .unwrap();
    assert_eq!(config.config_version, 3);
    assert_eq!(sender.pushes().len(), 2);
}

#[tokio::test]
async fn test_slow_push_never_overtakes_newer_version() {
    let sender = Arc::new(RecordingSender {
        slow_version: Some((2, Duration::from_millis(100))),
        ..Default::default()
    });
    let store = Arc::new(MemoryStore::new());
    let svc = service(store.clone(), sender.clone());

    let update = |delay| MonitorConfigUpdate {
        restart_delay_secs: Some(delay),
        ..Default::default()
    };
    svc.update_config("c1", &update(20)).await.unwrap();
    // Let the v2 push get under way before v3 is saved
    tokio::time::sleep(Duration::from_millis(10)).await;
    let latest = svc.update_config("c1", &update(30)).await.unwrap();
    assert_eq!(latest.config_version, 3);
    svc.shutdown().await;

    for agent in ["agent-a", "agent-b"] {
        let versions: Vec<i64> = sender
            .pushes()
            .iter()
            .filter(|p| p.agent_id == agent)
            .map(|p| p.config_version)
            .collect();
        assert_eq!(versions.last(), Some(&3), "agent {}", agent);
        assert!(versions.windows(2).all(|w| w[0] <= w[1]), "agent {}", agent);
    }

    let stored = store.get_config("c1").await.unwrap().unwrap();
    assert_eq!(stored.config_version, 3);
    assert!(stored.last_sync_at.is_some());
}

#[tokio::test]
async fn test_concurrent_updates_bump_version_once_each() {
    let svc = Arc::new(service(
        Arc::new(MemoryStore::new()),
        Arc::new(RecordingSender::default()),
    ));

    let mut handles = Vec::new();
    for i in 0..10 {
        let svc = svc.clone();
        handles.push(tokio::spawn(async move {
            let update = MonitorConfigUpdate {
                restart_delay_secs: Some(10 + i),
                ..Default::default()
            };
            svc.update_config("c1", &update).await.unwrap()
        }));
    }
    let mut versions = Vec::new();
    for handle in handles {
        versions.push(handle.await.unwrap().config_version);
    }
    versions.sort_unstable();
    assert_eq!(versions, (2..=11).collect::<Vec<i64>>());
    svc.shutdown().await;
}

#[tokio::test]
async fn test_heals_zero_fields_from_sqlite() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("fleet.db"), 2).await.unwrap());

    let mut legacy = MonitorConfig::new("c1");
    legacy.time_window_secs = 0;
    legacy.cooldown_period_secs = 0;
    store.save_config(&legacy).await.unwrap();

    let svc = service(store.clone(), Arc::new(RecordingSender::default()));
    let healed = svc.get_or_create_config("c1").await.unwrap();
    assert_eq!(healed.time_window_secs, 300);
    assert_eq!(healed.cooldown_period_secs, 1800);

    let persisted = store.get_config("c1").await.unwrap().unwrap();
    assert_eq!(persisted.time_window_secs, 300);
    assert_eq!(persisted.cooldown_period_secs, 1800);
}

#[tokio::test]
async fn test_event_ledger_on_sqlite() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("fleet.db"), 2).await.unwrap());
    let svc = service(store, Arc::new(RecordingSender::default()));

    for age in 0..25 {
        svc.record_event(event("c1", "n1", EventType::Crashed, age))
            .await
            .unwrap();
    }
    svc.record_event(event("c1", "n2", EventType::Restarted, 100))
        .await
        .unwrap();
    svc.record_event(event("c2", "n9", EventType::Started, 0))
        .await
        .unwrap();

    let first = svc
        .list_events(&EventFilter {
            cluster_id: Some("c1".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(first.total, 26);
    assert_eq!(first.page, 1);
    assert_eq!(first.events.len(), 20);
    assert!(first
        .events
        .windows(2)
        .all(|w| w[0].created_at >= w[1].created_at));

    let second = svc
        .list_events(&EventFilter {
            cluster_id: Some("c1".to_string()),
            page: 2,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(second.events.len(), 6);
    assert_eq!(second.events.last().unwrap().event_type, EventType::Restarted);

    let stats = svc.get_event_stats("c1", None).await.unwrap();
    assert_eq!(stats.count(EventType::Crashed), 25);
    assert_eq!(stats.count(EventType::Restarted), 1);
    assert_eq!(stats.count(EventType::RestartLimitReached), 0);
    assert_eq!(stats.counts.len(), EventType::ALL.len());
    assert_eq!(stats.total(), 26);
}

#[tokio::test]
async fn test_stats_for_quiet_cluster_are_all_zero() {
    let svc = service(
        Arc::new(MemoryStore::new()),
        Arc::new(RecordingSender::default()),
    );
    let stats = svc
        .get_event_stats("c-quiet", Some(Utc::now() - ChronoDuration::hours(1)))
        .await
        .unwrap();
    assert_eq!(stats.total(), 0);
    assert!(EventType::ALL.iter().all(|t| stats.counts.get(t) == Some(&0)));
}

#[tokio::test]
async fn test_agent_report_details_become_json() {
    let svc = service(
        Arc::new(MemoryStore::new()),
        Arc::new(RecordingSender::default()),
    );
    let mut details = BTreeMap::new();
    details.insert("exit_code".to_string(), "137".to_string());

    let recorded = svc
        .record_event_from_report(ProcessEventReport {
            cluster_id: "c1".to_string(),
            node_id: "n1".to_string(),
            host_id: "host-1".to_string(),
            event_type: EventType::Crashed,
            pid: 77,
            process_name: "seatunnel".to_string(),
            install_dir: "/opt/seatunnel".to_string(),
            role: "hybrid".to_string(),
            details,
            timestamp: None,
        })
        .await
        .unwrap();

    assert!(recorded.id > 0);
    let parsed: serde_json::Value = serde_json::from_str(&recorded.details).unwrap();
    assert_eq!(parsed["exit_code"], "137");
}
