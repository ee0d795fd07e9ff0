//! Process lifecycle event ledger types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Started,
    Stopped,
    Crashed,
    Restarted,
    RestartFailed,
    RestartLimitReached,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        EventType::Started,
        EventType::Stopped,
        EventType::Crashed,
        EventType::Restarted,
        EventType::RestartFailed,
        EventType::RestartLimitReached,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Started => "started",
            EventType::Stopped => "stopped",
            EventType::Crashed => "crashed",
            EventType::Restarted => "restarted",
            EventType::RestartFailed => "restart_failed",
            EventType::RestartLimitReached => "restart_limit_reached",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessEvent {
    /// Assigned by the store on insert
    pub id: i64,
    pub cluster_id: String,
    pub node_id: String,
    pub host_id: String,
    pub event_type: EventType,
    pub pid: i64,
    pub process_name: String,
    pub install_dir: String,
    pub role: String,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

/// Event as reported by an agent
///
/// Agents send details as structured data and may omit the timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessEventReport {
    pub cluster_id: String,
    pub node_id: String,
    #[serde(default)]
    pub host_id: String,
    pub event_type: EventType,
    #[serde(default)]
    pub pid: i64,
    #[serde(default)]
    pub process_name: String,
    #[serde(default)]
    pub install_dir: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ProcessEventReport {
    pub fn into_event(self) -> ProcessEvent {
        let details = if self.details.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&self.details).unwrap_or_default()
        };
        ProcessEvent {
            id: 0,
            cluster_id: self.cluster_id,
            node_id: self.node_id,
            host_id: self.host_id,
            event_type: self.event_type,
            pid: self.pid,
            process_name: self.process_name,
            install_dir: self.install_dir,
            role: self.role,
            details,
            created_at: self.timestamp.unwrap_or_else(Utc::now),
        }
    }
}

/// Ledger query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    pub cluster_id: Option<String>,
    pub node_id: Option<String>,
    pub host_id: Option<String>,
    pub event_type: Option<EventType>,
    /// Inclusive lower bound
    pub start_time: Option<DateTime<Utc>>,
    /// Exclusive upper bound
    pub end_time: Option<DateTime<Utc>>,
    /// 1-based; 0 means the first page
    pub page: u32,
    /// Clamped to 1..=100; 0 means the default of 20
    pub page_size: u32,
}

impl EventFilter {
    /// Same filter with paging defaults applied and clamped
    pub fn normalized(&self) -> Self {
        let mut filter = self.clone();
        filter.page = filter.page.max(1);
        filter.page_size = match filter.page_size {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        };
        filter
    }

    /// Rows to skip for the current page
    pub fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1) * self.page_size as usize
    }

    pub fn matches(&self, event: &ProcessEvent) -> bool {
        self.cluster_id
            .as_deref()
            .map_or(true, |c| event.cluster_id == c)
            && self.node_id.as_deref().map_or(true, |n| event.node_id == n)
            && self.host_id.as_deref().map_or(true, |h| event.host_id == h)
            && self.event_type.map_or(true, |t| event.event_type == t)
            && self.start_time.map_or(true, |t| event.created_at >= t)
            && self.end_time.map_or(true, |t| event.created_at < t)
    }
}

/// One page of events, newest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPage {
    pub events: Vec<ProcessEvent>,
    /// Matches across all pages
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// Event counts for a cluster; every type is present
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventStats {
    pub cluster_id: String,
    pub since: Option<DateTime<Utc>>,
    pub counts: BTreeMap<EventType, u64>,
}

impl EventStats {
    /// Zero-fill every type, then add the stored counts
    pub fn from_counts(
        cluster_id: &str,
        since: Option<DateTime<Utc>>,
        counts: impl IntoIterator<Item = (EventType, u64)>,
    ) -> Self {
        let mut all: BTreeMap<EventType, u64> =
            EventType::ALL.into_iter().map(|t| (t, 0)).collect();
        for (event_type, count) in counts {
            *all.entry(event_type).or_insert(0) += count;
        }
        Self {
            cluster_id: cluster_id.to_string(),
            since,
            counts: all,
        }
    }

    pub fn count(&self, event_type: EventType) -> u64 {
        self.counts.get(&event_type).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}
