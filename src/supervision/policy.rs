//! Per-cluster auto-restart policy

use crate::error::{FleetError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MONITOR_INTERVAL: i64 = 5;
pub const DEFAULT_RESTART_DELAY: i64 = 10;
pub const DEFAULT_MAX_RESTARTS: i64 = 3;
pub const DEFAULT_TIME_WINDOW: i64 = 300;
pub const DEFAULT_COOLDOWN_PERIOD: i64 = 1800;

/// Inclusive bounds for each tunable
pub const MONITOR_INTERVAL_RANGE: (i64, i64) = (1, 60);
pub const RESTART_DELAY_RANGE: (i64, i64) = (1, 300);
pub const MAX_RESTARTS_RANGE: (i64, i64) = (1, 10);
pub const TIME_WINDOW_RANGE: (i64, i64) = (60, 3600);
pub const COOLDOWN_PERIOD_RANGE: (i64, i64) = (60, 86_400);

/// Auto-restart policy pushed to every agent of a cluster
///
/// Durations are whole seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub cluster_id: String,
    pub auto_monitor: bool,
    pub auto_restart: bool,
    pub monitor_interval_secs: i64,
    pub restart_delay_secs: i64,
    /// Restarts allowed within `time_window_secs`
    pub max_restarts: i64,
    pub time_window_secs: i64,
    /// Pause after hitting the restart limit
    pub cooldown_period_secs: i64,
    /// Bumped by exactly one on every accepted update
    pub config_version: i64,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MonitorConfig {
    pub fn new(cluster_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            cluster_id: cluster_id.into(),
            auto_monitor: true,
            auto_restart: true,
            monitor_interval_secs: DEFAULT_MONITOR_INTERVAL,
            restart_delay_secs: DEFAULT_RESTART_DELAY,
            max_restarts: DEFAULT_MAX_RESTARTS,
            time_window_secs: DEFAULT_TIME_WINDOW,
            cooldown_period_secs: DEFAULT_COOLDOWN_PERIOD,
            config_version: 1,
            last_sync_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Reset non-positive numeric fields to their defaults
    ///
    /// Rows written before a field existed come back as zero. Returns whether
    /// anything changed so the caller knows to persist.
    pub fn heal(&mut self) -> bool {
        let mut healed = false;
        for (field, default) in [
            (&mut self.monitor_interval_secs, DEFAULT_MONITOR_INTERVAL),
            (&mut self.restart_delay_secs, DEFAULT_RESTART_DELAY),
            (&mut self.max_restarts, DEFAULT_MAX_RESTARTS),
            (&mut self.time_window_secs, DEFAULT_TIME_WINDOW),
            (&mut self.cooldown_period_secs, DEFAULT_COOLDOWN_PERIOD),
            (&mut self.config_version, 1),
        ] {
            if *field <= 0 {
                *field = default;
                healed = true;
            }
        }
        healed
    }
}

/// Partial update; absent fields are left alone
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfigUpdate {
    #[serde(default)]
    pub auto_monitor: Option<bool>,
    #[serde(default)]
    pub auto_restart: Option<bool>,
    #[serde(default)]
    pub monitor_interval_secs: Option<i64>,
    #[serde(default)]
    pub restart_delay_secs: Option<i64>,
    #[serde(default)]
    pub max_restarts: Option<i64>,
    #[serde(default)]
    pub time_window_secs: Option<i64>,
    #[serde(default)]
    pub cooldown_period_secs: Option<i64>,
}

impl MonitorConfigUpdate {
    /// Check every present field, failing on the first one out of range
    pub fn validate(&self) -> Result<()> {
        check_range("monitor_interval", self.monitor_interval_secs, MONITOR_INTERVAL_RANGE)?;
        check_range("restart_delay", self.restart_delay_secs, RESTART_DELAY_RANGE)?;
        check_range("max_restarts", self.max_restarts, MAX_RESTARTS_RANGE)?;
        check_range("time_window", self.time_window_secs, TIME_WINDOW_RANGE)?;
        check_range("cooldown_period", self.cooldown_period_secs, COOLDOWN_PERIOD_RANGE)?;
        Ok(())
    }

    /// Copy present fields onto `config` and bump its version
    ///
    /// Call [`validate`](Self::validate) first.
    pub fn apply_to(&self, config: &mut MonitorConfig) {
        if let Some(v) = self.auto_monitor {
            config.auto_monitor = v;
        }
        if let Some(v) = self.auto_restart {
            config.auto_restart = v;
        }
        if let Some(v) = self.monitor_interval_secs {
            config.monitor_interval_secs = v;
        }
        if let Some(v) = self.restart_delay_secs {
            config.restart_delay_secs = v;
        }
        if let Some(v) = self.max_restarts {
            config.max_restarts = v;
        }
        if let Some(v) = self.time_window_secs {
            config.time_window_secs = v;
        }
        if let Some(v) = self.cooldown_period_secs {
            config.cooldown_period_secs = v;
        }
        config.config_version += 1;
        config.updated_at = Utc::now();
    }
}

fn check_range(field: &'static str, value: Option<i64>, (min, max): (i64, i64)) -> Result<()> {
    match value {
        Some(value) if value < min || value > max => Err(FleetError::ValidationOutOfRange {
            field,
            value,
            min,
            max,
        }),
        _ => Ok(()),
    }
}
