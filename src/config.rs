//! Configuration for the fleetwatch control plane
//!
//! # Configuration File Format
//!
//! TOML format in `fleetwatch.toml`:
//!
//! ```toml
//! [registry]
//! heartbeat_timeout_secs = 30
//! check_interval_secs = 10
//!
//! [dispatcher]
//! default_timeout_secs = 300
//!
//! [tasks]
//! cleanup_interval_secs = 3600
//! max_task_age_secs = 86400
//! default_max_retries = 3
//!
//! [storage]
//! db_path = "/var/lib/fleetwatch/fleetwatch.db"
//! pool_size = 8
//!
//! [[clusters]]
//! id = "prod-etl"
//!
//! [[clusters.nodes]]
//! node_id = "node-1"
//! host_id = "host-1"
//! agent_id = "agent-1"
//! install_dir = "/opt/seatunnel"
//! role = "hybrid"
//! ```

use crate::error::{FleetError, Result};
use crate::supervision::ClusterNode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete control plane configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Connection registry settings
    #[serde(default)]
    pub registry: RegistrySettings,

    /// Command dispatcher settings
    #[serde(default)]
    pub dispatcher: DispatcherSettings,

    /// Task orchestrator settings
    #[serde(default)]
    pub tasks: TaskSettings,

    /// Persistence settings
    #[serde(default)]
    pub storage: StorageSettings,

    /// Static cluster inventory (standalone mode)
    #[serde(default)]
    pub clusters: Vec<ClusterInventory>,
}

/// Liveness settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Agents silent for longer than this are considered offline
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,

    /// Period of the liveness sweep
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            check_interval_secs: default_check_interval(),
        }
    }
}

impl RegistrySettings {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherSettings {
    /// Deadline applied when a command carries no timeout of its own
    #[serde(default = "default_command_timeout")]
    pub default_timeout_secs: u64,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_command_timeout(),
        }
    }
}

impl DispatcherSettings {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSettings {
    /// How often terminal tasks are swept
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Terminal tasks older than this are removed
    #[serde(default = "default_max_task_age")]
    pub max_task_age_secs: u64,

    /// Retry budget for tasks that don't specify one
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: default_cleanup_interval(),
            max_task_age_secs: default_max_task_age(),
            default_max_retries: default_max_retries(),
        }
    }
}

impl TaskSettings {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn max_task_age(&self) -> Duration {
        Duration::from_secs(self.max_task_age_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// SQLite database file
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Maximum pooled connections
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Keep configs and events in memory only
    #[serde(default)]
    pub in_memory: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            pool_size: default_pool_size(),
            in_memory: false,
        }
    }
}

/// One cluster of the static inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterInventory {
    pub id: String,

    #[serde(default)]
    pub nodes: Vec<ClusterNode>,
}

fn default_heartbeat_timeout() -> u64 {
    30
}

fn default_check_interval() -> u64 {
    10
}

fn default_command_timeout() -> u64 {
    300
}

fn default_cleanup_interval() -> u64 {
    3600
}

fn default_max_task_age() -> u64 {
    86_400
}

fn default_max_retries() -> u32 {
    3
}

fn default_pool_size() -> usize {
    8
}

/// Get the default database path using XDG_DATA_HOME standard
fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fleetwatch")
        .join("fleetwatch.db")
}

impl FleetConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            FleetError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: FleetConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| FleetError::Config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the background loops can't run with
    pub fn validate(&self) -> Result<()> {
        if self.registry.check_interval_secs == 0 {
            return Err(FleetError::Config(
                "registry.check_interval_secs must be positive".to_string(),
            ));
        }
        if self.registry.heartbeat_timeout_secs == 0 {
            return Err(FleetError::Config(
                "registry.heartbeat_timeout_secs must be positive".to_string(),
            ));
        }
        if self.tasks.cleanup_interval_secs == 0 {
            return Err(FleetError::Config(
                "tasks.cleanup_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Default config path (`FLEETWATCH_CONFIG` or `./fleetwatch.toml`)
    pub fn default_path() -> PathBuf {
        std::env::var("FLEETWATCH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("fleetwatch.toml"))
    }
}
