//! Fleetwatch - Agent Fleet Supervision
//!
//! Control plane core for a fleet of remote agents that run data-integration
//! engine processes:
//! - Connection registry with heartbeat-based liveness
//! - Command dispatch with per-command deadlines
//! - Retryable task tracking with progress subscriptions
//! - Per-cluster auto-restart policy, pushed to agents, plus an event ledger
//!
//! # Architecture
//!
//! - **registry**: Agent connections and the liveness sweep
//! - **dispatch**: Single-shot commands routed to registered handlers
//! - **tasks**: Task state machine, retries, cleanup
//! - **supervision**: Monitor config, fan-out, process events
//! - **storage**: Config and event persistence (memory, SQLite)
//! - **control_plane**: Composition root owning all of the above
//!
//! # Example
//!
//! ```ignore
//! use fleetwatch_core::{ControlPlane, FleetConfig, RegisterRequest};
//!
//! #[tokio::main]
//! async fn main() -> fleetwatch_core::Result<()> {
//!     let plane = ControlPlane::standalone(FleetConfig::default()).await?;
//!     plane.start().await;
//!
//!     plane.registry().register(RegisterRequest {
//!         agent_id: "agent-1".to_string(),
//!         ip_address: "10.0.0.7".to_string(),
//!         ..Default::default()
//!     }).await?;
//!
//!     plane.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod control_plane;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod registry;
pub mod standalone;
pub mod storage;
pub mod supervision;
pub mod tasks;

// Re-export commonly used types
pub use config::FleetConfig;
pub use control_plane::{Collaborators, ControlPlane};
pub use dispatch::{
    handler_fn, CommandDispatcher, CommandHandler, CommandRequest, CommandResponse, DispatchError,
    ProgressReporter,
};
pub use error::{FleetError, Result};
pub use registry::{
    AgentConnection, ConnectionRegistry, ConnectionStatus, HeartbeatRequest, HostStatusUpdater,
    RegisterRequest,
};
pub use storage::{MemoryStore, SqliteStore, SupervisionStore};
pub use supervision::{
    AgentConfigSender, ClusterNodeProvider, MonitorConfig, MonitorConfigUpdate,
    SupervisionConfigService,
};
pub use tasks::{CreateTaskRequest, Task, TaskOrchestrator, TaskStatus};
