//! Error types for the fleetwatch control plane
//!
//! This module provides comprehensive error handling using thiserror for
//! structured error definitions and anyhow for error propagation at the
//! binary boundary.

use std::time::Duration;
use thiserror::Error;

/// Main error type for fleetwatch operations
#[derive(Error, Debug)]
pub enum FleetError {
    /// Unknown agent, task, config or event
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Command handler exceeded its deadline
    #[error("Command timed out after {0:?}")]
    CommandTimeout(Duration),

    /// Caller cancelled the operation
    #[error("Command cancelled")]
    Cancelled,

    /// No handler registered for the command type
    #[error("No handler registered for command type: {0}")]
    HandlerNotRegistered(String),

    /// Command handler panicked
    #[error("Command handler panicked: {0}")]
    HandlerPanicked(String),

    /// Command handler returned an error
    #[error("Command handler failed: {0}")]
    HandlerFailed(String),

    /// Config update field outside its allowed range
    #[error("{field} must be between {min} and {max}, got {value}")]
    ValidationOutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    /// Task already retried the allowed number of times
    #[error("Task {task_id} exceeded max retries ({max_retries})")]
    MaxRetriesExceeded { task_id: String, max_retries: u32 },

    /// Malformed request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// State machine rejected the transition
    #[error("Invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    /// External collaborator (host inventory, agent transport) failed
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl FleetError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        FleetError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FleetError::NotFound { .. })
    }
}

/// Result type alias for fleetwatch operations
pub type Result<T> = std::result::Result<T, FleetError>;

/// Convert anyhow::Error to FleetError
impl From<anyhow::Error> for FleetError {
    fn from(err: anyhow::Error) -> Self {
        FleetError::Other(err.to_string())
    }
}

impl From<rusqlite::Error> for FleetError {
    fn from(err: rusqlite::Error) -> Self {
        FleetError::Database(err.to_string())
    }
}

impl From<toml::de::Error> for FleetError {
    fn from(err: toml::de::Error) -> Self {
        FleetError::Config(err.to_string())
    }
}
