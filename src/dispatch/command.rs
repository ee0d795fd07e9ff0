//! Command request/response envelopes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a single command attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Pending,
    Running,
    Success,
    Failed,
}

/// An operation to run against an agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command_id: String,
    pub command_type: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
    /// Deadline in seconds; 0 uses the dispatcher default
    #[serde(default)]
    pub timeout_secs: u64,
}

impl CommandRequest {
    pub fn new(command_id: impl Into<String>, command_type: impl Into<String>) -> Self {
        Self {
            command_id: command_id.into(),
            command_type: command_type.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Outcome of a command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub command_id: String,
    pub status: CommandStatus,
    pub progress: u8,
    #[serde(default)]
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CommandResponse {
    pub fn success(command_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            command_id: command_id.into(),
            status: CommandStatus::Success,
            progress: 100,
            output: output.into(),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(command_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            command_id: command_id.into(),
            status: CommandStatus::Failed,
            progress: 0,
            output: String::new(),
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}

/// Execution context handed to a handler
///
/// The token is cancelled when the deadline passes or the caller gives up;
/// long-running handlers should watch it.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub command_id: String,
    pub deadline: Instant,
    cancel: CancellationToken,
}

impl CommandContext {
    pub(crate) fn new(command_id: String, deadline: Instant, cancel: CancellationToken) -> Self {
        Self {
            command_id,
            deadline,
            cancel,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the command is cancelled or times out
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn remaining(&self) -> std::time::Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}
