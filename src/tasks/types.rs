//! Task records and the requests that drive them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task lifecycle
///
/// `Pending -> Running -> {Success, Failed, Cancelled, Timeout}`; a task may
/// also go straight from `Pending` to a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
    Timeout,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Success,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
        TaskStatus::Timeout,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Timeout
        )
    }

    /// Only failed and timed-out attempts may be retried
    pub fn is_retryable(self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn can_transition(from: TaskStatus, to: TaskStatus) -> bool {
    match from {
        TaskStatus::Pending => to != TaskStatus::Pending,
        TaskStatus::Running => to != TaskStatus::Pending,
        _ => false,
    }
}

/// One attempt at a host-targeted operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub task_type: String,
    pub host_id: String,
    #[serde(default)]
    pub agent_id: String,
    pub status: TaskStatus,
    /// 0-100, not guaranteed to increase
    pub progress: u8,
    #[serde(default)]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub timeout_secs: u64,
    pub retryable: bool,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_by: String,
    /// Attempt this one retries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

/// Parameters for a new task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub task_type: String,
    pub host_id: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub timeout_secs: u64,
    #[serde(default = "default_retryable")]
    pub retryable: bool,
    /// Falls back to the orchestrator default
    #[serde(default)]
    pub max_retries: Option<u32>,
}

fn default_retryable() -> bool {
    true
}

impl CreateTaskRequest {
    pub fn new(task_type: impl Into<String>, host_id: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            host_id: host_id.into(),
            agent_id: String::new(),
            params: serde_json::Value::Null,
            timeout_secs: 0,
            retryable: true,
            max_retries: None,
        }
    }
}

/// Progress report from the agent executing a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgress {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

/// Filter for [`super::TaskOrchestrator::list_all_tasks`]
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<String>,
    /// 0 means no limit
    pub limit: usize,
}

/// Counts by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub success: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub timeout: usize,
}
