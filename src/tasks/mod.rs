//! Task Orchestrator
//!
//! Tracks long-running, host-targeted operations as a retryable state
//! machine. How an attempt actually executes is up to the caller; the
//! orchestrator only records transitions reported to it.
//!
//! Retrying never touches the failed attempt. It creates a sibling task with
//! `retry_count + 1` and a `parent_id` pointing back, so the attempt history
//! is an append-only chain.
//!
//! Subscribers get a per-subscriber unbounded channel. Delivery is
//! best-effort and at-most-once: snapshots sent to a dropped receiver are
//! lost, and a subscriber registered after a transition does not see it.

mod cleanup;
mod types;

pub use cleanup::TaskCleanupHandle;
pub use types::{
    can_transition, CreateTaskRequest, Task, TaskFilter, TaskProgress, TaskStats, TaskStatus,
};

use crate::error::{FleetError, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Default retry budget
pub const DEFAULT_MAX_RETRIES: u32 = 3;

type Subscriber = mpsc::UnboundedSender<Task>;

#[derive(Default)]
struct TaskTable {
    tasks: HashMap<String, Task>,
    /// host ID -> task IDs targeting it
    by_host: HashMap<String, Vec<String>>,
    subscribers: HashMap<String, Vec<Subscriber>>,
}

impl TaskTable {
    fn insert(&mut self, task: Task) {
        self.by_host
            .entry(task.host_id.clone())
            .or_default()
            .push(task.id.clone());
        self.tasks.insert(task.id.clone(), task);
    }

    fn remove(&mut self, task_id: &str) -> Option<Task> {
        let task = self.tasks.remove(task_id)?;
        if let Some(ids) = self.by_host.get_mut(&task.host_id) {
            ids.retain(|id| id != task_id);
            if ids.is_empty() {
                self.by_host.remove(&task.host_id);
            }
        }
        self.subscribers.remove(task_id);
        Some(task)
    }

    fn get(&self, task_id: &str) -> Result<&Task> {
        self.tasks
            .get(task_id)
            .ok_or_else(|| FleetError::not_found("task", task_id))
    }

    fn get_mut(&mut self, task_id: &str) -> Result<&mut Task> {
        self.tasks
            .get_mut(task_id)
            .ok_or_else(|| FleetError::not_found("task", task_id))
    }

    /// Subscribers to notify about a transition
    ///
    /// Terminal transitions hand over the whole list so the channels close
    /// once the final snapshot is delivered.
    fn take_subscribers(&mut self, task: &Task) -> Vec<Subscriber> {
        if task.status.is_terminal() {
            self.subscribers.remove(&task.id).unwrap_or_default()
        } else {
            match self.subscribers.get_mut(&task.id) {
                Some(subs) => {
                    subs.retain(|s| !s.is_closed());
                    subs.clone()
                }
                None => Vec::new(),
            }
        }
    }
}

/// Thread-safe task state machine
pub struct TaskOrchestrator {
    table: RwLock<TaskTable>,
    default_max_retries: u32,
}

impl TaskOrchestrator {
    pub fn new() -> Self {
        Self::with_default_max_retries(DEFAULT_MAX_RETRIES)
    }

    pub fn with_default_max_retries(default_max_retries: u32) -> Self {
        Self {
            table: RwLock::new(TaskTable::default()),
            default_max_retries,
        }
    }

    /// Create a pending task
    pub async fn create_task(&self, req: CreateTaskRequest, created_by: &str) -> Result<Task> {
        if req.task_type.is_empty() {
            return Err(FleetError::InvalidRequest("task_type is required".to_string()));
        }
        if req.host_id.is_empty() {
            return Err(FleetError::InvalidRequest("host_id is required".to_string()));
        }

        let task = Task {
            id: uuid::Uuid::new_v4().to_string(),
            task_type: req.task_type,
            host_id: req.host_id,
            agent_id: req.agent_id,
            status: TaskStatus::Pending,
            progress: 0,
            message: String::new(),
            error: None,
            params: req.params,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            timeout_secs: req.timeout_secs,
            retryable: req.retryable,
            retry_count: 0,
            max_retries: req.max_retries.unwrap_or(self.default_max_retries),
            created_by: created_by.to_string(),
            parent_id: None,
        };

        self.table.write().await.insert(task.clone());
        info!(
            "Created task {} ({}) for host {}",
            task.id, task.task_type, task.host_id
        );
        Ok(task)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Task> {
        self.table.read().await.get(task_id).cloned()
    }

    /// Move a pending task to running
    ///
    /// Starting a task that is not pending is rejected rather than re-run.
    pub async fn start_task(&self, task_id: &str) -> Result<Task> {
        let (task, subscribers) = {
            let mut table = self.table.write().await;
            let task = table.get_mut(task_id)?;
            if task.status != TaskStatus::Pending {
                return Err(FleetError::InvalidTransition {
                    id: task_id.to_string(),
                    from: task.status.to_string(),
                    to: TaskStatus::Running.to_string(),
                });
            }
            task.status = TaskStatus::Running;
            task.started_at = Some(Utc::now());
            let task = task.clone();
            let subscribers = table.take_subscribers(&task);
            (task, subscribers)
        };

        debug!("Task {} started", task_id);
        notify(&task, subscribers);
        Ok(task)
    }

    /// Apply an agent-reported progress update
    ///
    /// Reports for a task that already finished are ignored and the stored
    /// task is returned unchanged. Progress is taken as reported, even if it
    /// goes backwards.
    pub async fn update_progress(&self, update: TaskProgress) -> Result<Task> {
        let (task, subscribers) = {
            let mut table = self.table.write().await;
            let task = table.get_mut(&update.task_id)?;

            if task.status.is_terminal() {
                debug!(
                    "Ignoring progress for finished task {} ({})",
                    task.id, task.status
                );
                return Ok(task.clone());
            }
            if !can_transition(task.status, update.status) {
                return Err(FleetError::InvalidTransition {
                    id: task.id.clone(),
                    from: task.status.to_string(),
                    to: update.status.to_string(),
                });
            }

            let now = Utc::now();
            task.status = update.status;
            task.progress = update.progress.min(100);
            task.message = update.message;
            task.error = update.error;
            if update.result.is_some() {
                task.result = update.result;
            }
            if task.status != TaskStatus::Pending && task.started_at.is_none() {
                task.started_at = Some(now);
            }
            if task.status.is_terminal() {
                task.completed_at = Some(now);
            }

            let task = task.clone();
            let subscribers = table.take_subscribers(&task);
            (task, subscribers)
        };

        if task.status.is_terminal() {
            info!("Task {} finished: {}", task.id, task.status);
        }
        notify(&task, subscribers);
        Ok(task)
    }

    /// Cancel a pending or running task; finished tasks are returned unchanged
    pub async fn cancel_task(&self, task_id: &str) -> Result<Task> {
        let (task, subscribers) = {
            let mut table = self.table.write().await;
            let task = table.get_mut(task_id)?;
            if task.status.is_terminal() {
                return Ok(task.clone());
            }
            task.status = TaskStatus::Cancelled;
            task.completed_at = Some(Utc::now());
            let task = task.clone();
            let subscribers = table.take_subscribers(&task);
            (task, subscribers)
        };

        info!("Task {} cancelled", task_id);
        notify(&task, subscribers);
        Ok(task)
    }

    /// Create the next attempt of a failed or timed-out task
    pub async fn retry_task(&self, task_id: &str) -> Result<Task> {
        let retry = {
            let mut table = self.table.write().await;
            let original = table.get(task_id)?;

            if !original.status.is_retryable() {
                return Err(FleetError::InvalidTransition {
                    id: task_id.to_string(),
                    from: original.status.to_string(),
                    to: "retry".to_string(),
                });
            }
            if !original.retryable {
                return Err(FleetError::InvalidRequest(format!(
                    "task {} is not retryable",
                    task_id
                )));
            }
            if original.retry_count >= original.max_retries {
                return Err(FleetError::MaxRetriesExceeded {
                    task_id: task_id.to_string(),
                    max_retries: original.max_retries,
                });
            }

            let retry = Task {
                id: uuid::Uuid::new_v4().to_string(),
                task_type: original.task_type.clone(),
                host_id: original.host_id.clone(),
                agent_id: original.agent_id.clone(),
                status: TaskStatus::Pending,
                progress: 0,
                message: String::new(),
                error: None,
                params: original.params.clone(),
                result: None,
                created_at: Utc::now(),
                started_at: None,
                completed_at: None,
                timeout_secs: original.timeout_secs,
                retryable: original.retryable,
                retry_count: original.retry_count + 1,
                max_retries: original.max_retries,
                created_by: original.created_by.clone(),
                parent_id: Some(original.id.clone()),
            };
            table.insert(retry.clone());
            retry
        };

        info!(
            "Task {} retried as {} (attempt {}/{})",
            task_id, retry.id, retry.retry_count, retry.max_retries
        );
        Ok(retry)
    }

    /// Attempts leading to `task_id`, oldest first
    ///
    /// Stops early if an ancestor has already been cleaned up.
    pub async fn attempt_chain(&self, task_id: &str) -> Result<Vec<Task>> {
        let table = self.table.read().await;
        let mut chain = vec![table.get(task_id)?.clone()];
        while let Some(parent_id) = chain.last().and_then(|t| t.parent_id.clone()) {
            match table.tasks.get(&parent_id) {
                Some(parent) => chain.push(parent.clone()),
                None => break,
            }
        }
        chain.reverse();
        Ok(chain)
    }

    /// Tasks targeting a host, newest first
    pub async fn list_tasks(&self, host_id: &str, limit: usize) -> Vec<Task> {
        let table = self.table.read().await;
        let tasks = table
            .by_host
            .get(host_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| table.tasks.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        newest_first(tasks, limit)
    }

    /// All tasks matching the filter, newest first
    pub async fn list_all_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
        let table = self.table.read().await;
        let tasks = table
            .tasks
            .values()
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .filter(|t| {
                filter
                    .task_type
                    .as_deref()
                    .map_or(true, |ty| t.task_type == ty)
            })
            .cloned()
            .collect();
        newest_first(tasks, filter.limit)
    }

    /// Receive a snapshot after every transition of `task_id`
    ///
    /// The channel closes after the terminal snapshot. Subscribing to a task
    /// that already finished yields its final snapshot and then closes.
    pub async fn subscribe(&self, task_id: &str) -> Result<mpsc::UnboundedReceiver<Task>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut table = self.table.write().await;
        let task = table.get(task_id)?;
        if task.status.is_terminal() {
            let _ = tx.send(task.clone());
        } else {
            table
                .subscribers
                .entry(task_id.to_string())
                .or_default()
                .push(tx);
        }
        Ok(rx)
    }

    /// Run `callback` for every transition of `task_id`
    ///
    /// Each callback gets its own task; a panicking callback is logged and
    /// never reaches the orchestrator or its caller.
    pub async fn on_progress<F>(&self, task_id: &str, callback: F) -> Result<()>
    where
        F: Fn(Task) + Send + Sync + 'static,
    {
        let mut rx = self.subscribe(task_id).await?;
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            while let Some(snapshot) = rx.recv().await {
                if catch_unwind(AssertUnwindSafe(|| callback(snapshot))).is_err() {
                    warn!("Progress callback for task {} panicked", task_id);
                }
            }
        });
        Ok(())
    }

    /// Drop finished tasks completed more than `max_age` ago
    ///
    /// Every terminal status is eligible. Returns the number removed.
    pub async fn cleanup_old_tasks(&self, max_age: Duration) -> usize {
        let cutoff = match chrono::Duration::from_std(max_age) {
            Ok(age) => Utc::now() - age,
            Err(_) => return 0,
        };

        let mut table = self.table.write().await;
        let expired: Vec<String> = table
            .tasks
            .values()
            .filter(|t| t.status.is_terminal())
            .filter(|t| t.completed_at.map_or(false, |at| at < cutoff))
            .map(|t| t.id.clone())
            .collect();

        for id in &expired {
            table.remove(id);
        }

        if !expired.is_empty() {
            info!("Cleaned up {} finished task(s)", expired.len());
        }
        expired.len()
    }

    pub async fn stats(&self) -> TaskStats {
        let table = self.table.read().await;
        let mut stats = TaskStats {
            total: table.tasks.len(),
            ..Default::default()
        };
        for task in table.tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Success => stats.success += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
                TaskStatus::Timeout => stats.timeout += 1,
            }
        }
        stats
    }
}

impl Default for TaskOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

fn notify(task: &Task, subscribers: Vec<Subscriber>) {
    for subscriber in subscribers {
        // Receiver gone: nothing to deliver
        let _ = subscriber.send(task.clone());
    }
}

fn newest_first(mut tasks: Vec<Task>, limit: usize) -> Vec<Task> {
    tasks.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    if limit > 0 {
        tasks.truncate(limit);
    }
    tasks
}
