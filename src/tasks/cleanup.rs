//! Periodic removal of finished tasks

use super::TaskOrchestrator;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Shortest period the loop will run with; `interval` rejects zero
pub const MIN_CLEANUP_INTERVAL: Duration = Duration::from_millis(1);

/// Handle for controlling the task cleanup loop
pub struct TaskCleanupHandle {
    shutdown_tx: broadcast::Sender<()>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl TaskCleanupHandle {
    /// Spawn a loop that drops tasks finished more than `max_age` ago
    pub fn spawn(
        orchestrator: Arc<TaskOrchestrator>,
        cleanup_interval: Duration,
        max_age: Duration,
    ) -> Self {
        if cleanup_interval < MIN_CLEANUP_INTERVAL {
            tracing::warn!(
                "Task cleanup interval {:?} too short, using {:?}",
                cleanup_interval,
                MIN_CLEANUP_INTERVAL
            );
        }
        let cleanup_interval = cleanup_interval.max(MIN_CLEANUP_INTERVAL);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task_handle = tokio::spawn(run_cleanup_loop(
            orchestrator,
            cleanup_interval,
            max_age,
            shutdown_rx,
        ));

        Self {
            shutdown_tx,
            task_handle: Some(task_handle),
        }
    }

    pub async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(());

        if let Some(handle) = self.task_handle.take() {
            if let Err(e) = handle.await {
                tracing::error!("Task cleanup loop ended abnormally: {}", e);
            }
        }

        tracing::info!("Task cleanup stopped");
    }

    pub fn is_running(&self) -> bool {
        self.task_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

async fn run_cleanup_loop(
    orchestrator: Arc<TaskOrchestrator>,
    cleanup_interval: Duration,
    max_age: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut timer = interval(cleanup_interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately; nothing can be old enough yet
    timer.tick().await;

    loop {
        tokio::select! {
            _ = timer.tick() => {
                orchestrator.cleanup_old_tasks(max_age).await;
            }

            _ = shutdown_rx.recv() => {
                tracing::debug!("Task cleanup received shutdown signal");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{CreateTaskRequest, TaskStatus};

    #[tokio::test]
    async fn test_cleanup_loop_removes_finished_tasks() {
        let orchestrator = Arc::new(TaskOrchestrator::new());
        let task = orchestrator
            .create_task(CreateTaskRequest::new("install", "host-1"), "op")
            .await
            .unwrap();
        orchestrator.cancel_task(&task.id).await.unwrap();

        let mut handle = TaskCleanupHandle::spawn(
            orchestrator.clone(),
            Duration::from_millis(10),
            Duration::from_millis(1),
        );
        assert!(handle.is_running());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(orchestrator.get_task(&task.id).await.is_err());

        handle.stop().await;
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_cleanup_loop_spares_active_tasks() {
        let orchestrator = Arc::new(TaskOrchestrator::new());
        let task = orchestrator
            .create_task(CreateTaskRequest::new("install", "host-1"), "op")
            .await
            .unwrap();

        let mut handle = TaskCleanupHandle::spawn(
            orchestrator.clone(),
            Duration::from_millis(10),
            Duration::from_millis(1),
        );
        tokio::time::sleep(Duration::from_millis(40)).await;
        handle.stop().await;

        assert_eq!(
            orchestrator.get_task(&task.id).await.unwrap().status,
            TaskStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_zero_interval_is_clamped() {
        let orchestrator = Arc::new(TaskOrchestrator::new());
        let mut handle =
            TaskCleanupHandle::spawn(orchestrator, Duration::ZERO, Duration::from_secs(60));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.is_running());
        handle.stop().await;
    }
}
