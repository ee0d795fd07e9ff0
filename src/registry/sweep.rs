//! Background Liveness Sweep
//!
//! Long-running task that periodically demotes agents without a recent
//! heartbeat to offline.

use super::RegistryCore;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Shortest sweep period; `interval` rejects zero
pub(crate) const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(1);

/// Handle for controlling the sweep task
pub(crate) struct SweepHandle {
    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,

    /// Task handle
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl SweepHandle {
    /// Spawn the sweep loop
    pub(crate) fn spawn(core: Arc<RegistryCore>, check_interval: Duration) -> Self {
        if check_interval < MIN_CHECK_INTERVAL {
            tracing::warn!(
                "Liveness check interval {:?} too short, using {:?}",
                check_interval,
                MIN_CHECK_INTERVAL
            );
        }
        let check_interval = check_interval.max(MIN_CHECK_INTERVAL);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task_handle = tokio::spawn(run_sweep_loop(core, check_interval, shutdown_rx));

        Self {
            shutdown_tx,
            task_handle: Some(task_handle),
        }
    }

    /// Stop the sweep and wait for the current pass to finish
    pub(crate) async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(());

        if let Some(handle) = self.task_handle.take() {
            if let Err(e) = handle.await {
                tracing::error!("Liveness sweep task ended abnormally: {}", e);
            }
        }

        tracing::info!("Liveness sweep stopped");
    }

    pub(crate) fn is_running(&self) -> bool {
        self.task_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

async fn run_sweep_loop(
    core: Arc<RegistryCore>,
    check_interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut timer = interval(check_interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        "Starting liveness sweep every {:?} (heartbeat timeout {:?})",
        check_interval,
        core.liveness.heartbeat_timeout
    );

    loop {
        tokio::select! {
            _ = timer.tick() => {
                let demoted = core.sweep_stale().await;
                if !demoted.is_empty() {
                    tracing::info!("Liveness sweep marked {} agent(s) offline", demoted.len());
                }
            }

            _ = shutdown_rx.recv() => {
                tracing::debug!("Liveness sweep received shutdown signal");
                break;
            }
        }
    }
}
