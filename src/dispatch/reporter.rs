//! Progress reporting capabilities for command handlers
//!
//! `report` is synchronous and must never block the handler: the channel
//! reporter drops updates when its buffer is full.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Sink for handler progress
pub trait ProgressReporter: Send + Sync {
    fn report(&self, progress: u8, output: &str);
}

/// One progress report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub progress: u8,
    pub output: String,
    pub reported_at: DateTime<Utc>,
}

/// Discards every report
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _progress: u8, _output: &str) {}
}

/// Forwards reports into a bounded channel, dropping them when it is full
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    sender: mpsc::Sender<ProgressUpdate>,
}

impl ChannelReporter {
    /// Create a reporter and the receiving end of its channel
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ProgressUpdate>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl ProgressReporter for ChannelReporter {
    fn report(&self, progress: u8, output: &str) {
        let update = ProgressUpdate {
            progress,
            output: output.to_string(),
            reported_at: Utc::now(),
        };
        if let Err(e) = self.sender.try_send(update) {
            tracing::debug!("Dropping progress update ({}%): {}", progress, e);
        }
    }
}

/// Invokes a callback for every report
pub struct CallbackReporter {
    callback: Box<dyn Fn(u8, &str) + Send + Sync>,
}

impl CallbackReporter {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(u8, &str) + Send + Sync + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }
}

impl ProgressReporter for CallbackReporter {
    fn report(&self, progress: u8, output: &str) {
        (self.callback)(progress, output)
    }
}
