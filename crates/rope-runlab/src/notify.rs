//! Run notifications for presentation layers

use crate::lifecycle::RunState;
use crate::metrics::Metrics;
use crate::types::RunId;
use serde::Serialize;
use tokio::sync::broadcast;

/// Lifecycle and metrics notifications emitted by the engine
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunNotification {
    RunCreated { run_id: RunId, name: String },
    RunStarted { run_id: RunId },
    RunPaused { run_id: RunId, progress: f64 },
    RunResumed { run_id: RunId, progress: f64 },
    RunCompleted { run_id: RunId, metrics: Metrics },
    RunFailed { run_id: RunId, reason: String },
    RunStopped { run_id: RunId },
    RunRemoved { run_id: RunId },
    MetricsUpdated { run_id: RunId, metrics: Metrics },
}

impl RunNotification {
    pub fn run_id(&self) -> RunId {
        match self {
            Self::RunCreated { run_id, .. }
            | Self::RunStarted { run_id }
            | Self::RunPaused { run_id, .. }
            | Self::RunResumed { run_id, .. }
            | Self::RunCompleted { run_id, .. }
            | Self::RunFailed { run_id, .. }
            | Self::RunStopped { run_id }
            | Self::RunRemoved { run_id }
            | Self::MetricsUpdated { run_id, .. } => *run_id,
        }
    }

    /// Terminal state announced by this notification, if any
    pub fn terminal_state(&self) -> Option<RunState> {
        match self {
            Self::RunCompleted { .. } => Some(RunState::Completed),
            Self::RunFailed { .. } => Some(RunState::Failed),
            Self::RunStopped { .. } => Some(RunState::Stopped),
            _ => None,
        }
    }
}

/// Fan-out of notifications; slow subscribers lag rather than block the engine
#[derive(Debug)]
pub struct Notifier {
    tx: broadcast::Sender<RunNotification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunNotification> {
        self.tx.subscribe()
    }

    pub fn publish(&self, notification: RunNotification) {
        // No subscribers is fine
        let _ = self.tx.send(notification);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
