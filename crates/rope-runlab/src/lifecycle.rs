//! Run lifecycle state machine
//!
//! ```text
//!   Draft ──start──► Running ◄──resume── Paused
//!     │                │ │ └───pause────►  │
//!     │                │ └─complete─► Completed
//!     │                └─fail─────► Failed
//!     └──────stop──────┴──────stop───────┴──► Stopped
//! ```
//!
//! `Completed`, `Failed` and `Stopped` are absorbing.

use crate::clock::millis_between;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Draft,
    Running,
    Paused,
    Completed,
    Failed,
    Stopped,
}

/// Operations that move a run between states
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Start,
    Pause,
    Resume,
    Complete,
    Fail,
    Stop,
    /// Registry removal; not a state change, legal only once terminal
    Remove,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed | RunState::Stopped)
    }

    /// Whether the run occupies an active-run slot
    pub fn is_active(self) -> bool {
        matches!(self, RunState::Running | RunState::Paused)
    }

    pub fn accepts_events(self) -> bool {
        self == RunState::Running
    }

    /// State reached by applying `transition`, or `None` when illegal
    pub fn apply(self, transition: Transition) -> Option<RunState> {
        use RunState::*;
        use Transition::*;

        match (self, transition) {
            (Draft, Start) => Some(Running),
            (Running, Pause) => Some(Paused),
            (Paused, Resume) => Some(Running),
            (Running, Complete) => Some(Completed),
            (Running, Fail) => Some(Failed),
            (Draft | Running | Paused, Stop) => Some(Stopped),
            _ => None,
        }
    }

    pub fn permits(self, transition: Transition) -> bool {
        match transition {
            Transition::Remove => self.is_terminal(),
            other => self.apply(other).is_some(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Draft => "draft",
            RunState::Running => "running",
            RunState::Paused => "paused",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Transition::Start => "start",
            Transition::Pause => "pause",
            Transition::Resume => "resume",
            Transition::Complete => "complete",
            Transition::Fail => "fail",
            Transition::Stop => "stop",
            Transition::Remove => "remove",
        };
        f.write_str(s)
    }
}

/// Accumulates time spent in `Running`, excluding paused intervals
#[derive(Debug, Clone, Default)]
pub struct RunTimer {
    accumulated_ms: i64,
    running_since: Option<DateTime<Utc>>,
}

impl RunTimer {
    /// Begin (or continue) counting from `now`
    pub fn resume(&mut self, now: DateTime<Utc>) {
        if self.running_since.is_none() {
            self.running_since = Some(now);
        }
    }

    /// Stop counting; elapsed time so far is kept
    pub fn freeze(&mut self, now: DateTime<Utc>) {
        if let Some(since) = self.running_since.take() {
            self.accumulated_ms += millis_between(since, now);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    pub fn active_millis(&self, now: DateTime<Utc>) -> i64 {
        self.accumulated_ms
            + self
                .running_since
                .map(|since| millis_between(since, now))
                .unwrap_or(0)
    }

    /// Active time over the configured duration, clamped to 1.0
    pub fn progress(&self, now: DateTime<Utc>, duration_secs: u64) -> f64 {
        if duration_secs == 0 {
            return 1.0;
        }
        let total_ms = duration_secs as f64 * 1000.0;
        (self.active_millis(now) as f64 / total_ms).clamp(0.0, 1.0)
    }
}
