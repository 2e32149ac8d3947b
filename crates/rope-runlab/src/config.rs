//! Engine configuration

use crate::error::{EngineError, Result};
use crate::metrics::OutcomeClassifier;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Engine-wide settings shared by every run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum runs simultaneously running or paused
    #[serde(default = "default_max_active_runs")]
    pub max_active_runs: usize,

    /// Upper bound for a run's `concurrency`
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Bounded wait for a run or registry lock (ms)
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Window after `stop()` in which in-flight events are still accepted (ms)
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,

    /// How often run drivers re-check progress (ms)
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Notification buffer per subscriber
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,

    /// Terminal outcome statuses
    #[serde(default)]
    pub outcomes: OutcomeClassifier,
}

fn default_max_active_runs() -> usize {
    8
}

fn default_max_concurrency() -> usize {
    1024
}

fn default_lock_timeout_ms() -> u64 {
    250
}

fn default_stop_grace_ms() -> u64 {
    500
}

fn default_tick_interval_ms() -> u64 {
    250
}

fn default_notification_capacity() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_active_runs: default_max_active_runs(),
            max_concurrency: default_max_concurrency(),
            lock_timeout_ms: default_lock_timeout_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            tick_interval_ms: default_tick_interval_ms(),
            notification_capacity: default_notification_capacity(),
            outcomes: OutcomeClassifier::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Create configuration for development/testing
    pub fn development() -> Self {
        Self {
            max_active_runs: 4,
            max_concurrency: 64,
            lock_timeout_ms: 100,
            stop_grace_ms: 200,
            tick_interval_ms: 20,
            notification_capacity: 4096,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("max_active_runs", self.max_active_runs == 0),
            ("max_concurrency", self.max_concurrency == 0),
            ("lock_timeout_ms", self.lock_timeout_ms == 0),
            ("tick_interval_ms", self.tick_interval_ms == 0),
            ("notification_capacity", self.notification_capacity == 0),
        ];
        let invalid: Vec<&str> = zero.iter().filter(|(_, z)| *z).map(|(n, _)| *n).collect();

        if invalid.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Config(format!("must be positive: {}", invalid.join(", "))))
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
