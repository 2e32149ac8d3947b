//! Incremental run metrics
//!
//! [`Metrics`] is folded one event at a time in O(1): counters, latency
//! extremes and a running mean. Throughput is a lifetime average over the
//! time since the run started, not a sliding window.
//!
//! Latency percentiles come from an HDR histogram kept beside the run
//! ([`LatencyProfile`]); they are reported separately from the fold.

use crate::error::{EngineError, Result};
use crate::types::Event;
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ============================================================================
// OUTCOME CLASSIFICATION
// ============================================================================

/// How an outcome status counts toward the tallies
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutcomeClass {
    Success,
    Failure,
    NonTerminal,
}

/// Fixed sets of terminal outcome statuses, matched case-insensitively
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeClassifier {
    #[serde(default = "default_success_statuses")]
    pub success: BTreeSet<String>,

    #[serde(default = "default_failure_statuses")]
    pub failure: BTreeSet<String>,
}

fn default_success_statuses() -> BTreeSet<String> {
    ["success", "succeeded", "ok", "authenticated", "delivered", "completed", "passed"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_failure_statuses() -> BTreeSet<String> {
    ["failed", "failure", "timeout", "timed_out", "error", "refused", "rejected"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for OutcomeClassifier {
    fn default() -> Self {
        Self {
            success: default_success_statuses(),
            failure: default_failure_statuses(),
        }
    }
}

impl OutcomeClassifier {
    pub fn classify(&self, outcome_status: &str) -> OutcomeClass {
        let status = outcome_status.trim().to_ascii_lowercase();
        if self.success.contains(&status) {
            OutcomeClass::Success
        } else if self.failure.contains(&status) {
            OutcomeClass::Failure
        } else {
            OutcomeClass::NonTerminal
        }
    }
}

// ============================================================================
// AGGREGATE
// ============================================================================

/// Derived statistics over a run's event log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub total_events: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Non-terminal events not yet balanced by a terminal outcome
    pub in_progress_count: u64,
    /// Events that carried a latency
    pub latency_samples: u64,
    pub min_latency_millis: Option<u64>,
    pub max_latency_millis: Option<u64>,
    pub mean_latency_millis: f64,
    pub success_rate_percent: f64,
    pub observed_throughput_per_sec: f64,
}

impl Metrics {
    /// Next metrics after `event`, leaving `self` untouched
    pub fn update(
        &self,
        event: &Event,
        classifier: &OutcomeClassifier,
        secs_since_start: f64,
    ) -> Metrics {
        let mut next = self.clone();
        next.apply(event, classifier, secs_since_start);
        next
    }

    /// Fold `event` in place
    pub fn apply(&mut self, event: &Event, classifier: &OutcomeClassifier, secs_since_start: f64) {
        self.total_events += 1;

        match classifier.classify(&event.outcome_status) {
            OutcomeClass::Success => {
                self.success_count += 1;
                self.in_progress_count = self.in_progress_count.saturating_sub(1);
            }
            OutcomeClass::Failure => {
                self.failure_count += 1;
                self.in_progress_count = self.in_progress_count.saturating_sub(1);
            }
            OutcomeClass::NonTerminal => {
                self.in_progress_count += 1;
            }
        }

        if let Some(latency) = event.latency_millis {
            self.latency_samples += 1;
            self.min_latency_millis = Some(self.min_latency_millis.map_or(latency, |m| m.min(latency)));
            self.max_latency_millis = Some(self.max_latency_millis.map_or(latency, |m| m.max(latency)));
            self.mean_latency_millis +=
                (latency as f64 - self.mean_latency_millis) / self.latency_samples as f64;
        }

        let terminal = self.success_count + self.failure_count;
        self.success_rate_percent = if terminal > 0 {
            self.success_count as f64 / terminal as f64 * 100.0
        } else {
            0.0
        };

        self.observed_throughput_per_sec = self.total_events as f64 / secs_since_start.max(1.0);
    }

    pub fn terminal_count(&self) -> u64 {
        self.success_count + self.failure_count
    }
}

// ============================================================================
// PERCENTILES
// ============================================================================

/// Latency distribution of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyPercentiles {
    pub samples: u64,
    pub p50_millis: u64,
    pub p90_millis: u64,
    pub p99_millis: u64,
    pub p999_millis: u64,
}

/// HDR histogram of event latencies (1ms to 1h, 3 significant digits)
#[derive(Debug, Clone)]
pub struct LatencyProfile {
    histogram: Histogram<u64>,
}

impl LatencyProfile {
    pub fn new() -> Result<Self> {
        let histogram = Histogram::new_with_bounds(1, 3_600_000, 3)
            .map_err(|e| EngineError::Config(format!("latency histogram: {}", e)))?;
        Ok(Self { histogram })
    }

    pub fn record(&mut self, latency_millis: u64) {
        self.histogram.saturating_record(latency_millis);
    }

    pub fn percentiles(&self) -> LatencyPercentiles {
        if self.histogram.is_empty() {
            return LatencyPercentiles::default();
        }
        LatencyPercentiles {
            samples: self.histogram.len(),
            p50_millis: self.histogram.value_at_quantile(0.50),
            p90_millis: self.histogram.value_at_quantile(0.90),
            p99_millis: self.histogram.value_at_quantile(0.99),
            p999_millis: self.histogram.value_at_quantile(0.999),
        }
    }
}
