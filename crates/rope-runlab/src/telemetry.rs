//! Prometheus metrics for the engine itself

use crate::error::Result;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Engine-level counters, one registry per engine instance
pub struct EngineTelemetry {
    registry: Registry,
    pub runs_created: IntCounter,
    pub runs_finished: IntCounterVec,
    pub active_runs: IntGauge,
    pub events_ingested: IntCounter,
    pub events_rejected: IntCounter,
}

impl EngineTelemetry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("runlab".to_string()), None)?;

        let runs_created = IntCounter::new("runs_created_total", "Runs created")?;
        let runs_finished = IntCounterVec::new(
            Opts::new("runs_finished_total", "Runs that reached a terminal state"),
            &["state"],
        )?;
        let active_runs = IntGauge::new("active_runs", "Runs currently running or paused")?;
        let events_ingested = IntCounter::new("events_ingested_total", "Events appended to run logs")?;
        let events_rejected = IntCounter::new("events_rejected_total", "Events rejected by ingestion")?;

        registry.register(Box::new(runs_created.clone()))?;
        registry.register(Box::new(runs_finished.clone()))?;
        registry.register(Box::new(active_runs.clone()))?;
        registry.register(Box::new(events_ingested.clone()))?;
        registry.register(Box::new(events_rejected.clone()))?;

        Ok(Self {
            registry,
            runs_created,
            runs_finished,
            active_runs,
            events_ingested,
            events_rejected,
        })
    }

    /// Render the registry in Prometheus text exposition format
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl std::fmt::Debug for EngineTelemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineTelemetry")
            .field("active_runs", &self.active_runs.get())
            .field("events_ingested", &self.events_ingested.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instances_are_isolated() {
        let a = EngineTelemetry::new().unwrap();
        let b = EngineTelemetry::new().unwrap();

        a.events_ingested.inc();
        assert_eq!(a.events_ingested.get(), 1);
        assert_eq!(b.events_ingested.get(), 0);
    }

    #[test]
    fn test_encode_uses_namespace() {
        let telemetry = EngineTelemetry::new().unwrap();
        telemetry.runs_finished.with_label_values(&["completed"]).inc();

        let text = telemetry.encode().unwrap();
        assert!(text.contains("runlab_runs_finished_total{state=\"completed\"} 1"));
        assert!(text.contains("runlab_active_runs 0"));
    }
}
