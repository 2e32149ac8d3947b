//! Deterministic prober that replays a fixed script

use super::{ProbeFault, ProbeStream, TargetProber};
use crate::error::{EngineError, Result};
use crate::types::{ProbeOutcome, RunConfig};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// One scripted step: wait `delay_ms`, then emit an outcome or a fault
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptStep {
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ProbeOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

impl ScriptStep {
    pub fn outcome(delay_ms: u64, outcome: ProbeOutcome) -> Self {
        Self {
            delay_ms,
            outcome: Some(outcome),
            fault: None,
        }
    }

    pub fn fault(delay_ms: u64, reason: impl Into<String>) -> Self {
        Self {
            delay_ms,
            outcome: None,
            fault: Some(reason.into()),
        }
    }
}

/// Replays steps in order across pause/resume
///
/// Steps are consumed from a shared queue, so a stream recreated on resume
/// continues where the previous one stopped. A step whose delay was
/// interrupted by a pause is replayed with its full delay.
#[derive(Debug, Clone)]
pub struct ScriptedProber {
    name: String,
    steps: Arc<Mutex<VecDeque<ScriptStep>>>,
    cycle: bool,
}

impl ScriptedProber {
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            name: "scripted".to_string(),
            steps: Arc::new(Mutex::new(steps.into_iter().collect())),
            cycle: false,
        }
    }

    /// Emit `outcome` every `every` until the stream is dropped
    pub fn repeating(outcome: ProbeOutcome, every: Duration) -> Self {
        let step = ScriptStep::outcome(every.as_millis() as u64, outcome);
        Self {
            name: "repeating".to_string(),
            steps: Arc::new(Mutex::new(VecDeque::from([step]))),
            cycle: true,
        }
    }

    /// Parse a JSON array of steps
    pub fn from_json(json: &str) -> Result<Self> {
        let steps: Vec<ScriptStep> = serde_json::from_str(json)?;
        for (i, step) in steps.iter().enumerate() {
            if step.outcome.is_some() == step.fault.is_some() {
                return Err(EngineError::Config(format!(
                    "script step {}: exactly one of `outcome` or `fault` is required",
                    i
                )));
            }
        }
        Ok(Self::new(steps))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Steps not yet emitted
    pub fn remaining(&self) -> usize {
        self.steps.lock().len()
    }
}

#[async_trait]
impl TargetProber for ScriptedProber {
    fn name(&self) -> &str {
        &self.name
    }

    fn probe(&self, _config: &RunConfig) -> ProbeStream {
        let cycle = self.cycle;
        stream::unfold(self.steps.clone(), move |steps| async move {
            let delay = steps.lock().front().map(|step| step.delay_ms)?;
            sleep(Duration::from_millis(delay)).await;

            let step = steps.lock().pop_front()?;
            if cycle {
                steps.lock().push_back(step.clone());
            }

            let item = match (step.fault, step.outcome) {
                (Some(reason), _) => Err(ProbeFault::Scripted(reason)),
                (None, Some(outcome)) => Ok(outcome.at(Utc::now())),
                (None, None) => Ok(ProbeOutcome::info("heartbeat", "")),
            };
            Some((item, steps))
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_in_order() {
        let prober = ScriptedProber::new([
            ScriptStep::outcome(0, ProbeOutcome::success("first")),
            ScriptStep::outcome(0, ProbeOutcome::failure("second")),
            ScriptStep::fault(0, "connection reset"),
        ]);

        let items: Vec<_> = prober.probe(&RunConfig::default()).collect().await;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap().detail, "first");
        assert_eq!(items[1].as_ref().unwrap().outcome_status, "failed");
        assert_eq!(items[2], Err(ProbeFault::Scripted("connection reset".into())));
    }

    #[tokio::test]
    async fn test_new_stream_continues_script() {
        let prober = ScriptedProber::new([
            ScriptStep::outcome(0, ProbeOutcome::success("a")),
            ScriptStep::outcome(0, ProbeOutcome::success("b")),
        ]);

        let mut first = prober.probe(&RunConfig::default());
        assert_eq!(first.next().await.unwrap().unwrap().detail, "a");
        drop(first);

        let rest: Vec<_> = prober.probe(&RunConfig::default()).collect().await;
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].as_ref().unwrap().detail, "b");
        assert_eq!(prober.remaining(), 0);
    }

    #[tokio::test]
    async fn test_repeating_never_runs_dry() {
        let prober = ScriptedProber::repeating(ProbeOutcome::success("tick"), Duration::ZERO);
        let items: Vec<_> = prober.probe(&RunConfig::default()).take(5).collect().await;

        assert_eq!(items.len(), 5);
        assert_eq!(prober.remaining(), 1);
    }

    #[test]
    fn test_from_json() {
        let prober = ScriptedProber::from_json(
            r#"[
                {"delay_ms": 10, "outcome": {"kind": "success", "outcome_status": "ok", "latency_millis": 4}},
                {"fault": "smtp banner missing"}
            ]"#,
        )
        .unwrap();
        assert_eq!(prober.remaining(), 2);
    }

    #[test]
    fn test_from_json_rejects_ambiguous_step() {
        let err = ScriptedProber::from_json(r#"[{"delay_ms": 5}]"#).unwrap_err();
        assert!(err.to_string().contains("script step 0"));
    }
}
