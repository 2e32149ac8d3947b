//! Core data model: run identity, run configuration, events

use crate::error::{EngineError, FieldViolation, ValidationError};
use crate::lifecycle::RunState;
use crate::metrics::Metrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// IDENTITY
// ============================================================================

/// Engine-assigned run identifier, unique for the process lifetime
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// What kind of run this is
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "protocol")]
pub enum RunKind {
    Load,
    Stress,
    Spike,
    Endurance,
    /// Protocol check against a specific service (`smtp`, `imap`, `http`, ...)
    Protocol(String),
}

impl RunKind {
    pub fn protocol(sub_kind: impl Into<String>) -> Self {
        Self::Protocol(sub_kind.into().to_ascii_lowercase())
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunKind::Load => write!(f, "load"),
            RunKind::Stress => write!(f, "stress"),
            RunKind::Spike => write!(f, "spike"),
            RunKind::Endurance => write!(f, "endurance"),
            RunKind::Protocol(sub) => write!(f, "protocol:{}", sub),
        }
    }
}

impl FromStr for RunKind {
    type Err = EngineError;

    /// Accepts `load`, `stress`, `spike`, `endurance`, `protocol:<sub>` or a
    /// bare protocol name such as `smtp`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        let kind = match s.as_str() {
            "load" => RunKind::Load,
            "stress" => RunKind::Stress,
            "spike" => RunKind::Spike,
            "endurance" => RunKind::Endurance,
            "" => return Err(EngineError::Config("empty run kind".to_string())),
            other => RunKind::protocol(other.strip_prefix("protocol:").unwrap_or(other)),
        };
        Ok(kind)
    }
}

/// Run configuration, immutable once the run starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Operator-facing name, unique among non-terminal runs
    pub name: String,

    /// Kind of run
    pub kind: RunKind,

    /// Run duration in seconds
    pub duration_secs: u64,

    /// Target events per second
    pub target_rate_per_sec: u64,

    /// Maximum in-flight probes
    pub concurrency: usize,

    /// Ramp-up duration in seconds
    #[serde(default)]
    pub ramp_up_secs: u64,

    /// Timeout for a single probe in seconds
    pub per_event_timeout_secs: u64,

    /// Retries per probe
    #[serde(default)]
    pub retries: u32,

    /// Address handed to the prober (URL, host:port, ...)
    #[serde(default)]
    pub target: String,

    /// Free-form labels carried into exports
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            name: "load-test".to_string(),
            kind: RunKind::Load,
            duration_secs: 60,
            target_rate_per_sec: 100,
            concurrency: 50,
            ramp_up_secs: 0,
            per_event_timeout_secs: 30,
            retries: 0,
            target: String::new(),
            labels: BTreeMap::new(),
        }
    }
}

impl RunConfig {
    /// Parse a run configuration from TOML
    pub fn from_toml_str(content: &str) -> Result<Self, EngineError> {
        Ok(toml::from_str(content)?)
    }

    /// Check every field, collecting all violations
    pub fn validate(&self, max_concurrency: usize) -> Result<(), ValidationError> {
        let mut violations = Vec::new();

        if self.name.trim().is_empty() {
            violations.push(FieldViolation::new("name", "must not be empty"));
        }
        if let RunKind::Protocol(sub) = &self.kind {
            if sub.trim().is_empty() {
                violations.push(FieldViolation::new("kind", "protocol sub-kind must not be empty"));
            }
        }
        if self.duration_secs == 0 {
            violations.push(FieldViolation::new("duration_secs", "must be positive"));
        }
        if self.target_rate_per_sec == 0 {
            violations.push(FieldViolation::new("target_rate_per_sec", "must be positive"));
        }
        if self.concurrency == 0 {
            violations.push(FieldViolation::new("concurrency", "must be positive"));
        } else if self.concurrency > max_concurrency {
            violations.push(FieldViolation::new(
                "concurrency",
                format!("must not exceed {}", max_concurrency),
            ));
        }
        if self.ramp_up_secs > 0 && self.ramp_up_secs >= self.duration_secs {
            violations.push(FieldViolation::new(
                "ramp_up_secs",
                format!("must be less than duration_secs ({})", self.duration_secs),
            ));
        }
        if self.per_event_timeout_secs == 0 {
            violations.push(FieldViolation::new("per_event_timeout_secs", "must be positive"));
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { violations })
        }
    }
}

// ============================================================================
// EVENTS
// ============================================================================

/// Severity/category of an event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Info,
    Success,
    Warning,
    Error,
    Debug,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Info => "info",
            EventKind::Success => "success",
            EventKind::Warning => "warning",
            EventKind::Error => "error",
            EventKind::Debug => "debug",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(EventKind::Info),
            "success" => Ok(EventKind::Success),
            "warning" | "warn" => Ok(EventKind::Warning),
            "error" => Ok(EventKind::Error),
            "debug" => Ok(EventKind::Debug),
            other => Err(EngineError::Config(format!("unknown event kind: {}", other))),
        }
    }
}

/// One observation produced by a target prober
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    /// Producer-supplied time; may be skewed, never used for ordering
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub outcome_status: String,
    #[serde(default)]
    pub latency_millis: Option<u64>,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl ProbeOutcome {
    pub fn new(kind: EventKind, outcome_status: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            outcome_status: outcome_status.into(),
            latency_millis: None,
            detail: detail.into(),
            tags: BTreeMap::new(),
        }
    }

    pub fn success(detail: impl Into<String>) -> Self {
        Self::new(EventKind::Success, "success", detail)
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self::new(EventKind::Error, "failed", detail)
    }

    pub fn info(outcome_status: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(EventKind::Info, outcome_status, detail)
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_latency(mut self, latency_millis: u64) -> Self {
        self.latency_millis = Some(latency_millis);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// An outcome after it has been appended to a run's log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Arrival index within the run, starting at 0
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub outcome_status: String,
    pub latency_millis: Option<u64>,
    pub detail: String,
    pub tags: BTreeMap<String, String>,
}

impl Event {
    pub(crate) fn from_outcome(sequence: u64, outcome: ProbeOutcome) -> Self {
        Self {
            sequence,
            timestamp: outcome.timestamp,
            kind: outcome.kind,
            outcome_status: outcome.outcome_status,
            latency_millis: outcome.latency_millis,
            detail: outcome.detail,
            tags: outcome.tags,
        }
    }
}

// ============================================================================
// RUNS
// ============================================================================

/// The unit of execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub config: RunConfig,
    pub state: RunState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Fraction of the configured duration spent running, 0.0 to 1.0
    pub progress_fraction: f64,
    pub log: Vec<Event>,
    pub aggregate: Metrics,
    /// Reason reported by the prober when the run failed
    pub failure_reason: Option<String>,
}

impl Run {
    pub(crate) fn draft(config: RunConfig, created_at: DateTime<Utc>) -> Self {
        Self {
            id: RunId::new(),
            config,
            state: RunState::Draft,
            created_at,
            started_at: None,
            ended_at: None,
            progress_fraction: 0.0,
            log: Vec::new(),
            aggregate: Metrics::default(),
            failure_reason: None,
        }
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            id: self.id,
            name: self.config.name.clone(),
            kind: self.config.kind.clone(),
            state: self.state,
            progress_fraction: self.progress_fraction,
            total_events: self.aggregate.total_events,
            success_rate_percent: self.aggregate.success_rate_percent,
            created_at: self.created_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }
}

/// Lightweight view of a run for listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: RunId,
    pub name: String,
    pub kind: RunKind,
    pub state: RunState,
    pub progress_fraction: f64,
    pub total_events: u64,
    pub success_rate_percent: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Selection criteria for run listings
#[derive(Debug, Clone, Default)]
pub struct RunListFilter {
    /// Only runs in one of these states
    pub states: Option<Vec<RunState>>,
    /// Case-insensitive substring of the run name
    pub name_contains: Option<String>,
}

impl RunListFilter {
    pub fn matches(&self, summary: &RunSummary) -> bool {
        if let Some(states) = &self.states {
            if !states.contains(&summary.state) {
                return false;
            }
        }
        if let Some(needle) = &self.name_contains {
            if !summary
                .name
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        true
    }
}
