//! Error types for run engine operations

use crate::lifecycle::{RunState, Transition};
use crate::types::RunId;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// A single invalid field of a run configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: &'static str,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every violated field of a rejected run configuration, reported together
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid run configuration: {}", join_violations(.violations))]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    /// Names of the offending fields, in the order they were checked
    pub fn fields(&self) -> Vec<&'static str> {
        self.violations.iter().map(|v| v.field).collect()
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }
}

fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that can occur in run engine operations
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    // === Caller input ===
    /// Malformed or out-of-range run configuration
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A non-terminal run already uses this name
    #[error("A non-terminal run named '{0}' already exists")]
    DuplicateName(String),

    /// Export format not implemented
    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),

    // === Lifecycle ===
    /// Transition attempted from a state that forbids it
    #[error("Cannot {action} run {run_id} while {from}")]
    IllegalState {
        run_id: RunId,
        from: RunState,
        action: Transition,
    },

    /// Unknown run id
    #[error("Run not found: {0}")]
    NotFound(RunId),

    /// Engine-wide active run limit reached
    #[error("Active run limit reached: {limit}")]
    Capacity { limit: usize },

    /// Event arrived while ingestion is suspended
    #[error("Event rejected for run {run_id} in state {state}")]
    Rejected { run_id: RunId, state: RunState },

    /// Bounded wait for an exclusive region expired
    #[error("Timed out waiting for {0}")]
    Busy(String),

    // === Plumbing ===
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registry error
    #[error("Telemetry error: {0}")]
    Telemetry(String),
}

impl EngineError {
    /// Stable numeric code for API consumers
    pub fn code(&self) -> u32 {
        match self {
            Self::Validation(_) => 2001,
            Self::DuplicateName(_) => 2002,
            Self::UnsupportedFormat(_) => 2003,
            Self::IllegalState { .. } => 2101,
            Self::NotFound(_) => 2102,
            Self::Capacity { .. } => 2103,
            Self::Rejected { .. } => 2104,
            Self::Busy(_) => 2105,
            _ => 9999,
        }
    }

    /// Whether retrying the same call later can succeed without changing input
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Busy(_) | Self::Capacity { .. } | Self::Rejected { .. }
        )
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<csv::Error> for EngineError {
    fn from(e: csv::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<prometheus::Error> for EngineError {
    fn from(e: prometheus::Error) -> Self {
        Self::Telemetry(e.to_string())
    }
}
