//! # Datachain Rope Run Lab
//!
//! Lifecycle and live metrics engine for load and protocol test runs.
//!
//! ## Features
//!
//! - **Run Registry**: Bounded set of concurrent runs with unique ids and names
//! - **Lifecycle**: Draft → Running ⇄ Paused → Completed / Failed / Stopped
//! - **Ingestion**: Ordered event logs with O(1) incremental metrics
//! - **Queries**: Filter logs by kind, text, outcome, tags and time window
//! - **Export**: CSV rows and versioned JSON snapshots
//! - **Probers**: Scripted and HTTP producers driven by a Tokio task per run
//! - **HDR Histograms**: Latency percentiles per run
//!
//! ## Usage
//!
//! ```bash
//! # Probe an HTTP endpoint for 60s at 50 requests per second
//! cargo run --package rope-runlab -- run --name api-smoke --target https://dcscan.io/api/v1/health --duration 60 --rps 50
//!
//! # Replay a scripted run and export it
//! cargo run --package rope-runlab -- run --name replay --script steps.json --export json --output run.json
//!
//! # Validate a run configuration
//! cargo run --package rope-runlab -- validate --config run.toml
//! ```

pub mod clock;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod export;
pub mod lifecycle;
pub mod metrics;
pub mod notify;
pub mod prober;
pub mod query;
mod registry;
mod report;
pub mod telemetry;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use driver::DriveSignal;
pub use engine::{IngestReceipt, RunEngine};
pub use error::{EngineError, FieldViolation, Result, ValidationError};
pub use export::{parse_structured, ExportFormat, RunExport, RunSnapshot};
pub use lifecycle::{RunState, Transition};
pub use metrics::{LatencyPercentiles, Metrics, OutcomeClassifier};
pub use notify::RunNotification;
pub use prober::{HttpProber, ProbeFault, ProbeItem, ProbeStream, ScriptStep, ScriptedProber, TargetProber};
pub use query::EventFilter;
pub use types::{
    Event, EventKind, ProbeOutcome, Run, RunConfig, RunId, RunKind, RunListFilter, RunSummary,
};
