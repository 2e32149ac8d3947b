//! Target probers: the producers of probe outcomes
//!
//! A prober turns a [`RunConfig`] into a stream of outcomes. The engine never
//! talks to the target itself; it only consumes what a prober yields.

mod http;
mod scripted;

pub use http::HttpProber;
pub use scripted::{ScriptStep, ScriptedProber};

use crate::types::{ProbeOutcome, RunConfig};
use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// One item of a probe stream
pub type ProbeItem = std::result::Result<ProbeOutcome, ProbeFault>;

/// Stream of outcomes for one active period of a run
pub type ProbeStream = BoxStream<'static, ProbeItem>;

/// Fatal prober condition; the run transitions to `Failed`
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeFault {
    /// Target could not be reached before any request succeeded
    #[error("Target unreachable: {target}: {reason}")]
    Unreachable { target: String, reason: String },

    /// Configuration the prober cannot act on
    #[error("Invalid probe target: {0}")]
    InvalidTarget(String),

    /// Fault injected by a scripted prober
    #[error("{0}")]
    Scripted(String),
}

/// Produces outcomes for a run
///
/// `probe` is called when a run starts and again on each resume. The stream is
/// dropped on pause and stop, so producers must tolerate being cancelled at
/// any await point.
#[async_trait]
pub trait TargetProber: Send + Sync {
    /// Prober name
    fn name(&self) -> &str;

    /// One-off check before the first stream is opened
    async fn preflight(&self, _config: &RunConfig) -> Result<(), ProbeFault> {
        Ok(())
    }

    fn probe(&self, config: &RunConfig) -> ProbeStream;
}
