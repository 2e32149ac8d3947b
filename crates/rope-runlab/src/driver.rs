//! Run driver: one Tokio task per run feeding prober outcomes into the engine
//!
//! The driver follows the run's control signal. It opens a prober stream when
//! the run is running and drops it when paused. On halt after a stop it keeps
//! reading the open stream for the stop grace window, then exits. Between
//! outcomes it ticks the engine so silent runs still complete on time.

use crate::engine::RunEngine;
use crate::error::{EngineError, Result};
use crate::lifecycle::RunState;
use crate::prober::{ProbeFault, ProbeItem, ProbeStream, TargetProber};
use crate::types::{ProbeOutcome, RunId};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// What the engine asks of a run's driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveSignal {
    /// Registered, not started
    Idle,
    Run,
    Pause,
    /// Terminal; the driver exits
    Halt,
}

impl RunEngine {
    /// Start `id` and spawn a driver that feeds it from `prober`
    ///
    /// The handle resolves to the run's final state once it is terminal.
    pub fn launch(&self, id: RunId, prober: Arc<dyn TargetProber>) -> Result<JoinHandle<Result<RunState>>> {
        let control = self.control(id)?;
        self.start(id)?;

        info!(run_id = %id, prober = prober.name(), "Driver launched");
        let engine = self.clone();
        Ok(tokio::spawn(drive(engine, id, prober, control)))
    }
}

async fn drive(
    engine: RunEngine,
    id: RunId,
    prober: Arc<dyn TargetProber>,
    mut control: watch::Receiver<DriveSignal>,
) -> Result<RunState> {
    let config = engine.get_run(id)?.config;
    if let Err(fault) = prober.preflight(&config).await {
        handle_fault(&engine, id, fault);
        return Ok(engine.get_run(id)?.state);
    }

    let mut ticker = interval(engine.config().tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut stream: Option<ProbeStream> = None;
    // Set when the prober ran dry during the current active period
    let mut exhausted = false;

    loop {
        let signal = *control.borrow_and_update();
        match signal {
            DriveSignal::Halt => break,
            DriveSignal::Run => {
                if stream.is_none() && !exhausted {
                    debug!(run_id = %id, "Opening probe stream");
                    stream = Some(prober.probe(&config));
                }
            }
            DriveSignal::Pause | DriveSignal::Idle => {
                stream = None;
                exhausted = false;
            }
        }

        tokio::select! {
            changed = control.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {
                match engine.tick(id) {
                    Ok(state) if state.is_terminal() => break,
                    Ok(_) | Err(EngineError::Busy(_)) => {}
                    Err(e) => {
                        warn!(run_id = %id, error = %e, "Tick failed");
                        break;
                    }
                }
            }
            item = next_outcome(&mut stream) => match item {
                Some(Ok(outcome)) => {
                    if handle_outcome(&engine, id, outcome) {
                        break;
                    }
                }
                Some(Err(fault)) => {
                    handle_fault(&engine, id, fault);
                    break;
                }
                None => {
                    debug!(run_id = %id, "Probe stream ended");
                    stream = None;
                    exhausted = true;
                }
            },
        }
    }

    let state = engine.get_run(id)?.state;
    if let (RunState::Stopped, Some(stream)) = (state, stream) {
        drain(&engine, id, stream).await;
    }
    info!(run_id = %id, state = %state, "Driver finished");
    Ok(state)
}

/// Ingest what a stopped run's stream still yields within the grace window
async fn drain(engine: &RunEngine, id: RunId, mut stream: ProbeStream) {
    let mut drained = 0usize;
    let window = engine.config().stop_grace();
    let _ = timeout(window, async {
        while let Some(Ok(outcome)) = stream.next().await {
            match engine.ingest(id, outcome) {
                Ok(_) => drained += 1,
                Err(e) => {
                    debug!(run_id = %id, error = %e, "Grace window closed");
                    break;
                }
            }
        }
    })
    .await;
    debug!(run_id = %id, drained, "Stream drained after stop");
}

/// Next outcome of the open stream; pends forever when none is open
async fn next_outcome(stream: &mut Option<ProbeStream>) -> Option<ProbeItem> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

/// Ingest one outcome; true once the run is terminal
fn handle_outcome(engine: &RunEngine, id: RunId, outcome: ProbeOutcome) -> bool {
    match engine.ingest(id, outcome) {
        Ok(receipt) => receipt.state.is_terminal(),
        // Paused or contended; the outcome is dropped
        Err(e) if e.is_retryable() => {
            debug!(run_id = %id, error = %e, "Outcome dropped");
            false
        }
        Err(e) => {
            warn!(run_id = %id, error = %e, "Ingest failed");
            true
        }
    }
}

fn handle_fault(engine: &RunEngine, id: RunId, fault: ProbeFault) {
    error!(run_id = %id, fault = %fault, "Prober fault");
    if let Err(e) = engine.fail(id, fault.to_string()) {
        // Already stopped or completed concurrently
        debug!(run_id = %id, error = %e, "Fault after run ended");
    }
}
