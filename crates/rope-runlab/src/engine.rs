//! Run engine: lifecycle operations and the ingestion pipeline
//!
//! Every mutation of a run (`state`, `log`, `aggregate`, `progress_fraction`)
//! happens under that run's write lock, acquired with a bounded wait. A reader
//! holding the read lock therefore never sees a log append without the
//! matching metrics update.
//!
//! Ingestion policy while paused is **reject**: outcomes are refused with
//! [`EngineError::Rejected`] and nothing is buffered. After `stop()` a short
//! grace window still accepts in-flight outcomes onto a run that was stopped
//! while running.
//!
//! A run completes at the instant its duration runs out, whenever that is
//! noticed. An outcome arriving within one tick interval of the deadline is
//! still recorded; later ones are rejected.

use crate::clock::{millis_between, secs_between, Clock, SystemClock};
use crate::config::EngineConfig;
use crate::driver::DriveSignal;
use crate::error::{EngineError, Result};
use crate::export::{self, ExportFormat, RunSnapshot};
use crate::lifecycle::{RunState, RunTimer, Transition};
use crate::metrics::{LatencyPercentiles, LatencyProfile};
use crate::notify::{Notifier, RunNotification};
use crate::query::{self, EventFilter};
use crate::registry::{RunRecord, RunRegistry, RunSlot};
use crate::telemetry::EngineTelemetry;
use crate::types::{Event, ProbeOutcome, Run, RunConfig, RunId, RunListFilter, RunSummary};
use chrono::{DateTime, Utc};
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Result of a successful ingestion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IngestReceipt {
    /// Position of the event in the run's log
    pub sequence: u64,
    /// Run state after the event was processed
    pub state: RunState,
    pub progress_fraction: f64,
}

struct EngineInner {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    registry: RunRegistry,
    notifier: Notifier,
    telemetry: EngineTelemetry,
}

/// Coordinates a bounded set of concurrent runs
///
/// Cheap to clone; clones share the same registry. Separate `RunEngine::new`
/// calls produce fully isolated engines.
#[derive(Clone)]
pub struct RunEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for RunEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunEngine")
            .field("runs", &self.inner.registry.len())
            .field("active", &self.inner.registry.active_count())
            .finish()
    }
}

impl RunEngine {
    /// Create an engine on the system clock
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create an engine on an injected clock
    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let inner = EngineInner {
            registry: RunRegistry::new(config.lock_timeout()),
            notifier: Notifier::new(config.notification_capacity),
            telemetry: EngineTelemetry::new()?,
            clock,
            config,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn telemetry(&self) -> &EngineTelemetry {
        &self.inner.telemetry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunNotification> {
        self.inner.notifier.subscribe()
    }

    /// Number of runs currently running or paused
    pub fn active_runs(&self) -> usize {
        self.inner.registry.active_count()
    }

    // ------------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------------

    /// Validate `config` and register a new run in `Draft`
    pub fn create_run(&self, config: RunConfig) -> Result<RunId> {
        config.validate(self.inner.config.max_concurrency)?;

        let record = RunRecord {
            run: Run::draft(config, self.now()),
            timer: RunTimer::default(),
            latency: LatencyProfile::new()?,
            stopped_at: None,
        };
        let name = record.run.config.name.clone();
        let slot = self.inner.registry.insert(record)?;

        self.inner.telemetry.runs_created.inc();
        info!(run_id = %slot.id, name = %name, "Run created");
        self.inner.notifier.publish(RunNotification::RunCreated {
            run_id: slot.id,
            name,
        });
        Ok(slot.id)
    }

    /// Consistent copy of a run
    pub fn get_run(&self, id: RunId) -> Result<Run> {
        let slot = self.inner.registry.get(id)?;
        let record = self.read(&slot)?;
        Ok(record.run.clone())
    }

    /// Consistent copy of a run together with its latency distribution
    pub fn snapshot(&self, id: RunId) -> Result<RunSnapshot> {
        let slot = self.inner.registry.get(id)?;
        let record = self.read(&slot)?;
        Ok(RunSnapshot {
            run: record.run.clone(),
            latency: record.latency.percentiles(),
        })
    }

    /// Summaries of every run in creation order, optionally filtered
    pub fn list_runs(&self, filter: Option<&RunListFilter>) -> Result<Vec<RunSummary>> {
        let mut summaries = Vec::new();
        for slot in self.inner.registry.slots()? {
            let summary = self.read(&slot)?.run.summary();
            if filter.map_or(true, |f| f.matches(&summary)) {
                summaries.push(summary);
            }
        }
        Ok(summaries)
    }

    /// Drop a terminal run from the registry
    pub fn remove_run(&self, id: RunId) -> Result<()> {
        let slot = self.inner.registry.get(id)?;
        let state = self.read(&slot)?.run.state;
        if !state.permits(Transition::Remove) {
            return Err(EngineError::IllegalState {
                run_id: id,
                from: state,
                action: Transition::Remove,
            });
        }

        // Terminal states are absorbing, so the check above cannot go stale
        self.inner.registry.remove(id)?;
        info!(run_id = %id, "Run removed");
        self.inner.notifier.publish(RunNotification::RunRemoved { run_id: id });
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// `Draft → Running`; fails with `Capacity` when the active limit is hit
    pub fn start(&self, id: RunId) -> Result<()> {
        let slot = self.inner.registry.get(id)?;
        let mut record = self.write(&slot)?;
        let next = self.check(&record, Transition::Start)?;

        let limit = self.inner.config.max_active_runs;
        if !self.inner.registry.try_acquire_active(limit) {
            warn!(run_id = %id, limit, "Active run limit reached");
            return Err(EngineError::Capacity { limit });
        }

        let now = self.now();
        record.run.state = next;
        record.run.started_at = Some(now);
        record.timer.resume(now);
        slot.control.send_replace(DriveSignal::Run);

        self.inner.telemetry.active_runs.inc();
        info!(run_id = %id, duration_secs = record.run.config.duration_secs, "Run started");
        self.inner.notifier.publish(RunNotification::RunStarted { run_id: id });
        Ok(())
    }

    /// `Running → Paused`; progress freezes at its current value
    pub fn pause(&self, id: RunId) -> Result<()> {
        let slot = self.inner.registry.get(id)?;
        let mut record = self.write(&slot)?;
        let now = self.now();
        self.settle(&slot, &mut record, now);
        let next = self.check(&record, Transition::Pause)?;

        self.advance_progress(&mut record, now);
        record.timer.freeze(now);
        record.run.state = next;
        slot.control.send_replace(DriveSignal::Pause);

        let progress = record.run.progress_fraction;
        info!(run_id = %id, progress, "Run paused");
        self.inner
            .notifier
            .publish(RunNotification::RunPaused { run_id: id, progress });
        Ok(())
    }

    /// `Paused → Running`; progress continues from the frozen value
    pub fn resume(&self, id: RunId) -> Result<()> {
        let slot = self.inner.registry.get(id)?;
        let mut record = self.write(&slot)?;
        let next = self.check(&record, Transition::Resume)?;

        record.timer.resume(self.now());
        record.run.state = next;
        slot.control.send_replace(DriveSignal::Run);

        let progress = record.run.progress_fraction;
        info!(run_id = %id, progress, "Run resumed");
        self.inner
            .notifier
            .publish(RunNotification::RunResumed { run_id: id, progress });
        Ok(())
    }

    /// Stop a run from any non-terminal state
    ///
    /// Idempotent: stopping a terminal run succeeds and reports the state it
    /// already reached.
    pub fn stop(&self, id: RunId) -> Result<RunState> {
        let slot = self.inner.registry.get(id)?;
        let mut record = self.write(&slot)?;
        let now = self.now();
        self.settle(&slot, &mut record, now);

        if record.run.state.is_terminal() {
            debug!(run_id = %id, state = %record.run.state, "Stop on terminal run ignored");
            return Ok(record.run.state);
        }

        let next = self.check(&record, Transition::Stop)?;
        self.advance_progress(&mut record, now);
        // Only a running run has outcomes in flight
        if record.run.state == RunState::Running {
            record.stopped_at = Some(now);
        }
        self.finish(&slot, &mut record, next, now);
        Ok(next)
    }

    /// `Running → Failed` on a prober-reported fatal condition
    ///
    /// The log and aggregate collected so far are kept.
    pub fn fail(&self, id: RunId, reason: impl Into<String>) -> Result<()> {
        let slot = self.inner.registry.get(id)?;
        let mut record = self.write(&slot)?;
        let now = self.now();
        self.settle(&slot, &mut record, now);
        let next = self.check(&record, Transition::Fail)?;

        self.advance_progress(&mut record, now);
        record.run.failure_reason = Some(reason.into());
        self.finish(&slot, &mut record, next, now);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Ingestion
    // ------------------------------------------------------------------------

    /// Append an outcome to a running run's log and fold it into the metrics
    ///
    /// Arrival order is log order; producer timestamps are never used to
    /// reorder. The event that reaches the deadline is recorded and completes
    /// the run; an overdue run is completed first and the event rejected.
    pub fn ingest(&self, id: RunId, outcome: ProbeOutcome) -> Result<IngestReceipt> {
        let slot = self.inner.registry.get(id)?;
        let mut record = self.write(&slot)?;
        let now = self.now();

        let deadline = self.deadline(&record, now);
        if let Some(deadline) = deadline {
            let tolerance = self.inner.config.tick_interval().as_millis() as i64;
            if millis_between(deadline, now) > tolerance {
                self.complete(&slot, &mut record, deadline);
            }
        }

        let state = record.run.state;
        let grace = self.inner.config.stop_grace().as_millis() as i64;
        let in_grace = state == RunState::Stopped
            && record
                .stopped_at
                .map_or(false, |stopped| millis_between(stopped, now) <= grace);
        if !state.accepts_events() && !in_grace {
            self.inner.telemetry.events_rejected.inc();
            debug!(run_id = %id, state = %state, "Event rejected");
            return Err(EngineError::Rejected { run_id: id, state });
        }

        let at = match deadline {
            Some(deadline) if state.accepts_events() => deadline,
            _ => now,
        };
        let secs = record
            .run
            .started_at
            .map_or(0.0, |started| secs_between(started, at));
        let sequence = record.run.log.len() as u64;

        let RunRecord { run, latency, .. } = &mut *record;
        run.log.push(Event::from_outcome(sequence, outcome));
        if let Some(event) = run.log.last() {
            run.aggregate.apply(event, &self.inner.config.outcomes, secs);
            if let Some(ms) = event.latency_millis {
                latency.record(ms);
            }
        }

        self.inner.telemetry.events_ingested.inc();
        self.inner.notifier.publish(RunNotification::MetricsUpdated {
            run_id: id,
            metrics: run.aggregate.clone(),
        });

        if state.accepts_events() {
            match deadline {
                Some(deadline) => self.complete(&slot, &mut record, deadline),
                None => self.advance_progress(&mut record, now),
            }
        }

        Ok(IngestReceipt {
            sequence,
            state: record.run.state,
            progress_fraction: record.run.progress_fraction,
        })
    }

    /// Advance progress without an event, completing the run when due
    pub fn tick(&self, id: RunId) -> Result<RunState> {
        let slot = self.inner.registry.get(id)?;
        let mut record = self.write(&slot)?;
        let now = self.now();
        self.settle(&slot, &mut record, now);
        Ok(record.run.state)
    }

    /// Tick every run; returns how many completed on this pass
    pub fn tick_all(&self) -> Result<usize> {
        let mut completed = 0;
        for slot in self.inner.registry.slots()? {
            let mut record = match self.write(&slot) {
                Ok(record) => record,
                // Busy runs are being written to and will settle on their own
                Err(_) => continue,
            };
            let before = record.run.state;
            self.settle(&slot, &mut record, self.now());
            if before != record.run.state && record.run.state == RunState::Completed {
                completed += 1;
            }
        }
        Ok(completed)
    }

    // ------------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------------

    /// Matching events of a consistent snapshot of the log, in log order
    pub fn query(&self, id: RunId, filter: &EventFilter) -> Result<Vec<Event>> {
        let slot = self.inner.registry.get(id)?;
        let record = self.read(&slot)?;
        Ok(query::query(&record.run.log, filter).cloned().collect())
    }

    pub fn latency_percentiles(&self, id: RunId) -> Result<LatencyPercentiles> {
        let slot = self.inner.registry.get(id)?;
        let record = self.read(&slot)?;
        Ok(record.latency.percentiles())
    }

    /// Serialize a point-in-time snapshot of a run
    pub fn export(&self, id: RunId, format: ExportFormat) -> Result<Vec<u8>> {
        let snapshot = self.snapshot(id)?;
        let payload = export::export(&snapshot, format, self.now())?;
        debug!(run_id = %id, format = %format, bytes = payload.len(), "Run exported");
        Ok(payload)
    }

    /// Watch the driver signal of a run
    pub(crate) fn control(&self, id: RunId) -> Result<watch::Receiver<DriveSignal>> {
        Ok(self.inner.registry.get(id)?.control.subscribe())
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    fn read<'a>(&self, slot: &'a RunSlot) -> Result<RwLockReadGuard<'a, RunRecord>> {
        slot.record
            .try_read_for(self.inner.config.lock_timeout())
            .ok_or_else(|| EngineError::Busy(format!("run {}", slot.id)))
    }

    fn write<'a>(&self, slot: &'a RunSlot) -> Result<RwLockWriteGuard<'a, RunRecord>> {
        slot.record
            .try_write_for(self.inner.config.lock_timeout())
            .ok_or_else(|| {
                warn!(run_id = %slot.id, "Timed out waiting for run lock");
                EngineError::Busy(format!("run {}", slot.id))
            })
    }

    fn check(&self, record: &RunRecord, action: Transition) -> Result<RunState> {
        let from = record.run.state;
        from.apply(action).ok_or(EngineError::IllegalState {
            run_id: record.run.id,
            from,
            action,
        })
    }

    /// Raise progress to the timer's value
    fn advance_progress(&self, record: &mut RunRecord, now: DateTime<Utc>) {
        let progress = record.timer.progress(now, record.run.config.duration_secs);
        if progress > record.run.progress_fraction {
            record.run.progress_fraction = progress;
        }
    }

    /// Instant the active duration ran out, once it has
    fn deadline(&self, record: &RunRecord, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !record.timer.is_running() {
            return None;
        }
        let duration_ms = record.run.config.duration_secs.saturating_mul(1000) as i64;
        let overrun_ms = record.timer.active_millis(now) - duration_ms;
        (overrun_ms >= 0).then(|| now - chrono::Duration::milliseconds(overrun_ms))
    }

    /// Bring a running run up to date, completing it when its time is up
    fn settle(&self, slot: &RunSlot, record: &mut RunRecord, now: DateTime<Utc>) {
        match self.deadline(record, now) {
            Some(deadline) => self.complete(slot, record, deadline),
            None => self.advance_progress(record, now),
        }
    }

    /// `Running → Completed`, ended at the deadline instant `at`
    fn complete(&self, slot: &RunSlot, record: &mut RunRecord, at: DateTime<Utc>) {
        match self.check(record, Transition::Complete) {
            Ok(next) => self.finish(slot, record, next, at),
            Err(e) => debug!(run_id = %record.run.id, error = %e, "Completion skipped"),
        }
    }

    /// Enter a terminal state and release everything the run held
    fn finish(&self, slot: &RunSlot, record: &mut RunRecord, terminal: RunState, now: DateTime<Utc>) {
        let from = record.run.state;
        record.timer.freeze(now);
        record.run.state = terminal;
        record.run.ended_at = Some(now);
        if terminal == RunState::Completed {
            record.run.progress_fraction = 1.0;
        }

        if from.is_active() {
            self.inner.registry.release_active();
            self.inner.telemetry.active_runs.dec();
        }
        self.inner
            .registry
            .release_name(&record.run.config.name, record.run.id);
        slot.control.send_replace(DriveSignal::Halt);
        self.inner
            .telemetry
            .runs_finished
            .with_label_values(&[terminal.as_str()])
            .inc();

        let run_id = record.run.id;
        let notification = match terminal {
            RunState::Completed => {
                info!(run_id = %run_id, events = record.run.aggregate.total_events, "Run completed");
                RunNotification::RunCompleted {
                    run_id,
                    metrics: record.run.aggregate.clone(),
                }
            }
            RunState::Failed => {
                let reason = record.run.failure_reason.clone().unwrap_or_default();
                warn!(run_id = %run_id, reason = %reason, "Run failed");
                RunNotification::RunFailed { run_id, reason }
            }
            _ => {
                info!(run_id = %run_id, from = %from, "Run stopped");
                RunNotification::RunStopped { run_id }
            }
        };
        self.inner.notifier.publish(notification);
    }
}
