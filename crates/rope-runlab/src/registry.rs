//! Run registry: the only engine-wide shared structure
//!
//! Each run lives in its own [`RunSlot`] behind a per-run `RwLock`, so
//! writers to one run never contend with another. The registry map itself is
//! only write-locked for creation and removal.
//!
//! Lock order is run record → name index. The map lock is never held while
//! taking a run lock.

use crate::driver::DriveSignal;
use crate::error::{EngineError, Result};
use crate::lifecycle::RunTimer;
use crate::metrics::LatencyProfile;
use crate::types::{Run, RunId};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Authoritative state of one run, guarded as a unit
#[derive(Debug)]
pub(crate) struct RunRecord {
    pub run: Run,
    pub timer: RunTimer,
    pub latency: LatencyProfile,
    pub stopped_at: Option<DateTime<Utc>>,
}

/// A registered run and its driver control channel
#[derive(Debug)]
pub(crate) struct RunSlot {
    pub id: RunId,
    pub record: RwLock<RunRecord>,
    pub control: watch::Sender<DriveSignal>,
}

impl RunSlot {
    pub fn new(record: RunRecord) -> Self {
        let (control, _) = watch::channel(DriveSignal::Idle);
        Self {
            id: record.run.id,
            record: RwLock::new(record),
            control,
        }
    }
}

/// Id → run map plus the name index and active-slot counter
#[derive(Debug)]
pub(crate) struct RunRegistry {
    runs: RwLock<IndexMap<RunId, Arc<RunSlot>>>,
    /// Names held by non-terminal runs
    active_names: Mutex<HashMap<String, RunId>>,
    active_runs: AtomicUsize,
    lock_timeout: Duration,
}

impl RunRegistry {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            runs: RwLock::new(IndexMap::new()),
            active_names: Mutex::new(HashMap::new()),
            active_runs: AtomicUsize::new(0),
            lock_timeout,
        }
    }

    /// Register a new run, claiming its name
    pub fn insert(&self, record: RunRecord) -> Result<Arc<RunSlot>> {
        let mut runs = self
            .runs
            .try_write_for(self.lock_timeout)
            .ok_or_else(|| EngineError::Busy("run registry".to_string()))?;

        let name = record.run.config.name.clone();
        let id = record.run.id;
        {
            let mut names = self.active_names.lock();
            if names.contains_key(&name) {
                return Err(EngineError::DuplicateName(name));
            }
            names.insert(name, id);
        }

        let slot = Arc::new(RunSlot::new(record));
        runs.insert(id, slot.clone());
        Ok(slot)
    }

    pub fn get(&self, id: RunId) -> Result<Arc<RunSlot>> {
        let runs = self
            .runs
            .try_read_for(self.lock_timeout)
            .ok_or_else(|| EngineError::Busy("run registry".to_string()))?;
        runs.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// All slots in creation order
    pub fn slots(&self) -> Result<Vec<Arc<RunSlot>>> {
        let runs = self
            .runs
            .try_read_for(self.lock_timeout)
            .ok_or_else(|| EngineError::Busy("run registry".to_string()))?;
        Ok(runs.values().cloned().collect())
    }

    pub fn remove(&self, id: RunId) -> Result<Arc<RunSlot>> {
        let mut runs = self
            .runs
            .try_write_for(self.lock_timeout)
            .ok_or_else(|| EngineError::Busy("run registry".to_string()))?;
        runs.shift_remove(&id).ok_or(EngineError::NotFound(id))
    }

    pub fn len(&self) -> usize {
        self.runs.read().len()
    }

    /// Give up a name once its run is terminal
    pub fn release_name(&self, name: &str, id: RunId) {
        let mut names = self.active_names.lock();
        if names.get(name) == Some(&id) {
            names.remove(name);
        }
    }

    /// Claim one active-run slot if fewer than `limit` are taken
    pub fn try_acquire_active(&self, limit: usize) -> bool {
        self.active_runs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < limit).then_some(n + 1))
            .is_ok()
    }

    pub fn release_active(&self) {
        let _ = self
            .active_runs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn active_count(&self) -> usize {
        self.active_runs.load(Ordering::Acquire)
    }
}
