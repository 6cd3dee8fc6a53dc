use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use crate::types::{Cycle, RunTrigger};

/// One admitted pipeline pass. Lives only while its slot is held.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRun {
    pub task_id: Option<i64>,
    pub asset_id: i64,
    pub cycle: Cycle,
    pub prompt_version_id: i64,
    pub started_at: i64,
    pub trigger: RunTrigger,
}

impl ExecutionRun {
    pub fn key(&self) -> (i64, Cycle) {
        (self.asset_id, self.cycle)
    }
}

/// At most one in-flight run per (asset, cycle).
///
/// Admission is a single `entry()` call on the map, so two callers racing for
/// the same key cannot both see it vacant.
#[derive(Default)]
pub struct SingleFlight {
    slots: DashMap<(i64, Cycle), ExecutionRun>,
}

impl SingleFlight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim the slot for `run`, or `None` if a run for the same key is in flight.
    pub fn try_acquire(self: &Arc<Self>, run: ExecutionRun) -> Option<SlotGuard> {
        let key = run.key();
        match self.slots.entry(key) {
            Entry::Occupied(_) => None,
            Entry::Vacant(v) => {
                v.insert(run.clone());
                Some(SlotGuard { gate: Arc::clone(self), key, run })
            }
        }
    }

    pub fn in_flight(&self) -> Vec<ExecutionRun> {
        let mut runs: Vec<ExecutionRun> = self.slots.iter().map(|e| e.value().clone()).collect();
        runs.sort_by_key(|r| (r.started_at, r.asset_id));
        runs
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

/// Holds a slot; releasing it on drop covers success, error, timeout and panic alike.
pub struct SlotGuard {
    gate: Arc<SingleFlight>,
    key: (i64, Cycle),
    run: ExecutionRun,
}

impl SlotGuard {
    pub fn run(&self) -> &ExecutionRun {
        &self.run
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.gate.slots.remove(&self.key);
    }
}
