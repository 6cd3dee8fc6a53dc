//! Shared health state for the /health endpoint.
//! Updated by the scheduler loop and its spawned runs.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::Serialize;

/// Scheduler liveness counters. Written by the scheduler, read by the API.
#[derive(Default)]
pub struct HealthState {
    /// Millisecond timestamp of the last completed tick (0 = none yet).
    last_tick_at_ms: AtomicI64,
    ticks: AtomicU64,
    runs_completed: AtomicU64,
    runs_failed: AtomicU64,
    /// Fires that found their slot occupied.
    runs_dropped: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
    pub last_tick_at_ms: i64,
    pub ticks: u64,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub runs_dropped: u64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_tick(&self, at_ms: i64) {
        self.last_tick_at_ms.store(at_ms, Ordering::Relaxed);
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_completed(&self) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dropped(&self) {
        self.runs_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            last_tick_at_ms: self.last_tick_at_ms.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            runs_dropped: self.runs_dropped.load(Ordering::Relaxed),
        }
    }
}
