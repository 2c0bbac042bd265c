use core::sync::atomic::{AtomicU64, Ordering};
use serde::Serialize;

/// Counters scoped to one pool. Observational only; nothing reads them to
/// make a scheduling decision.
#[derive(Debug, Default)]
pub(crate) struct PoolStats {
    tasks_submitted: AtomicU64,
    tasks_finished: AtomicU64,
    subtasks_executed: AtomicU64,
    faults: AtomicU64,
    tasks_discarded: AtomicU64,
}

impl PoolStats {
    pub(crate) fn record_submission(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_subtask(&self, faulted: bool) {
        self.subtasks_executed.fetch_add(1, Ordering::Relaxed);
        if faulted {
            self.faults.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_finish(&self) {
        self.tasks_finished.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_discard(&self) {
        self.tasks_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_finished: self.tasks_finished.load(Ordering::Relaxed),
            subtasks_executed: self.subtasks_executed.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            tasks_discarded: self.tasks_discarded.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a pool's counters. Counters are read individually,
/// so a snapshot taken under load may be slightly inconsistent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatsSnapshot {
    /// Tasks accepted by `run` and `run_async_with_deps`.
    pub tasks_submitted: u64,
    /// Tasks whose every subtask was attempted.
    pub tasks_finished: u64,
    /// Subtasks executed, including ones that panicked.
    pub subtasks_executed: u64,
    /// Subtasks that panicked.
    pub faults: u64,
    /// Tasks dropped by shutdown.
    pub tasks_discarded: u64,
}
