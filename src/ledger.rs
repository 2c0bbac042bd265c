//! Shared queue of pending tasks plus the durable completion table.
//!
//! Dependencies are resolved against the completion table, keyed by task id,
//! and never against a task's position in the queue: a dependency may
//! already have left the queue, or may sit anywhere in it.

use crate::{
    config::IdlePolicy,
    error::{DependencyError, SubtaskFault, TaskSystemError},
    stats::PoolStats,
    sync::{Arc, Condvar, Mutex, lock, wait, yield_now},
    task::{Outcome, Runnable, Task},
    types::{HashSet, IndexMap, TaskId},
};
use std::collections::VecDeque;
use tracing::{debug, trace, warn};

/// Entry of the completion table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TaskStatus {
    /// Id handed out by `reserve`, task not submitted yet.
    Reserved,
    /// Submitted and still in the pending collection.
    Pending,
    /// Every subtask returned normally.
    Complete,
    /// Every subtask was attempted; the first panic is kept.
    Faulted(Box<SubtaskFault>),
    /// Dropped by shutdown.
    Discarded { unclaimed: usize },
}

impl TaskStatus {
    /// Whether dependents may run. Monotonic: once true, stays true.
    pub(crate) fn is_finished(&self) -> bool {
        matches!(self, Self::Complete | Self::Faulted(_))
    }
}

/// A subtask index handed to exactly one worker.
#[derive(Debug)]
pub(crate) struct Claim {
    pub(crate) task: Arc<Task>,
    pub(crate) index: usize,
}

enum Found {
    Claimed(Claim),
    /// Ready task without subtasks.
    Vacuous(Arc<Task>),
}

/// Result of one non-blocking attempt to find work.
#[derive(Debug)]
pub(crate) enum Pick {
    Claimed(Claim),
    /// Nothing claimable as of this generation.
    Idle(u64),
    ShutDown,
}

/// Tasks dropped by pool teardown.
#[must_use]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Tasks that were still pending when shutdown was requested, in id
    /// order.
    pub discarded: Vec<TaskId>,
    /// Subtasks of discarded tasks that never started.
    pub unclaimed_subtasks: usize,
}

#[derive(Debug, Default)]
struct LedgerState {
    /// Submitted, unfinished tasks in submission order.
    pending: IndexMap<TaskId, Arc<Task>>,
    /// Completion table indexed by id; its length is the next id.
    statuses: Vec<TaskStatus>,
    /// Bumped whenever work may have become claimable.
    generation: u64,
    shutdown: bool,
    unreported_faults: Vec<SubtaskFault>,
    abandoned: Vec<TaskId>,
    /// Everything discarded since shutdown was requested.
    report: ShutdownReport,
}

#[derive(Debug)]
pub(crate) struct Ledger {
    state: Mutex<LedgerState>,
    /// Workers wait here for new claimable work.
    work_available: Condvar,
    /// `sync` callers wait here for tasks to leave the pending collection.
    task_finished: Condvar,
    stats: PoolStats,
}

impl Ledger {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            work_available: Condvar::new(),
            task_finished: Condvar::new(),
            stats: PoolStats::default(),
        }
    }

    pub(crate) fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Issue an id whose task will be submitted later with
    /// [`Ledger::submit_reserved`]. Other tasks may depend on it meanwhile.
    pub(crate) fn reserve(&self) -> Result<TaskId, TaskSystemError> {
        let mut state = lock(&self.state);
        if state.shutdown {
            return Err(TaskSystemError::ShutDown);
        }
        let id = state.issue(TaskStatus::Reserved);
        trace!(task = %id, "reserved");
        Ok(id)
    }

    /// Enqueue a task under a fresh id. Never blocks on execution.
    pub(crate) fn submit(
        &self,
        work: Box<dyn Runnable>,
        total: usize,
        deps: &[TaskId],
        detached: bool,
    ) -> Result<Arc<Task>, TaskSystemError> {
        let mut state = lock(&self.state);
        if state.shutdown {
            return Err(TaskSystemError::ShutDown);
        }
        // A fresh id cannot be depended upon yet, so only existence matters.
        state.check_issued(deps)?;
        let id = state.issue(TaskStatus::Pending);
        let task = Arc::new(Task::new(id, work, total, deps.to_vec(), detached));
        self.enqueue(&mut state, &task);
        Ok(task)
    }

    /// Enqueue a task under an id previously returned by
    /// [`Ledger::reserve`].
    pub(crate) fn submit_reserved(
        &self,
        id: TaskId,
        work: Box<dyn Runnable>,
        total: usize,
        deps: &[TaskId],
    ) -> Result<Arc<Task>, TaskSystemError> {
        let mut state = lock(&self.state);
        if state.shutdown {
            return Err(TaskSystemError::ShutDown);
        }
        match state.statuses.get(id.index()) {
            None => return Err(TaskSystemError::UnknownTask(id)),
            Some(TaskStatus::Reserved) => {}
            Some(_) => return Err(TaskSystemError::AlreadySubmitted(id)),
        }
        state.check_issued(deps)?;
        state.check_acyclic(id, deps)?;
        state.statuses[id.index()] = TaskStatus::Pending;
        let task = Arc::new(Task::new(id, work, total, deps.to_vec(), true));
        self.enqueue(&mut state, &task);
        Ok(task)
    }

    fn enqueue(&self, state: &mut LedgerState, task: &Arc<Task>) {
        debug!(
            task = %task.id(),
            subtasks = task.total(),
            deps = task.deps().len(),
            "task submitted",
        );
        self.stats.record_submission();
        if task.total() == 0 && task.is_ready(&state.statuses) {
            // Nothing to claim; it is complete the moment it is ready.
            self.finish_locked(state, task, Outcome::Complete);
            return;
        }
        state.pending.insert(task.id(), Arc::clone(task));
        state.generation += 1;
        self.work_available.notify_one();
    }

    /// Non-blocking: claim a subtask of the oldest ready task.
    pub(crate) fn try_claim(&self) -> Pick {
        let mut state = lock(&self.state);
        if state.shutdown {
            return Pick::ShutDown;
        }
        loop {
            let mut found = None;
            for task in state.pending.values() {
                if !task.is_ready(&state.statuses) {
                    continue;
                }
                if task.total() == 0 {
                    found = Some(Found::Vacuous(Arc::clone(task)));
                    break;
                }
                // A fully claimed task still has subtasks in flight; keep looking.
                if let Some(index) = task.claim_next_subtask() {
                    let task = Arc::clone(task);
                    found = Some(Found::Claimed(Claim { task, index }));
                    break;
                }
            }
            match found {
                None => return Pick::Idle(state.generation),
                Some(Found::Vacuous(task)) => {
                    self.finish_locked(&mut state, &task, Outcome::Complete);
                }
                Some(Found::Claimed(claim)) => {
                    trace!(task = %claim.task.id(), index = claim.index, "subtask claimed");
                    if claim.task.has_unclaimed() {
                        // Pass the wake-up on so idle workers pick up the rest
                        // of the fan-out.
                        state.generation += 1;
                        self.work_available.notify_one();
                    }
                    return Pick::Claimed(claim);
                }
            }
        }
    }

    /// Suspend until the generation moves past `seen` or shutdown is
    /// requested.
    pub(crate) fn wait_for_work(&self, seen: u64, policy: IdlePolicy) {
        let mut state = lock(&self.state);
        while state.generation == seen && !state.shutdown {
            match policy {
                IdlePolicy::Sleep => state = wait(&self.work_available, state),
                IdlePolicy::Spin => {
                    drop(state);
                    yield_now();
                    state = lock(&self.state);
                }
            }
        }
    }

    /// Retire a task whose final subtask has returned. Called once per task,
    /// by the worker that observed the final subtask.
    pub(crate) fn finish(&self, task: &Arc<Task>) {
        let outcome = task.finished_outcome();
        let mut state = lock(&self.state);
        self.finish_locked(&mut state, task, outcome);
    }

    fn finish_locked(&self, state: &mut LedgerState, task: &Arc<Task>, outcome: Outcome) {
        let id = task.id();
        // Removal doubles as the guard against retiring a task twice.
        let was_pending = state.pending.shift_remove(&id).is_some();
        let status = &mut state.statuses[id.index()];
        assert!(
            was_pending || *status == TaskStatus::Pending,
            "Ledger::finish: [1]"
        );
        *status = outcome.status();
        match &outcome {
            Outcome::Complete => {
                debug!(task = %id, "task finished");
                self.stats.record_finish();
            }
            Outcome::Faulted(fault) => {
                warn!(task = %id, index = fault.index, message = %fault.message, "task faulted");
                self.stats.record_finish();
                if task.is_detached() {
                    state.unreported_faults.push(fault.clone());
                }
            }
            Outcome::Discarded { unclaimed } => {
                warn!(task = %id, unclaimed, "task discarded");
                self.stats.record_discard();
                state.report.discarded.push(id);
                state.report.unclaimed_subtasks += *unclaimed;
                if task.is_detached() {
                    state.abandoned.push(id);
                }
            }
        }
        task.complete(outcome);
        state.generation += 1;
        self.work_available.notify_all();
        self.task_finished.notify_all();
    }

    /// Discard a task abandoned by shutdown whose last in-flight subtask
    /// has returned.
    pub(crate) fn discard(&self, task: &Arc<Task>) {
        let mut state = lock(&self.state);
        let unclaimed = task.unclaimed();
        self.finish_locked(&mut state, task, Outcome::Discarded { unclaimed });
    }

    /// Stop handing out subtasks. Pending tasks with nothing in flight are
    /// discarded on the spot; the rest are discarded by the worker that
    /// returns their last running subtask. Wakes every idle worker and every
    /// `sync` caller.
    pub(crate) fn request_shutdown(&self) {
        let mut state = lock(&self.state);
        if !state.shutdown {
            state.shutdown = true;
            let idle: Vec<_> = state
                .pending
                .values()
                .filter(|task| task.abandon())
                .cloned()
                .collect();
            for task in idle {
                let unclaimed = task.unclaimed();
                self.finish_locked(&mut state, &task, Outcome::Discarded { unclaimed });
            }
        }
        drop(state);
        self.work_available.notify_all();
        self.task_finished.notify_all();
    }

    /// Everything discarded since shutdown. Only sound once no worker can be
    /// executing a subtask; anything still pending is discarded here.
    pub(crate) fn shutdown_report(&self) -> ShutdownReport {
        let mut state = lock(&self.state);
        let leftovers: Vec<_> = state.pending.values().cloned().collect();
        for task in leftovers {
            let unclaimed = task.unclaimed();
            self.finish_locked(&mut state, &task, Outcome::Discarded { unclaimed });
        }
        let mut report = std::mem::take(&mut state.report);
        report.discarded.sort_unstable();
        report
    }

    /// Block until the pending collection is empty, then report what went
    /// wrong with asynchronous work since the previous call.
    pub(crate) fn sync(&self) -> Result<(), TaskSystemError> {
        let mut state = lock(&self.state);
        while !state.pending.is_empty() {
            if let Some(stalled) = state.stalled() {
                return Err(TaskSystemError::Stalled(stalled));
            }
            state = wait(&self.task_finished, state);
        }
        if !state.abandoned.is_empty() {
            return Err(TaskSystemError::Abandoned(std::mem::take(
                &mut state.abandoned,
            )));
        }
        if !state.unreported_faults.is_empty() {
            return Err(TaskSystemError::Faulted(std::mem::take(
                &mut state.unreported_faults,
            )));
        }
        Ok(())
    }

    /// Block until task `id` has left the ledger and report how it went.
    pub(crate) fn wait(&self, id: TaskId) -> Result<(), TaskSystemError> {
        let state = lock(&self.state);
        if let Some(task) = state.pending.get(&id) {
            let task = Arc::clone(task);
            drop(state);
            return task.wait();
        }
        match state.statuses.get(id.index()) {
            None | Some(TaskStatus::Reserved) => Err(TaskSystemError::UnknownTask(id)),
            Some(TaskStatus::Complete) => Ok(()),
            Some(TaskStatus::Faulted(fault)) => Err(TaskSystemError::WorkerFault(*fault.clone())),
            Some(&TaskStatus::Discarded { unclaimed }) => {
                Err(TaskSystemError::Discarded { task: id, unclaimed })
            }
            Some(TaskStatus::Pending) => unreachable!("Ledger::wait: [1]"),
        }
    }

    pub(crate) fn pending_len(&self) -> usize {
        lock(&self.state).pending.len()
    }
}

impl LedgerState {
    fn issue(&mut self, status: TaskStatus) -> TaskId {
        let id = TaskId::from_index(self.statuses.len());
        self.statuses.push(status);
        id
    }

    fn check_issued(&self, deps: &[TaskId]) -> Result<(), DependencyError> {
        match deps.iter().find(|dep| dep.index() >= self.statuses.len()) {
            Some(&dependency) => Err(DependencyError::Unknown { dependency }),
            None => Ok(()),
        }
    }

    /// Reject `deps` if any of them reaches `id` through the dependency
    /// lists of pending tasks. Finished and reserved tasks have no outgoing
    /// edges, so the search stays within the pending collection.
    fn check_acyclic(&self, id: TaskId, deps: &[TaskId]) -> Result<(), DependencyError> {
        let mut visited = HashSet::default();
        let mut worklist = VecDeque::new();
        for &dependency in deps {
            worklist.clear();
            worklist.push_back(dependency);
            while let Some(current) = worklist.pop_front() {
                if current == id {
                    return Err(DependencyError::Cycle { task: id, dependency });
                }
                if !visited.insert(current) {
                    continue;
                }
                if let Some(task) = self.pending.get(&current) {
                    worklist.extend(task.deps().iter().copied());
                }
            }
        }
        Ok(())
    }

    /// Pending tasks that can never run: none of them is ready, so none is
    /// executing, and every dependency chain ends in an open reservation.
    fn stalled(&self) -> Option<Vec<TaskId>> {
        let any_ready = self
            .pending
            .values()
            .any(|task| task.is_ready(&self.statuses));
        if any_ready || self.shutdown {
            None
        } else {
            Some(self.pending.keys().copied().collect())
        }
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::task::SubtaskDone;

    fn noop() -> Box<dyn Runnable> {
        Box::new(|_: usize, _: usize| {})
    }

    fn claim(ledger: &Ledger) -> Claim {
        match ledger.try_claim() {
            Pick::Claimed(claim) => claim,
            other => panic!("expected a claim, got {other:?}"),
        }
    }

    fn complete(ledger: &Ledger, claim: &Claim) {
        match claim.task.mark_subtask_done(None) {
            SubtaskDone::Pending => {}
            SubtaskDone::Last => ledger.finish(&claim.task),
            SubtaskDone::Drained => ledger.discard(&claim.task),
        }
    }

    #[test]
    fn ids_are_sequential_and_include_reservations() {
        let ledger = Ledger::new();
        let a = ledger.submit(noop(), 1, &[], true).unwrap().id();
        let r = ledger.reserve().unwrap();
        let b = ledger.submit(noop(), 1, &[], true).unwrap().id();
        assert_eq!(
            [a, r, b],
            [TaskId::from(0), TaskId::from(1), TaskId::from(2)]
        );
    }

    #[test]
    fn unknown_dependency_is_rejected_without_enqueueing() {
        let ledger = Ledger::new();
        let err = ledger
            .submit(noop(), 1, &[TaskId::from(999)], true)
            .unwrap_err();
        assert_eq!(
            err,
            TaskSystemError::InvalidDependency(DependencyError::Unknown {
                dependency: TaskId::from(999)
            })
        );
        assert_eq!(ledger.pending_len(), 0);
    }

    #[test]
    fn reservation_cycle_is_rejected() {
        let ledger = Ledger::new();
        let a = ledger.reserve().unwrap();
        let b = ledger.reserve().unwrap();
        ledger.submit_reserved(a, noop(), 1, &[b]).unwrap();
        let err = ledger.submit_reserved(b, noop(), 1, &[a]).unwrap_err();
        assert_eq!(
            err,
            TaskSystemError::InvalidDependency(DependencyError::Cycle {
                task: b,
                dependency: a
            })
        );
        // `b` is still an open reservation and can be submitted correctly.
        ledger.submit_reserved(b, noop(), 1, &[]).unwrap();
    }

    #[test]
    fn transitive_cycle_is_rejected() {
        let ledger = Ledger::new();
        let a = ledger.reserve().unwrap();
        let b = ledger.submit(noop(), 1, &[a], true).unwrap().id();
        let c = ledger.submit(noop(), 1, &[b], true).unwrap().id();
        let err = ledger.submit_reserved(a, noop(), 1, &[c]).unwrap_err();
        assert_eq!(
            err,
            TaskSystemError::InvalidDependency(DependencyError::Cycle {
                task: a,
                dependency: c
            })
        );
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let ledger = Ledger::new();
        let a = ledger.reserve().unwrap();
        assert!(matches!(
            ledger.submit_reserved(a, noop(), 1, &[a]),
            Err(TaskSystemError::InvalidDependency(DependencyError::Cycle { .. }))
        ));
    }

    #[test]
    fn double_submission_of_reservation_is_rejected() {
        let ledger = Ledger::new();
        let a = ledger.reserve().unwrap();
        ledger.submit_reserved(a, noop(), 1, &[]).unwrap();
        assert_eq!(
            ledger.submit_reserved(a, noop(), 1, &[]).unwrap_err(),
            TaskSystemError::AlreadySubmitted(a)
        );
    }

    #[test]
    fn ready_task_behind_blocked_head_is_claimed() {
        let ledger = Ledger::new();
        let gate = ledger.reserve().unwrap();
        let blocked = ledger.submit(noop(), 1, &[gate], true).unwrap().id();
        let free = ledger.submit(noop(), 1, &[], true).unwrap().id();
        let claim = claim(&ledger);
        assert_eq!(claim.task.id(), free);
        assert_ne!(claim.task.id(), blocked);
    }

    #[test]
    fn dependency_resolves_after_it_left_the_queue() {
        let ledger = Ledger::new();
        let a = ledger.submit(noop(), 1, &[], true).unwrap().id();
        let first = claim(&ledger);
        complete(&ledger, &first);
        assert_eq!(ledger.pending_len(), 0);

        let b = ledger.submit(noop(), 1, &[a], true).unwrap().id();
        assert_eq!(claim(&ledger).task.id(), b);
    }

    #[test]
    fn fully_claimed_task_is_skipped() {
        let ledger = Ledger::new();
        let a = ledger.submit(noop(), 1, &[], true).unwrap().id();
        let b = ledger.submit(noop(), 1, &[], true).unwrap().id();
        assert_eq!(claim(&ledger).task.id(), a);
        assert_eq!(claim(&ledger).task.id(), b);
        assert!(matches!(ledger.try_claim(), Pick::Idle(_)));
    }

    #[test]
    fn zero_subtask_task_completes_when_ready() {
        let ledger = Ledger::new();
        let a = ledger.submit(noop(), 1, &[], true).unwrap();
        let empty = ledger.submit(noop(), 0, &[a.id()], true).unwrap();
        assert_eq!(ledger.pending_len(), 2);

        let first = claim(&ledger);
        complete(&ledger, &first);
        assert!(matches!(ledger.try_claim(), Pick::Idle(_)));
        assert_eq!(ledger.pending_len(), 0);
        assert_eq!(empty.wait(), Ok(()));

        let immediate = ledger.submit(noop(), 0, &[], true).unwrap();
        assert_eq!(immediate.wait(), Ok(()));
    }

    #[test]
    fn generation_moves_on_submission() {
        let ledger = Ledger::new();
        let Pick::Idle(seen) = ledger.try_claim() else {
            panic!("empty ledger must be idle");
        };
        ledger.submit(noop(), 1, &[], true).unwrap();
        // Returns immediately instead of sleeping forever.
        ledger.wait_for_work(seen, IdlePolicy::Sleep);
    }

    #[test]
    fn sync_reports_stall_on_open_reservation() {
        let ledger = Ledger::new();
        let gate = ledger.reserve().unwrap();
        let blocked = ledger.submit(noop(), 1, &[gate], true).unwrap().id();
        assert_eq!(ledger.sync(), Err(TaskSystemError::Stalled(vec![blocked])));
    }

    #[test]
    fn shutdown_discards_idle_task_immediately() {
        let ledger = Ledger::new();
        let task = ledger.submit(noop(), 5, &[], false).unwrap();
        let first = claim(&ledger);
        let second = claim(&ledger);
        complete(&ledger, &first);
        complete(&ledger, &second);
        ledger.request_shutdown();
        assert!(matches!(ledger.try_claim(), Pick::ShutDown));
        assert_eq!(ledger.pending_len(), 0);
        assert_eq!(
            task.wait(),
            Err(TaskSystemError::Discarded {
                task: task.id(),
                unclaimed: 3
            })
        );

        let report = ledger.shutdown_report();
        assert_eq!(report.discarded, vec![task.id()]);
        assert_eq!(report.unclaimed_subtasks, 3);
    }

    #[test]
    fn shutdown_discards_task_once_in_flight_subtasks_return() {
        let ledger = Ledger::new();
        let task = ledger.submit(noop(), 5, &[], true).unwrap();
        let first = claim(&ledger);
        let second = claim(&ledger);
        ledger.request_shutdown();
        assert_eq!(ledger.pending_len(), 1);

        assert_eq!(task.mark_subtask_done(None), SubtaskDone::Pending);
        assert_eq!(second.task.mark_subtask_done(None), SubtaskDone::Drained);
        ledger.discard(&first.task);
        assert_eq!(ledger.pending_len(), 0);
        assert_eq!(
            ledger.sync(),
            Err(TaskSystemError::Abandoned(vec![task.id()]))
        );
        assert_eq!(ledger.shutdown_report().unclaimed_subtasks, 3);
    }

    #[test]
    fn shutdown_leaves_finishing_task_to_its_worker() {
        let ledger = Ledger::new();
        let task = ledger.submit(noop(), 1, &[], true).unwrap();
        let only = claim(&ledger);
        assert_eq!(only.task.mark_subtask_done(None), SubtaskDone::Last);
        // Shutdown lands between the last subtask returning and `finish`.
        ledger.request_shutdown();
        assert_eq!(ledger.pending_len(), 1);
        ledger.finish(&only.task);
        assert_eq!(task.wait(), Ok(()));
        assert!(ledger.shutdown_report().discarded.is_empty());
    }

    #[test]
    fn shutdown_discards_blocked_tasks() {
        let ledger = Ledger::new();
        let gate = ledger.reserve().unwrap();
        let blocked = ledger.submit(noop(), 2, &[gate], true).unwrap().id();
        let empty = ledger.submit(noop(), 0, &[blocked], true).unwrap().id();
        ledger.request_shutdown();
        assert_eq!(ledger.pending_len(), 0);
        assert_eq!(
            ledger.sync(),
            Err(TaskSystemError::Abandoned(vec![blocked, empty]))
        );
        let report = ledger.shutdown_report();
        assert_eq!(report.discarded, vec![blocked, empty]);
        assert_eq!(report.unclaimed_subtasks, 2);
    }
}
