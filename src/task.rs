use crate::{
    error::{SubtaskFault, TaskSystemError},
    ledger::TaskStatus,
    sync::{Condvar, Mutex, lock, wait},
    types::TaskId,
};
use derive_more::Debug;

/// A bulk unit of work, split into `total` independently executable
/// subtasks.
///
/// `run_task` may be called concurrently from several threads for distinct
/// `index` values in `0..total`, in no particular order. Every index is
/// executed exactly once. Any writes to caller-owned buffers must be made
/// race-free across indices by the implementation.
///
/// A panic inside `run_task` is recorded as a
/// [`SubtaskFault`] against the owning task; it never takes down a worker.
pub trait Runnable: Send + Sync {
    /// Execute subtask `index` of `total`.
    fn run_task(&self, index: usize, total: usize);
}

impl<F> Runnable for F
where
    F: Fn(usize, usize) + Send + Sync,
{
    fn run_task(&self, index: usize, total: usize) {
        self(index, total);
    }
}

/// How a task left the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    Complete,
    Faulted(SubtaskFault),
    Discarded { unclaimed: usize },
}

impl Outcome {
    pub(crate) fn status(&self) -> TaskStatus {
        match self {
            Self::Complete => TaskStatus::Complete,
            Self::Faulted(fault) => TaskStatus::Faulted(Box::new(fault.clone())),
            &Self::Discarded { unclaimed } => TaskStatus::Discarded { unclaimed },
        }
    }

    fn into_result(self, task: TaskId) -> Result<(), TaskSystemError> {
        match self {
            Self::Complete => Ok(()),
            Self::Faulted(fault) => Err(TaskSystemError::WorkerFault(fault)),
            Self::Discarded { unclaimed } => Err(TaskSystemError::Discarded { task, unclaimed }),
        }
    }
}

#[derive(Debug, Default)]
struct Progress {
    /// Next subtask index to hand out.
    claimed: usize,
    /// Subtasks that returned (or panicked).
    completed: usize,
    /// First fault observed, if any.
    fault: Option<SubtaskFault>,
    /// Shutdown caught the task with subtasks in flight; the worker that
    /// returns the last of them discards the rest.
    abandoned: bool,
    /// Set exactly once, by the ledger.
    outcome: Option<Outcome>,
}

/// What a worker has to do after one of its subtasks returned.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum SubtaskDone {
    /// Other subtasks are still unclaimed or running.
    Pending,
    /// Every subtask has returned; retire the task.
    Last,
    /// Shutdown abandoned the task and no subtask is running any more;
    /// discard the unclaimed rest.
    Drained,
}

/// One submitted bulk job.
///
/// Records are shared between the ledger and the threads working on them;
/// the record (and the work it owns) is dropped once it has left the ledger
/// and the last worker has let go of it.
#[must_use]
#[derive(Debug)]
pub(crate) struct Task {
    id: TaskId,
    total: usize,
    deps: Vec<TaskId>,
    /// Whether faults and discards are reported by `sync` rather than only
    /// to a blocked `run` caller.
    detached: bool,
    #[debug(skip)]
    work: Box<dyn Runnable>,
    progress: Mutex<Progress>,
    finished: Condvar,
}

impl Task {
    pub(crate) fn new(
        id: TaskId,
        work: Box<dyn Runnable>,
        total: usize,
        deps: Vec<TaskId>,
        detached: bool,
    ) -> Self {
        Self {
            id,
            total,
            deps,
            detached,
            work,
            progress: Mutex::new(Progress::default()),
            finished: Condvar::new(),
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn total(&self) -> usize {
        self.total
    }

    pub(crate) fn deps(&self) -> &[TaskId] {
        &self.deps
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.detached
    }

    pub(crate) fn work(&self) -> &dyn Runnable {
        self.work.as_ref()
    }

    /// A task is ready once every dependency has finished, successfully or
    /// not. Dependencies order execution; they do not pass data.
    pub(crate) fn is_ready(&self, statuses: &[TaskStatus]) -> bool {
        self.deps
            .iter()
            .all(|dep| statuses.get(dep.index()).is_some_and(|s| s.is_finished()))
    }

    /// Hand out the next unclaimed subtask index. Each index is returned to
    /// exactly one caller.
    pub(crate) fn claim_next_subtask(&self) -> Option<usize> {
        let mut progress = lock(&self.progress);
        if progress.claimed < self.total {
            let index = progress.claimed;
            progress.claimed += 1;
            Some(index)
        } else {
            None
        }
    }

    pub(crate) fn has_unclaimed(&self) -> bool {
        lock(&self.progress).claimed < self.total
    }

    pub(crate) fn unclaimed(&self) -> usize {
        self.total - lock(&self.progress).claimed
    }

    /// Record that a claimed subtask returned. At most one call per task
    /// yields something other than [`SubtaskDone::Pending`].
    pub(crate) fn mark_subtask_done(&self, fault: Option<SubtaskFault>) -> SubtaskDone {
        let mut progress = lock(&self.progress);
        assert!(
            progress.completed < progress.claimed,
            "Task::mark_subtask_done: [1]"
        );
        progress.completed += 1;
        if progress.fault.is_none() {
            progress.fault = fault;
        }
        if progress.completed == self.total {
            SubtaskDone::Last
        } else if progress.abandoned && progress.completed == progress.claimed {
            SubtaskDone::Drained
        } else {
            SubtaskDone::Pending
        }
    }

    /// Called under the ledger lock once shutdown stops new claims. Returns
    /// `true` if the task can be discarded right away. Otherwise the task is
    /// either about to be retired by the worker that ran its final subtask,
    /// or it is flagged so that [`Task::mark_subtask_done`] reports
    /// [`SubtaskDone::Drained`] once its in-flight subtasks return.
    pub(crate) fn abandon(&self) -> bool {
        let mut progress = lock(&self.progress);
        if progress.completed < progress.claimed {
            progress.abandoned = true;
            false
        } else {
            self.total == 0 || progress.completed < self.total
        }
    }

    /// The outcome for a task whose every subtask has returned.
    pub(crate) fn finished_outcome(&self) -> Outcome {
        match lock(&self.progress).fault.clone() {
            Some(fault) => Outcome::Faulted(fault),
            None => Outcome::Complete,
        }
    }

    /// Publish the final outcome and wake every waiter.
    pub(crate) fn complete(&self, outcome: Outcome) {
        let mut progress = lock(&self.progress);
        assert!(progress.outcome.is_none(), "Task::complete: [1]");
        progress.outcome = Some(outcome);
        drop(progress);
        self.finished.notify_all();
    }

    /// Block until the task has an outcome. Returns immediately if it
    /// already has one.
    pub(crate) fn wait(&self) -> Result<(), TaskSystemError> {
        let mut progress = lock(&self.progress);
        loop {
            if let Some(outcome) = &progress.outcome {
                return outcome.clone().into_result(self.id);
            }
            progress = wait(&self.finished, progress);
        }
    }
}
