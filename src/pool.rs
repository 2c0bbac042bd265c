mod worker;

pub use crate::ledger::ShutdownReport;
use crate::{
    config::{IdlePolicy, PoolConfig},
    error::TaskSystemError,
    ledger::Ledger,
    pool::worker::Worker,
    stats::PoolStatsSnapshot,
    sync::{Arc, JoinHandle, spawn_named},
    system::TaskSystem,
    task::Runnable,
    types::TaskId,
};
use derive_more::Debug;
use tracing::{Span, error, info, info_span};

pub(crate) const SPINNING_NAME: &str = "Parallel + Thread Pool + Spin";
pub(crate) const SLEEPING_NAME: &str = "Parallel + Thread Pool + Sleep";

/// Fixed pool of worker threads executing dependency-ordered bulk tasks.
///
/// Workers are started by [`TaskPool::start`] and live until
/// [`TaskPool::shutdown`] (or drop). Every submitted task goes through a
/// shared ledger:
/// - Submission validates the dependency ids, assigns the next id and
///   enqueues the task without waiting for it.
/// - Workers repeatedly claim one subtask of the oldest task whose
///   dependencies have all finished, run it outside any lock, and the worker
///   that completes the final subtask retires the task.
/// - Retired tasks stay in the ledger's completion table, so later
///   submissions can depend on them no matter how long ago they finished.
///
/// Shutdown stops new claims and discards every pending task as soon as none
/// of its subtasks is running; subtasks that already started run to
/// completion. Callers blocked in `run`, `sync` or [`TaskPool::wait`] are
/// woken with the outcome. See [`ShutdownReport`].
#[must_use]
#[derive(Debug)]
pub struct TaskPool {
    name: &'static str,
    ledger: Arc<Ledger>,
    #[debug(skip)]
    workers: Vec<JoinHandle<()>>,
    span: Span,
    stopped: bool,
}

impl TaskPool {
    /// Start `config.resolved_worker_threads()` workers.
    ///
    /// # Errors
    /// [`TaskSystemError::Spawn`] if a worker thread cannot be created. The
    /// workers started so far are shut down again.
    pub fn start(config: &PoolConfig) -> Result<Self, TaskSystemError> {
        let num_workers = config.resolved_worker_threads();
        let name = match config.idle_policy {
            IdlePolicy::Spin => SPINNING_NAME,
            IdlePolicy::Sleep => SLEEPING_NAME,
        };
        let span = info_span!("task_pool", strategy = name, threads = num_workers);
        let mut pool = Self {
            name,
            ledger: Arc::new(Ledger::new()),
            workers: Vec::with_capacity(num_workers),
            span,
            stopped: false,
        };
        for id in 0..num_workers {
            let worker = Worker::new(
                id,
                Arc::clone(&pool.ledger),
                config.idle_policy,
                pool.span.clone(),
            );
            let thread_name = format!("{}-{id}", config.thread_name_prefix);
            match spawn_named(thread_name, move || worker.run()) {
                Ok(handle) => pool.workers.push(handle),
                Err(err) => {
                    let _report = pool.stop();
                    return Err(TaskSystemError::Spawn(err.to_string()));
                }
            }
        }
        pool.span
            .in_scope(|| info!(workers = num_workers, "task pool started"));
        Ok(pool)
    }

    /// Issue an id now and submit its task later with
    /// [`TaskPool::submit_reserved`]. Other tasks may depend on the id in the
    /// meantime; they stay blocked until the reserved task finishes.
    ///
    /// # Errors
    /// [`TaskSystemError::ShutDown`] after shutdown.
    pub fn reserve(&self) -> Result<TaskId, TaskSystemError> {
        self.ledger.reserve()
    }

    /// Submit the task for a reserved id.
    ///
    /// # Errors
    /// - [`TaskSystemError::InvalidDependency`] if `deps` names an unknown id
    ///   or would make the task wait for itself. The reservation stays open.
    /// - [`TaskSystemError::UnknownTask`] or
    ///   [`TaskSystemError::AlreadySubmitted`] if `id` is not an open
    ///   reservation.
    /// - [`TaskSystemError::ShutDown`] after shutdown.
    pub fn submit_reserved(
        &self,
        id: TaskId,
        work: Box<dyn Runnable>,
        num_total_tasks: usize,
        deps: &[TaskId],
    ) -> Result<(), TaskSystemError> {
        self.ledger
            .submit_reserved(id, work, num_total_tasks, deps)
            .map(drop)
    }

    /// Block until task `id` has finished.
    ///
    /// # Errors
    /// The task's outcome, as for [`TaskSystem::run`], or
    /// [`TaskSystemError::UnknownTask`] if `id` was never submitted.
    pub fn wait(&self, id: TaskId) -> Result<(), TaskSystemError> {
        self.ledger.wait(id)
    }

    /// Snapshot of this pool's counters.
    #[must_use]
    pub fn stats(&self) -> PoolStatsSnapshot {
        self.ledger.stats().snapshot()
    }

    /// Number of submitted tasks that have not finished yet.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.ledger.pending_len()
    }

    /// Number of worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stop the pool: refuse new claims and submissions, discard pending
    /// work (see [`TaskPool::request_shutdown`]) and join every worker.
    pub fn shutdown(mut self) -> ShutdownReport {
        self.stop()
    }

    /// Signal shutdown without waiting for the workers.
    ///
    /// No subtask is claimed afterwards. Tasks with no subtask running are
    /// discarded immediately, the others as soon as their running subtasks
    /// return. Blocked `run`/[`TaskPool::wait`] callers of discarded tasks
    /// get [`TaskSystemError::Discarded`], and `sync` returns
    /// [`TaskSystemError::Abandoned`] for discarded asynchronous tasks.
    /// [`TaskPool::shutdown`] still has to be called (or the pool dropped)
    /// to join the workers.
    pub fn request_shutdown(&self) {
        self.ledger.request_shutdown();
    }

    fn stop(&mut self) -> ShutdownReport {
        if self.stopped {
            return ShutdownReport::default();
        }
        self.stopped = true;
        let _entered = self.span.enter();
        self.ledger.request_shutdown();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked outside of a subtask");
            }
        }
        let report = self.ledger.shutdown_report();
        info!(
            discarded = report.discarded.len(),
            unclaimed_subtasks = report.unclaimed_subtasks,
            "task pool stopped",
        );
        report
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        let _report = self.stop();
    }
}

impl TaskSystem for TaskPool {
    fn name(&self) -> &'static str {
        self.name
    }

    fn run(&self, work: Box<dyn Runnable>, num_total_tasks: usize) -> Result<(), TaskSystemError> {
        self.ledger
            .submit(work, num_total_tasks, &[], false)?
            .wait()
    }

    fn run_async_with_deps(
        &self,
        work: Box<dyn Runnable>,
        num_total_tasks: usize,
        deps: &[TaskId],
    ) -> Result<TaskId, TaskSystemError> {
        let task = self.ledger.submit(work, num_total_tasks, deps, true)?;
        Ok(task.id())
    }

    fn sync(&self) -> Result<(), TaskSystemError> {
        self.ledger.sync()
    }
}
