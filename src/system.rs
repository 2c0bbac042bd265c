mod serial;
mod spawn;

pub use self::{serial::Serial, spawn::ParallelSpawn};
use crate::{
    config::{IdlePolicy, PoolConfig},
    error::{DependencyError, SubtaskFault, TaskSystemError},
    pool::TaskPool,
    task::Runnable,
    types::{HashSet, TaskId},
};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Common interface of every scheduling strategy.
///
/// All methods take `&self` and may be called concurrently from several
/// threads. Calling `run` or `sync` from inside a [`Runnable`] executing on
/// the same task system can deadlock and is not supported.
pub trait TaskSystem: Send + Sync {
    /// Static, human-readable name of the strategy.
    fn name(&self) -> &'static str;

    /// Execute subtasks `0..num_total_tasks` of `work` and return once all
    /// of them have finished.
    ///
    /// # Errors
    /// [`TaskSystemError::WorkerFault`] with the first panic if any subtask
    /// panicked (all subtasks are still attempted),
    /// [`TaskSystemError::Discarded`] if shutdown dropped the task, and
    /// [`TaskSystemError::ShutDown`] if the system no longer accepts work.
    fn run(&self, work: Box<dyn Runnable>, num_total_tasks: usize) -> Result<(), TaskSystemError>;

    /// Submit `work` to run once every task in `deps` has finished, without
    /// waiting for it. The returned id may appear in later `deps` lists.
    ///
    /// # Errors
    /// [`TaskSystemError::InvalidDependency`] if `deps` names an id this
    /// system never issued; nothing is enqueued in that case.
    fn run_async_with_deps(
        &self,
        work: Box<dyn Runnable>,
        num_total_tasks: usize,
        deps: &[TaskId],
    ) -> Result<TaskId, TaskSystemError>;

    /// Block until every task submitted so far has finished, including
    /// submissions still executing on other threads.
    ///
    /// # Errors
    /// Reports asynchronous work that went wrong since the previous `sync`:
    /// [`TaskSystemError::Abandoned`], [`TaskSystemError::Faulted`], or
    /// [`TaskSystemError::Stalled`] if pending tasks wait on reservations that
    /// were never submitted.
    fn sync(&self) -> Result<(), TaskSystemError>;
}

impl std::fmt::Debug for dyn TaskSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TaskSystem").field(&self.name()).finish()
    }
}

/// Build the strategy called `name`.
///
/// Accepts the strategy's [`TaskSystem::name`] or one of the short aliases
/// `serial`, `spawn`, `spin` and `sleep`. Pool strategies take their worker
/// count and thread names from `config`; its idle policy is overridden by the
/// strategy.
///
/// # Errors
/// [`TaskSystemError::UnknownStrategy`] for an unrecognised name and
/// [`TaskSystemError::Spawn`] if pool workers cannot be started.
pub fn strategy_by_name(
    name: &str,
    config: &PoolConfig,
) -> Result<Box<dyn TaskSystem>, TaskSystemError> {
    let pool = |idle_policy| {
        let config = config.clone().idle_policy(idle_policy);
        TaskPool::start(&config).map(|pool| Box::new(pool) as Box<dyn TaskSystem>)
    };
    match name {
        "serial" | serial::NAME => Ok(Box::new(Serial::new())),
        "spawn" | spawn::NAME => Ok(Box::new(ParallelSpawn::new(
            config.resolved_worker_threads(),
        ))),
        "spin" | crate::pool::SPINNING_NAME => pool(IdlePolicy::Spin),
        "sleep" | crate::pool::SLEEPING_NAME => pool(IdlePolicy::Sleep),
        _ => Err(TaskSystemError::UnknownStrategy(name.to_owned())),
    }
}

/// Id and fault bookkeeping for strategies that execute every task on the
/// submitting thread. A task is in flight from [`Eager::begin`] until
/// [`Eager::end`]; `sync` and dependents wait for in-flight tasks.
#[derive(Debug, Default)]
struct Eager {
    state: Mutex<EagerState>,
    /// Signalled whenever a task leaves the in-flight set.
    settled: Condvar,
}

#[derive(Debug, Default)]
struct EagerState {
    issued: u64,
    in_flight: HashSet<TaskId>,
    unreported_faults: Vec<SubtaskFault>,
}

impl Eager {
    fn lock(&self) -> MutexGuard<'_, EagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, EagerState>) -> MutexGuard<'a, EagerState> {
        self.settled
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate `deps`, wait until every one of them has finished, then
    /// issue the next id.
    fn begin(&self, deps: &[TaskId]) -> Result<TaskId, DependencyError> {
        let mut state = self.lock();
        if let Some(&dependency) = deps.iter().find(|&&dep| u64::from(dep) >= state.issued) {
            return Err(DependencyError::Unknown { dependency });
        }
        while deps.iter().any(|dep| state.in_flight.contains(dep)) {
            state = self.wait(state);
        }
        let id = TaskId::from(state.issued);
        state.issued += 1;
        state.in_flight.insert(id);
        Ok(id)
    }

    /// Retire `id`. `fault` is kept for the next `sync`.
    fn end(&self, id: TaskId, fault: Option<SubtaskFault>) {
        let mut state = self.lock();
        state.in_flight.remove(&id);
        state.unreported_faults.extend(fault);
        drop(state);
        self.settled.notify_all();
    }

    fn sync(&self) -> Result<(), TaskSystemError> {
        let mut state = self.lock();
        while !state.in_flight.is_empty() {
            state = self.wait(state);
        }
        let faults = std::mem::take(&mut state.unreported_faults);
        if faults.is_empty() {
            Ok(())
        } else {
            Err(TaskSystemError::Faulted(faults))
        }
    }
}
