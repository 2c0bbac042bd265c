use super::{Eager, TaskSystem};
use crate::{
    error::{SubtaskFault, TaskSystemError},
    task::Runnable,
    types::TaskId,
    utils::run_guarded,
};
use core::sync::atomic::{AtomicUsize, Ordering};
use std::{
    sync::{Mutex, PoisonError},
    thread,
};
use tracing::{debug, warn};

pub(super) const NAME: &str = "Parallel + Always Spawn";

/// Spawns a fresh set of scoped threads for every `run` call. The threads
/// pull subtask indices from a shared counter; the calling thread joins in.
///
/// Asynchronous submissions run to completion before returning. A submission
/// naming a dependency that another thread is still executing waits for it.
#[must_use]
#[derive(Debug)]
pub struct ParallelSpawn {
    num_threads: usize,
    eager: Eager,
}

impl ParallelSpawn {
    /// Use up to `num_threads` threads per call, the caller included.
    pub fn new(num_threads: usize) -> Self {
        Self {
            num_threads: num_threads.max(1),
            eager: Eager::default(),
        }
    }

    fn execute(&self, id: TaskId, work: &dyn Runnable, total: usize) -> Option<SubtaskFault> {
        let next = AtomicUsize::new(0);
        let first_fault: Mutex<Option<SubtaskFault>> = Mutex::new(None);
        let drain = || {
            loop {
                let index = next.fetch_add(1, Ordering::Relaxed);
                if index >= total {
                    break;
                }
                if let Some(fault) = run_guarded(work, id, index, total) {
                    first_fault
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .get_or_insert(fault);
                }
            }
        };

        let helpers = self.num_threads.min(total).saturating_sub(1);
        debug!(task = %id, subtasks = total, threads = helpers + 1, "spawning");
        thread::scope(|scope| {
            for n in 0..helpers {
                let spawned = thread::Builder::new()
                    .name(format!("cts-spawn-{n}"))
                    .spawn_scoped(scope, drain);
                if let Err(err) = spawned {
                    // The calling thread drains whatever is left.
                    warn!(task = %id, error = %err, "failed to spawn helper thread");
                    break;
                }
            }
            drain();
        });

        first_fault
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl TaskSystem for ParallelSpawn {
    fn name(&self) -> &'static str {
        NAME
    }

    fn run(&self, work: Box<dyn Runnable>, num_total_tasks: usize) -> Result<(), TaskSystemError> {
        let id = self.eager.begin(&[])?;
        let fault = self.execute(id, work.as_ref(), num_total_tasks);
        self.eager.end(id, None);
        fault.map_or(Ok(()), |fault| Err(fault.into()))
    }

    fn run_async_with_deps(
        &self,
        work: Box<dyn Runnable>,
        num_total_tasks: usize,
        deps: &[TaskId],
    ) -> Result<TaskId, TaskSystemError> {
        let id = self.eager.begin(deps)?;
        let fault = self.execute(id, work.as_ref(), num_total_tasks);
        self.eager.end(id, fault);
        Ok(id)
    }

    fn sync(&self) -> Result<(), TaskSystemError> {
        self.eager.sync()
    }
}
