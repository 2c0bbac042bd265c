use super::{Eager, TaskSystem};
use crate::{
    error::{SubtaskFault, TaskSystemError},
    task::Runnable,
    types::TaskId,
    utils::run_guarded,
};
use tracing::debug;

pub(super) const NAME: &str = "Serial";

/// Runs every subtask on the calling thread, in index order.
#[must_use]
#[derive(Debug, Default)]
pub struct Serial {
    eager: Eager,
}

impl Serial {
    /// Create a serial task system.
    pub fn new() -> Self {
        Self::default()
    }

    fn execute(&self, id: TaskId, work: &dyn Runnable, total: usize) -> Option<SubtaskFault> {
        debug!(task = %id, subtasks = total, "running serially");
        let mut first_fault = None;
        for index in 0..total {
            if let Some(fault) = run_guarded(work, id, index, total) {
                first_fault.get_or_insert(fault);
            }
        }
        first_fault
    }
}

impl TaskSystem for Serial {
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
