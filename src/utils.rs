use crate::{error::SubtaskFault, task::Runnable, types::TaskId};
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
};

/// Run one subtask, converting a panic into a [`SubtaskFault`].
pub(crate) fn run_guarded(
    work: &dyn Runnable,
    task: TaskId,
    index: usize,
    total: usize,
) -> Option<SubtaskFault> {
    // Faulted tasks are never re-run.
    panic::catch_unwind(AssertUnwindSafe(|| work.run_task(index, total)))
        .err()
        .map(|payload| SubtaskFault {
            task,
            index,
            message: panic_message(payload.as_ref()),
        })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
