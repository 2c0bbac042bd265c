use crate::types::TaskId;
use thiserror::Error;

/// Reason a dependency list was rejected at submission time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DependencyError {
    /// The dependency id was never issued by this task system.
    #[error("{dependency} was never issued")]
    Unknown {
        /// The offending dependency.
        dependency: TaskId,
    },
    /// Depending on `dependency` would make `task` (transitively) wait for
    /// itself.
    #[error("{task} depending on {dependency} forms a cycle")]
    Cycle {
        /// The task being submitted.
        task: TaskId,
        /// The dependency through which the cycle closes.
        dependency: TaskId,
    },
}

/// A subtask that panicked while executing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("subtask {index} of {task} panicked: {message}")]
pub struct SubtaskFault {
    /// Task the subtask belongs to.
    pub task: TaskId,
    /// Index of the faulting subtask.
    pub index: usize,
    /// Panic payload rendered as text.
    pub message: String,
}

/// Errors surfaced by [`TaskSystem`](crate::system::TaskSystem)
/// implementations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TaskSystemError {
    /// The dependency list was rejected; nothing was enqueued.
    #[error("invalid dependency: {0}")]
    InvalidDependency(#[from] DependencyError),
    /// The id does not name a task issued by this task system.
    #[error("{0} is not known to this task system")]
    UnknownTask(TaskId),
    /// A reserved id was submitted twice, or the id was never reserved.
    #[error("{0} is not an open reservation")]
    AlreadySubmitted(TaskId),
    /// A subtask of the awaited task panicked. The remaining subtasks still
    /// ran.
    #[error(transparent)]
    WorkerFault(#[from] SubtaskFault),
    /// Subtasks of asynchronously submitted tasks panicked since the last
    /// `sync`.
    #[error("{} subtask(s) panicked", .0.len())]
    Faulted(Vec<SubtaskFault>),
    /// The awaited task was dropped by shutdown before all its subtasks
    /// were claimed.
    #[error("{task} was discarded at shutdown with {unclaimed} unclaimed subtask(s)")]
    Discarded {
        /// The discarded task.
        task: TaskId,
        /// Subtasks that never started.
        unclaimed: usize,
    },
    /// Asynchronously submitted tasks were discarded at shutdown.
    #[error("{} task(s) were discarded at shutdown", .0.len())]
    Abandoned(Vec<TaskId>),
    /// The task system no longer accepts work.
    #[error("task system is shut down")]
    ShutDown,
    /// Pending tasks wait, directly or transitively, on reservations that
    /// were never submitted.
    #[error("{} pending task(s) can never become ready", .0.len())]
    Stalled(Vec<TaskId>),
    /// No scheduling strategy goes by this name.
    #[error("unknown task system strategy {0:?}")]
    UnknownStrategy(String),
    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}
