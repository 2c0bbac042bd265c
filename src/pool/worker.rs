use crate::{
    config::IdlePolicy,
    ledger::{Claim, Ledger, Pick},
    sync::Arc,
    task::SubtaskDone,
    utils::run_guarded,
};
use tracing::{Span, debug, debug_span, warn};

/// Lifecycle of one pool thread.
#[derive(Debug)]
enum WorkerState {
    /// Looking for a claimable subtask.
    Checking,
    /// Nothing claimable as of the given ledger generation.
    Waiting(u64),
    Executing(Claim),
    Stopped,
}

#[derive(Debug)]
pub(super) struct Worker {
    id: usize,
    ledger: Arc<Ledger>,
    idle_policy: IdlePolicy,
    pool_span: Span,
}

impl Worker {
    pub(super) fn new(
        id: usize,
        ledger: Arc<Ledger>,
        idle_policy: IdlePolicy,
        pool_span: Span,
    ) -> Self {
        Self {
            id,
            ledger,
            idle_policy,
            pool_span,
        }
    }

    /// Thread body. Returns once the ledger has been shut down; a subtask
    /// that was already claimed is always run to completion first, and the
    /// worker returning the last in-flight subtask of an abandoned task
    /// discards it.
    pub(super) fn run(self) {
        let _pool = self.pool_span.enter();
        let _worker = debug_span!("worker", id = self.id).entered();
        debug!("worker started");

        let mut state = WorkerState::Checking;
        loop {
            state = match state {
                WorkerState::Checking => match self.ledger.try_claim() {
                    Pick::Claimed(claim) => WorkerState::Executing(claim),
                    Pick::Idle(generation) => WorkerState::Waiting(generation),
                    Pick::ShutDown => WorkerState::Stopped,
                },
                WorkerState::Waiting(generation) => {
                    self.ledger.wait_for_work(generation, self.idle_policy);
                    WorkerState::Checking
                }
                WorkerState::Executing(claim) => {
                    self.execute(claim);
                    WorkerState::Checking
                }
                WorkerState::Stopped => break,
            };
        }

        debug!("worker stopped");
    }

    fn execute(&self, claim: Claim) {
        let Claim { task, index } = claim;
        let fault = run_guarded(task.work(), task.id(), index, task.total());
        self.ledger.stats().record_subtask(fault.is_some());
        if let Some(fault) = &fault {
            warn!(task = %fault.task, index, message = %fault.message, "subtask panicked");
        }
        match task.mark_subtask_done(fault) {
            SubtaskDone::Pending => {}
            SubtaskDone::Last => self.ledger.finish(&task),
            SubtaskDone::Drained => self.ledger.discard(&task),
        }
    }
}
