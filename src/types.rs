use derive_more::{Display, From, Into};
use indexmap::IndexMap as _IndexMap;
use rustc_hash::FxBuildHasher;
use std::collections::HashSet as _HashSet;

/// Unique identifier of a submitted (or reserved) task.
///
/// Ids are issued in increasing order starting from zero and are never
/// reused. They stay meaningful after the task finishes, so later
/// submissions can depend on tasks that are long gone from the queue.
#[derive(Debug, Display, From, Into, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("task#{_0}")]
#[repr(transparent)]
pub struct TaskId(u64);

impl TaskId {
    /// Position of this id in the ledger's status table. Ids that do not fit
    /// in `usize` map to an index no table can contain.
    pub(crate) fn index(self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }

    pub(crate) fn from_index(index: usize) -> Self {
        Self(u64::try_from(index).expect("TaskId::from_index"))
    }
}

pub(crate) type HashSet<T> = _HashSet<T, FxBuildHasher>;
pub(crate) type IndexMap<K, V> = _IndexMap<K, V, FxBuildHasher>;
