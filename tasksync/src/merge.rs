//! Pure snapshot merge.
//!
//! Record-granularity, remote-wins reconciliation of the local collection
//! with a remote snapshot:
//!
//! 1. Every remote record is taken as-is, replacing any local record with
//!    the same id.
//! 2. Every local record whose id is absent remotely survives and is
//!    reported in [`MergeOutcome::repush`] so the caller can upload it.
//!
//! There is no tombstone: a record deleted remotely but still present
//! locally is indistinguishable from a record never uploaded, so it
//! survives and is re-pushed.

use std::collections::HashMap;
use std::hash::BuildHasher;

use tasksync_proto::task::{Task, TaskId};

/// Result of [`merge_tasks`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// The merged collection.
    pub tasks: HashMap<TaskId, Task>,
    /// Ids of local-only survivors that must be uploaded, sorted.
    pub repush: Vec<TaskId>,
}

/// Merges a remote snapshot into a copy of the local collection.
///
/// Neither input is modified. If `remote` lists an id more than once, the
/// last occurrence wins.
#[must_use]
pub fn merge_tasks<S: BuildHasher>(
    local: &HashMap<TaskId, Task, S>,
    remote: &[Task],
) -> MergeOutcome {
    let mut tasks: HashMap<TaskId, Task> = remote
        .iter()
        .map(|task| (task.id.clone(), task.clone()))
        .collect();

    let mut repush = Vec::new();
    for (id, task) in local {
        if !tasks.contains_key(id) {
            tasks.insert(id.clone(), task.clone());
            repush.push(id.clone());
        }
    }
    repush.sort();

    MergeOutcome { tasks, repush }
}
