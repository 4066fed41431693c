//! Property-based tests for snapshot merging.
//!
//! Uses proptest to verify, for arbitrary local and remote collections:
//! 1. Every remote task is in the result exactly as the remote has it.
//! 2. Local tasks absent remotely survive unchanged and are marked for re-push.
//! 3. The result holds no ids beyond the union of both sides.
//! 4. Merging the same snapshot twice changes nothing the second time.

use std::collections::{HashMap, HashSet};

use chrono::DateTime;
use proptest::prelude::*;
use tasksync::merge::merge_tasks;
use tasksync_proto::task::{Task, TaskId};
use uuid::Uuid;

/// Small id space so local and remote overlap often.
fn arb_task() -> impl Strategy<Value = Task> {
    (0u128..16, "[a-z]{1,12}", any::<bool>(), 0i64..1_000_000).prop_map(
        |(id, title, completed, secs)| {
            let at = DateTime::from_timestamp(secs, 0).unwrap_or_default();
            let mut task = Task::new_at(title, at);
            task.id = TaskId::from_uuid(Uuid::from_u128(id));
            task.set_completed(completed, at);
            task
        },
    )
}

fn arb_local() -> impl Strategy<Value = HashMap<TaskId, Task>> {
    prop::collection::vec(arb_task(), 0..12)
        .prop_map(|tasks| tasks.into_iter().map(|t| (t.id.clone(), t)).collect())
}

/// Remote snapshots with unique ids, as a real collection has.
fn arb_remote() -> impl Strategy<Value = Vec<Task>> {
    prop::collection::vec(arb_task(), 0..12).prop_map(|tasks| {
        let mut seen = HashSet::new();
        tasks
            .into_iter()
            .filter(|t| seen.insert(t.id.clone()))
            .collect()
    })
}

proptest! {
    #[test]
    fn remote_always_wins(local in arb_local(), remote in arb_remote()) {
        let outcome = merge_tasks(&local, &remote);
        for task in &remote {
            prop_assert_eq!(outcome.tasks.get(&task.id), Some(task));
        }
    }

    #[test]
    fn local_only_tasks_survive_and_repush(local in arb_local(), remote in arb_remote()) {
        let outcome = merge_tasks(&local, &remote);
        let remote_ids: HashSet<&TaskId> = remote.iter().map(|t| &t.id).collect();

        let mut expected: Vec<TaskId> = local
            .keys()
            .filter(|id| !remote_ids.contains(id))
            .cloned()
            .collect();
        expected.sort();
        prop_assert_eq!(&outcome.repush, &expected);
        for id in &expected {
            prop_assert_eq!(outcome.tasks.get(id), local.get(id));
        }
    }

    #[test]
    fn result_is_the_union(local in arb_local(), remote in arb_remote()) {
        let outcome = merge_tasks(&local, &remote);
        let union: HashSet<&TaskId> = local.keys().chain(remote.iter().map(|t| &t.id)).collect();
        let result: HashSet<&TaskId> = outcome.tasks.keys().collect();
        prop_assert_eq!(result, union);
    }

    #[test]
    fn merge_is_idempotent(local in arb_local(), remote in arb_remote()) {
        let once = merge_tasks(&local, &remote);
        let twice = merge_tasks(&once.tasks, &remote);
        prop_assert_eq!(&once.tasks, &twice.tasks);
        prop_assert_eq!(once.repush, twice.repush);
    }
}
