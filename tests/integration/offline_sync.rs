// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for offline-first synchronization.
//!
//! The repository runs against an in-process [`MemoryRemote`]. A second
//! handle to the same remote plays "another device": it writes documents
//! directly and inspects what the repository pushed. Connectivity is flipped
//! through the shared [`ConnectivityObserver`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tasksync::connectivity::ConnectivityObserver;
use tasksync::notify::{RecordingScheduler, Trigger};
use tasksync::remote::{MemoryRemote, RemoteError, RemoteStore, decode_documents};
use tasksync::repository::{OFFLINE_MESSAGE, RepositoryError, RepositoryEvent, TaskRepository};
use tasksync::store::{FileBackend, LocalStore, MemoryBackend};
use tasksync_proto::document::{collection_path, document_path, encode_task};
use tasksync_proto::task::{Priority, Task};

type Repo = TaskRepository<MemoryRemote, RecordingScheduler, MemoryBackend>;

const USER: &str = "alice";

struct Harness {
    repo: Repo,
    remote: MemoryRemote,
    connectivity: ConnectivityObserver,
    scheduler: RecordingScheduler,
    backend: MemoryBackend,
}

fn harness(connected: bool) -> Harness {
    harness_with_backend(connected, MemoryBackend::new())
}

fn harness_with_backend(connected: bool, backend: MemoryBackend) -> Harness {
    let remote = MemoryRemote::new();
    let connectivity = ConnectivityObserver::new(connected);
    let scheduler = RecordingScheduler::new();
    let repo = TaskRepository::new(
        LocalStore::new(backend.clone()),
        scheduler.clone(),
        Arc::new(remote.clone()),
        connectivity.clone(),
    );
    Harness {
        repo,
        remote,
        connectivity,
        scheduler,
        backend,
    }
}

/// Drives the repository until it has nothing outstanding.
///
/// Sleeps between rounds so spawned forwarders and subscriptions get to
/// queue their events before the repository checks for idleness.
async fn settle(repo: &mut Repo) {
    tokio::time::timeout(Duration::from_secs(5), async {
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            repo.run_until_idle().await;
        }
    })
    .await
    .expect("repository did not settle");
}

/// Writes `task` to the remote as another device would.
async fn remote_put(remote: &MemoryRemote, task: &Task) {
    remote
        .set_document(&document_path(USER, &task.id), encode_task(task, Utc::now()))
        .await
        .unwrap();
}

fn remote_tasks(remote: &MemoryRemote) -> Vec<Task> {
    decode_documents(&remote.documents(&collection_path(USER)))
}

// --- Merge scenarios ---

#[tokio::test]
async fn local_only_task_is_repushed_after_empty_snapshot() {
    let mut h = harness(false);
    h.repo.setup_session(USER).await;
    let task = Task::new("T1");
    let id = task.id.clone();
    h.repo.add(task).unwrap();
    assert!(h.repo.is_pending(&id));

    h.connectivity.set_connected(true);
    settle(&mut h.repo).await;

    assert!(h.repo.get(&id).is_some());
    assert!(!h.repo.is_pending(&id));
    let remote = remote_tasks(&h.remote);
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].id, id);
}

#[tokio::test]
async fn remote_copy_wins_over_local() {
    let mut h = harness(true);
    h.repo.setup_session(USER).await;
    settle(&mut h.repo).await;

    let task = Task::new("Buy milk");
    let id = task.id.clone();
    h.repo.add(task.clone()).unwrap();
    settle(&mut h.repo).await;

    let mut elsewhere = task;
    elsewhere.set_completed(true, Utc::now());
    remote_put(&h.remote, &elsewhere).await;
    settle(&mut h.repo).await;

    let merged = h.repo.get(&id).unwrap();
    assert!(merged.is_completed);
    assert_eq!(merged.title, "Buy milk");
    assert!(merged.completed_at.is_some());
}

#[tokio::test]
async fn remote_only_tasks_are_adopted_on_first_sync() {
    let mut h = harness(true);
    let existing = Task::new("from another device");
    remote_put(&h.remote, &existing).await;

    h.repo.setup_session(USER).await;
    settle(&mut h.repo).await;

    assert_eq!(h.repo.len(), 1);
    assert!(h.repo.get(&existing.id).is_some());
    assert!(h.repo.sync_state().last_sync.is_some());
    assert!(!h.repo.sync_state().is_syncing);
}

// --- Pending changes ---

#[tokio::test]
async fn offline_edits_stay_pending_until_reconnect() {
    let mut h = harness(true);
    h.repo.setup_session(USER).await;
    settle(&mut h.repo).await;

    h.connectivity.set_connected(false);
    settle(&mut h.repo).await;

    let a = Task::new("a");
    let b = Task::new("b");
    h.repo.add(a.clone()).unwrap();
    h.repo.add(b.clone()).unwrap();
    assert_eq!(h.repo.pending_ids().len(), 2);
    assert!(remote_tasks(&h.remote).is_empty());

    h.connectivity.set_connected(true);
    settle(&mut h.repo).await;

    assert!(h.repo.pending_ids().is_empty());
    assert_eq!(remote_tasks(&h.remote).len(), 2);
}

#[tokio::test]
async fn failed_push_marks_pending_and_next_sync_clears_it() {
    let mut h = harness(true);
    h.repo.setup_session(USER).await;
    settle(&mut h.repo).await;

    h.remote.set_failing(true);
    let task = Task::new("flaky");
    let id = task.id.clone();
    h.repo.add(task).unwrap();
    settle(&mut h.repo).await;
    assert!(h.repo.is_pending(&id));

    h.remote.set_failing(false);
    h.repo.sync_now().await.unwrap();
    settle(&mut h.repo).await;
    assert!(!h.repo.is_pending(&id));
    assert_eq!(remote_tasks(&h.remote).len(), 1);
}

#[tokio::test]
async fn newer_edit_keeps_pending_when_older_push_lands() {
    let mut h = harness(true);
    h.repo.setup_session(USER).await;
    settle(&mut h.repo).await;

    h.remote.pause();
    let task = Task::new("first");
    let id = task.id.clone();
    h.repo.add(task.clone()).unwrap();

    h.connectivity.set_connected(false);
    let mut edited = task;
    edited.title = "second".to_string();
    h.repo.update(edited).unwrap();
    assert!(h.repo.is_pending(&id));

    // Apply the disconnect before the held push completes, so no snapshot
    // of "first" can come back in.
    tokio::time::sleep(Duration::from_millis(10)).await;
    tokio::time::timeout(Duration::from_secs(5), h.repo.next_event())
        .await
        .unwrap();
    assert!(!h.repo.is_subscribed());

    h.remote.resume();
    settle(&mut h.repo).await;
    // The push of "first" landed, but "second" has not been sent.
    assert!(h.repo.is_pending(&id));
    assert_eq!(h.repo.get(&id).unwrap().title, "second");
}

#[tokio::test]
async fn pending_set_survives_restart() {
    let backend = MemoryBackend::new();
    let mut first = harness_with_backend(false, backend.clone());
    first.repo.setup_session(USER).await;
    let task = Task::new("persisted");
    let id = task.id.clone();
    first.repo.add(task).unwrap();
    drop(first);

    let mut second = harness_with_backend(false, backend);
    second.repo.setup_session(USER).await;
    assert!(second.repo.get(&id).is_some());
    assert!(second.repo.is_pending(&id));
}

#[tokio::test]
async fn file_backend_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let task = Task::new("on disk").with_priority(Priority::High);
    {
        let mut repo = TaskRepository::new(
            LocalStore::new(FileBackend::new(dir.path())),
            RecordingScheduler::new(),
            Arc::new(MemoryRemote::new()),
            ConnectivityObserver::new(false),
        );
        repo.setup_session(USER).await;
        repo.add(task.clone()).unwrap();
    }

    let mut repo = TaskRepository::new(
        LocalStore::new(FileBackend::new(dir.path())),
        RecordingScheduler::new(),
        Arc::new(MemoryRemote::new()),
        ConnectivityObserver::new(false),
    );
    repo.setup_session(USER).await;
    assert_eq!(repo.get(&task.id), Some(&task));
    assert!(repo.is_pending(&task.id));
}

// --- Deletes ---

#[tokio::test]
async fn online_delete_removes_remote_document() {
    let mut h = harness(true);
    h.repo.setup_session(USER).await;
    settle(&mut h.repo).await;

    let task = Task::new("gone soon");
    h.repo.add(task.clone()).unwrap();
    settle(&mut h.repo).await;
    assert_eq!(remote_tasks(&h.remote).len(), 1);

    h.repo.delete(&task.id).unwrap();
    settle(&mut h.repo).await;
    assert!(remote_tasks(&h.remote).is_empty());
    assert!(h.repo.is_empty());
}

#[tokio::test]
async fn offline_delete_reappears_on_next_sync() {
    let mut h = harness(true);
    h.repo.setup_session(USER).await;
    settle(&mut h.repo).await;

    let task = Task::new("zombie");
    h.repo.add(task.clone()).unwrap();
    settle(&mut h.repo).await;

    h.connectivity.set_connected(false);
    settle(&mut h.repo).await;
    h.repo.delete(&task.id).unwrap();
    assert!(h.repo.is_empty());

    h.connectivity.set_connected(true);
    settle(&mut h.repo).await;
    assert!(h.repo.get(&task.id).is_some());
}

#[tokio::test]
async fn delete_right_after_add_stays_deleted() {
    let mut h = harness(true);
    h.repo.setup_session(USER).await;
    settle(&mut h.repo).await;

    let task = Task::new("typo");
    let id = task.id.clone();
    h.repo.add(task).unwrap();
    h.repo.delete(&id).unwrap();
    settle(&mut h.repo).await;

    assert!(h.repo.get(&id).is_none());
    assert!(remote_tasks(&h.remote).is_empty());

    // Later snapshots do not bring it back either.
    let other = Task::new("from another device");
    remote_put(&h.remote, &other).await;
    settle(&mut h.repo).await;
    assert!(h.repo.get(&id).is_none());
    assert!(h.repo.get(&other.id).is_some());
    assert!(remote_tasks(&h.remote).iter().all(|t| t.id != id));
}

#[tokio::test]
async fn snapshot_taken_before_delete_lands_is_ignored() {
    let mut h = harness(true);
    h.repo.setup_session(USER).await;
    settle(&mut h.repo).await;

    let task = Task::new("on its way out");
    h.repo.add(task.clone()).unwrap();
    settle(&mut h.repo).await;

    h.remote.pause();
    h.repo.delete(&task.id).unwrap();
    // The fresh subscription still sees the document.
    h.repo.sync_now().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    tokio::time::timeout(Duration::from_secs(5), h.repo.next_event())
        .await
        .unwrap();
    assert!(h.repo.get(&task.id).is_none());

    h.remote.resume();
    settle(&mut h.repo).await;
    assert!(h.repo.is_empty());
    assert!(remote_tasks(&h.remote).is_empty());
}

#[tokio::test]
async fn snapshot_taken_before_push_lands_keeps_local_edit() {
    let mut h = harness(true);
    h.repo.setup_session(USER).await;
    settle(&mut h.repo).await;

    let task = Task::new("first");
    let id = task.id.clone();
    h.repo.add(task.clone()).unwrap();
    settle(&mut h.repo).await;

    h.remote.pause();
    let mut edited = task;
    edited.title = "second".to_string();
    h.repo.update(edited).unwrap();
    h.repo.sync_now().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    tokio::time::timeout(Duration::from_secs(5), h.repo.next_event())
        .await
        .unwrap();
    assert_eq!(h.repo.get(&id).unwrap().title, "second");

    h.remote.resume();
    settle(&mut h.repo).await;
    assert_eq!(h.repo.get(&id).unwrap().title, "second");
    assert_eq!(remote_tasks(&h.remote)[0].title, "second");
    assert!(!h.repo.is_pending(&id));
}

// --- Sync state ---

#[tokio::test]
async fn sync_while_offline_records_error() {
    let mut h = harness(false);
    h.repo.setup_session(USER).await;

    let result = h.repo.sync_now().await;
    assert!(matches!(result, Err(RepositoryError::Offline)));
    assert_eq!(
        h.repo.sync_state().last_error.as_deref(),
        Some(OFFLINE_MESSAGE)
    );
    assert!(!h.repo.sync_state().is_syncing);
}

#[tokio::test]
async fn sync_without_session_is_a_no_op() {
    let mut h = harness(true);
    h.repo.sync_now().await.unwrap();
    assert!(!h.repo.is_subscribed());
    assert_eq!(h.remote.write_count(), 0);
}

#[tokio::test]
async fn subscription_error_is_recorded() {
    let mut h = harness(true);
    h.repo.setup_session(USER).await;
    settle(&mut h.repo).await;

    h.remote.push_watch_error(
        &collection_path(USER),
        RemoteError::Unavailable("backend down".to_string()),
    );
    // The error arrives as an ordinary event; drive one.
    tokio::time::timeout(Duration::from_secs(5), h.repo.next_event())
        .await
        .unwrap();
    let error = h.repo.sync_state().last_error.clone().unwrap();
    assert!(error.contains("backend down"), "got: {error}");
}

#[tokio::test]
async fn disconnect_drops_subscription() {
    let mut h = harness(true);
    h.repo.setup_session(USER).await;
    settle(&mut h.repo).await;
    assert!(h.repo.is_subscribed());

    h.connectivity.set_connected(false);
    settle(&mut h.repo).await;
    assert!(!h.repo.is_subscribed());

    // Remote changes while offline are not applied.
    remote_put(&h.remote, &Task::new("while away")).await;
    settle(&mut h.repo).await;
    assert!(h.repo.is_empty());
}

// --- Session lifecycle ---

#[tokio::test]
async fn teardown_ignores_late_results() {
    let mut h = harness(true);
    h.repo.setup_session(USER).await;
    settle(&mut h.repo).await;

    h.remote.pause();
    h.repo.add(Task::new("in flight")).unwrap();
    h.repo.teardown_session();
    h.remote.resume();
    settle(&mut h.repo).await;

    assert!(h.repo.is_empty());
    assert!(h.repo.pending_ids().is_empty());
    assert_eq!(h.repo.sync_state().last_sync, None);
    assert!(h.backend.is_empty());
}

#[tokio::test]
async fn switching_users_discards_previous_state() {
    let backend = MemoryBackend::new();
    let mut h = harness_with_backend(false, backend.clone());
    h.repo.setup_session(USER).await;
    h.repo.add(Task::new("alice's")).unwrap();
    drop(h);

    let mut other = harness_with_backend(false, backend);
    other.repo.setup_session("bob").await;
    assert!(other.repo.is_empty());
    assert_eq!(other.repo.session_user(), Some("bob"));
}

#[tokio::test]
async fn tasks_created_before_session_are_adopted() {
    let mut h = harness(false);
    let task = Task::new("early");
    h.repo.add(task.clone()).unwrap();
    h.repo.setup_session(USER).await;
    assert!(h.repo.get(&task.id).is_some());
    assert!(h.repo.is_pending(&task.id));
}

#[tokio::test]
async fn setup_rearms_future_reminders_only() {
    let backend = MemoryBackend::new();
    let future = Task::new("later").with_reminder(Utc::now() + TimeDelta::hours(2));
    let past = Task::new("earlier").with_reminder(Utc::now() - TimeDelta::hours(2));
    {
        let mut h = harness_with_backend(false, backend.clone());
        h.repo.setup_session(USER).await;
        h.repo.add(future.clone()).unwrap();
        h.repo.add(past.clone()).unwrap();
    }

    let mut h = harness_with_backend(false, backend);
    h.repo.setup_session(USER).await;
    assert!(h.scheduler.contains(&future.id.to_string()));
    assert!(!h.scheduler.contains(&past.id.to_string()));
    assert_eq!(h.repo.len(), 2);
}

// --- Restore and backup ---

#[tokio::test]
async fn restore_after_reconnect_keeps_pushed_tasks() {
    let mut h = harness(true);
    h.repo.setup_session(USER).await;
    settle(&mut h.repo).await;

    h.connectivity.set_connected(false);
    settle(&mut h.repo).await;
    let local_only = Task::new("local only");
    h.repo.add(local_only.clone()).unwrap();

    let remote_task = Task::new("remote").with_reminder(Utc::now() + TimeDelta::hours(1));
    remote_put(&h.remote, &remote_task).await;

    // The reconnect sync pushes the local-only task before the restore.
    h.connectivity.set_connected(true);
    settle(&mut h.repo).await;
    let restored = h.repo.restore_from_remote().await.unwrap();

    assert_eq!(restored, 2);
    assert!(h.repo.get(&local_only.id).is_some());
    assert!(h.repo.get(&remote_task.id).is_some());
    assert!(h.scheduler.contains(&remote_task.id.to_string()));
}

#[tokio::test]
async fn restore_drops_local_only_tasks() {
    let mut h = harness(true);
    h.repo.setup_session(USER).await;
    settle(&mut h.repo).await;
    h.connectivity.set_connected(false);
    settle(&mut h.repo).await;

    let local_only = Task::new("local only");
    h.repo.add(local_only.clone()).unwrap();
    let remote_task = Task::new("remote");
    remote_put(&h.remote, &remote_task).await;

    // Restore directly, bypassing the reconnect sync.
    h.connectivity.set_connected(true);
    let restored = h.repo.restore_from_remote().await.unwrap();

    assert_eq!(restored, 1);
    assert!(h.repo.get(&local_only.id).is_none());
    assert!(!h.repo.is_pending(&local_only.id));
    assert!(h.repo.get(&remote_task.id).is_some());
}

#[tokio::test]
async fn restore_and_backup_need_connectivity() {
    let mut h = harness(false);
    h.repo.setup_session(USER).await;
    assert!(matches!(
        h.repo.restore_from_remote().await,
        Err(RepositoryError::Offline)
    ));
    assert!(matches!(
        h.repo.backup_all().await,
        Err(RepositoryError::Offline)
    ));

    let mut no_session = harness(true);
    assert!(matches!(
        no_session.repo.backup_all().await,
        Err(RepositoryError::NoSession)
    ));
}

#[tokio::test]
async fn backup_pushes_everything() {
    let mut h = harness(false);
    h.repo.setup_session(USER).await;
    for title in ["one", "two", "three"] {
        h.repo.add(Task::new(title)).unwrap();
    }

    h.connectivity.set_connected(true);
    let pushed = h.repo.backup_all().await.unwrap();
    assert_eq!(pushed, 3);
    assert!(h.repo.pending_ids().is_empty());
    assert!(h.repo.sync_state().last_sync.is_some());
    settle(&mut h.repo).await;
    assert_eq!(remote_tasks(&h.remote).len(), 3);
}

#[tokio::test]
async fn backup_failure_keeps_tasks_pending() {
    let mut h = harness(false);
    h.repo.setup_session(USER).await;
    let task = Task::new("stuck");
    h.repo.add(task.clone()).unwrap();

    h.remote.set_failing(true);
    h.connectivity.set_connected(true);
    let result = h.repo.backup_all().await;
    assert!(matches!(result, Err(RepositoryError::Remote(_))));
    assert!(h.repo.is_pending(&task.id));
}

// --- Notifications ---

#[tokio::test]
async fn snapshot_changes_reschedule_reminders() {
    let mut h = harness(true);
    h.repo.setup_session(USER).await;
    settle(&mut h.repo).await;

    let at = Utc::now() + TimeDelta::hours(3);
    let task = Task::new("call mom").with_reminder(at);
    h.repo.add(task.clone()).unwrap();
    settle(&mut h.repo).await;

    let moved = at + TimeDelta::hours(1);
    let mut elsewhere = task.clone();
    elsewhere.reminder_at = Some(moved);
    remote_put(&h.remote, &elsewhere).await;
    settle(&mut h.repo).await;

    let entry = h.scheduler.get(&task.id.to_string()).unwrap();
    assert_eq!(entry.trigger, Trigger::At(moved));

    // Completed elsewhere: the reminder goes away.
    elsewhere.set_completed(true, Utc::now());
    remote_put(&h.remote, &elsewhere).await;
    settle(&mut h.repo).await;
    assert!(!h.scheduler.contains(&task.id.to_string()));
}

#[tokio::test]
async fn change_events_reach_subscribers() {
    let mut h = harness(true);
    let mut events = h.repo.subscribe_changes();
    h.repo.setup_session(USER).await;
    settle(&mut h.repo).await;

    remote_put(&h.remote, &Task::new("pushed in")).await;
    settle(&mut h.repo).await;

    let mut saw_tasks_changed = 0;
    let mut saw_synced = false;
    while let Ok(event) = events.try_recv() {
        match event {
            RepositoryEvent::TasksChanged => saw_tasks_changed += 1,
            RepositoryEvent::SyncStateChanged(state) => {
                saw_synced |= state.last_sync.is_some() && !state.is_syncing;
            }
            RepositoryEvent::ReminderFailed { .. } => {}
        }
    }
    // Session start plus the incoming snapshot.
    assert!(saw_tasks_changed >= 2);
    assert!(saw_synced);
}
