//! Task repository: the facade the application talks to.
//!
//! `TaskRepository` owns the in-memory task collection, the pending-change
//! set and the sync state. It is driven through `&mut self` from a single
//! task. Network work runs in spawned tasks that report back over an
//! internal channel; results are applied by [`TaskRepository::next_event`]
//! or [`TaskRepository::run_until_idle`], and only if they belong to the
//! current session epoch.
//!
//! Mutations work with or without a bound session. Without one (or while
//! offline) the push is skipped and the id is recorded as pending.

mod sync;
pub mod views;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use tasksync_proto::task::{MAX_TASKS_PER_USER, Task, TaskError, TaskId};

use crate::connectivity::{ConnectivityEvent, ConnectivityObserver};
use crate::notify::{DAILY_SUMMARY_ID, Notification, NotificationScheduler, NotifyError, Trigger};
use crate::remote::{RemoteError, RemoteStore, RemoteSyncClient};
use crate::stats::TaskStatistics;
use crate::store::{KeyValueBackend, LocalStore};

/// `last_error` text when a sync is attempted while disconnected.
pub const OFFLINE_MESSAGE: &str = "No internet connection";

/// Capacity of the change-notification broadcast channel.
const CHANGE_BUFFER: usize = 64;

/// Errors returned by repository operations.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// The task breaks a field constraint.
    #[error("invalid task: {0}")]
    Invalid(#[from] TaskError),

    /// A task with this id already exists.
    #[error("task {0} already exists")]
    DuplicateId(TaskId),

    /// The per-user task cap is reached.
    #[error("cannot hold more than {max} tasks")]
    TooManyTasks {
        /// The cap.
        max: usize,
    },

    /// No task with this id. Benign.
    #[error("task {0} not found")]
    NotFound(TaskId),

    /// The operation needs connectivity.
    #[error("no internet connection")]
    Offline,

    /// The operation needs a bound session.
    #[error("no active session")]
    NoSession,

    /// The remote store failed a whole-collection operation.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The notification scheduler refused a request.
    #[error(transparent)]
    Notify(#[from] NotifyError),
}

/// Progress of synchronization with the remote store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    /// Time of the last successful sync.
    pub last_sync: Option<DateTime<Utc>>,
    pub is_syncing: bool,
    /// Whole-sync failure, cleared on the next attempt.
    pub last_error: Option<String>,
}

/// State-change notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryEvent {
    /// The task collection changed.
    TasksChanged,
    /// The sync state changed; carries the new value.
    SyncStateChanged(SyncState),
    /// A reminder could not be scheduled. The mutation itself succeeded.
    ReminderFailed { id: String, reason: String },
}

/// Results of asynchronous work, tagged with the epoch they started under.
#[derive(Debug)]
enum SyncEvent {
    Pushed {
        epoch: u64,
        id: TaskId,
        revision: u64,
        result: Result<(), RemoteError>,
    },
    Deleted {
        epoch: u64,
        id: TaskId,
        result: Result<(), RemoteError>,
    },
    Snapshot {
        epoch: u64,
        /// Which subscription delivered it; superseded ones are ignored.
        seq: u64,
        result: Result<Vec<Task>, RemoteError>,
    },
    Connectivity {
        epoch: u64,
        event: ConnectivityEvent,
    },
}

/// Progress of a remote delete, used to keep stale snapshots from bringing
/// the task back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deletion {
    /// Sent, not yet acknowledged.
    InFlight,
    /// Acknowledged; forgotten once a snapshot without the id arrives.
    Confirmed,
}

/// A bound user session.
struct Session<R: RemoteStore> {
    user_id: String,
    client: RemoteSyncClient<R>,
    /// Forwards connectivity transitions into the event channel.
    connectivity_task: JoinHandle<()>,
}

impl<R: RemoteStore> Drop for Session<R> {
    fn drop(&mut self) {
        self.connectivity_task.abort();
    }
}

/// Offline-first task repository.
pub struct TaskRepository<R: RemoteStore, N: NotificationScheduler, B: KeyValueBackend> {
    store: LocalStore<B>,
    scheduler: N,
    remote: Arc<R>,
    connectivity: ConnectivityObserver,
    session: Option<Session<R>>,
    /// Bumped on every session change; stale async results are dropped.
    epoch: u64,
    tasks: HashMap<TaskId, Task>,
    pending: HashSet<TaskId>,
    /// Local edit counter per task. A push success only clears the pending
    /// mark if no newer edit happened meanwhile.
    revisions: HashMap<TaskId, u64>,
    sync_state: SyncState,
    events_tx: mpsc::UnboundedSender<SyncEvent>,
    events_rx: mpsc::UnboundedReceiver<SyncEvent>,
    changes: broadcast::Sender<RepositoryEvent>,
    /// Spawned push/delete requests of this epoch not yet reported.
    in_flight: usize,
    /// A subscription was opened and its first snapshot has not arrived.
    awaiting_snapshot: bool,
    /// Bumped whenever a subscription is opened or dropped.
    subscription_seq: u64,
    /// Ids whose remote delete has not yet shown up in a snapshot.
    deleting: HashMap<TaskId, Deletion>,
    /// Spawned pushes per id not yet reported.
    pushing: HashMap<TaskId, usize>,
    /// Last spawned remote write per id. The next write for the same id
    /// waits for it, so the remote sees them in order.
    writes: HashMap<TaskId, JoinHandle<()>>,
}

impl<R, N, B> TaskRepository<R, N, B>
where
    R: RemoteStore,
    N: NotificationScheduler,
    B: KeyValueBackend,
{
    /// Creates a repository with no bound session and an empty collection.
    #[must_use]
    pub fn new(
        store: LocalStore<B>,
        scheduler: N,
        remote: Arc<R>,
        connectivity: ConnectivityObserver,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            store,
            scheduler,
            remote,
            connectivity,
            session: None,
            epoch: 0,
            tasks: HashMap::new(),
            pending: HashSet::new(),
            revisions: HashMap::new(),
            sync_state: SyncState::default(),
            events_tx,
            events_rx,
            changes,
            in_flight: 0,
            awaiting_snapshot: false,
            subscription_seq: 0,
            deleting: HashMap::new(),
            pushing: HashMap::new(),
            writes: HashMap::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Inserts a new task, persists it and pushes it (or marks it pending).
    /// Schedules its reminder if one is set.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Invalid`], [`RepositoryError::DuplicateId`] or
    /// [`RepositoryError::TooManyTasks`]; nothing is changed in that case.
    pub fn add(&mut self, task: Task) -> Result<(), RepositoryError> {
        task.validate()?;
        if self.tasks.contains_key(&task.id) {
            return Err(RepositoryError::DuplicateId(task.id));
        }
        if self.tasks.len() >= MAX_TASKS_PER_USER {
            return Err(RepositoryError::TooManyTasks {
                max: MAX_TASKS_PER_USER,
            });
        }

        let id = task.id.clone();
        tracing::debug!(task_id = %id, "adding task");
        self.deleting.remove(&id);
        self.schedule_reminder(&task);
        self.tasks.insert(id.clone(), task);
        self.after_local_change(&id);
        Ok(())
    }

    /// Replaces an existing task by id.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::NotFound`] if the id is unknown, or
    /// [`RepositoryError::Invalid`].
    pub fn update(&mut self, task: Task) -> Result<(), RepositoryError> {
        if !self.tasks.contains_key(&task.id) {
            return Err(RepositoryError::NotFound(task.id));
        }
        task.validate()?;

        let id = task.id.clone();
        tracing::debug!(task_id = %id, "updating task");
        self.scheduler.cancel(&id.to_string());
        self.schedule_reminder(&task);
        self.tasks.insert(id.clone(), task);
        self.after_local_change(&id);
        Ok(())
    }

    /// Removes a task locally and attempts a remote delete. A remote delete
    /// that is skipped or fails is not retried.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::NotFound`] if the id is unknown.
    pub fn delete(&mut self, id: &TaskId) -> Result<(), RepositoryError> {
        if self.tasks.remove(id).is_none() {
            return Err(RepositoryError::NotFound(id.clone()));
        }
        tracing::debug!(task_id = %id, "deleting task");
        self.scheduler.cancel(&id.to_string());
        self.revisions.remove(id);
        if self.pending.remove(id) {
            self.persist_pending();
        }
        self.persist_tasks();
        self.spawn_delete(id);
        self.emit(RepositoryEvent::TasksChanged);
        Ok(())
    }

    /// Flips completion. Becoming complete stamps `completed_at` and cancels
    /// the reminder; becoming incomplete clears the stamp and does not
    /// reschedule. Returns the new completion state.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::NotFound`] if the id is unknown.
    pub fn toggle_completion(&mut self, id: &TaskId) -> Result<bool, RepositoryError> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(id.clone()))?;
        let completed = task.toggle_completion(Utc::now());
        tracing::debug!(task_id = %id, completed, "toggled completion");
        if completed {
            self.scheduler.cancel(&id.to_string());
        }
        self.after_local_change(id);
        Ok(completed)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// All tasks, in no particular order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    #[must_use]
    pub fn is_pending(&self, id: &TaskId) -> bool {
        self.pending.contains(id)
    }

    /// Ids with unpushed local changes, sorted.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.pending.iter().cloned().collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub const fn sync_state(&self) -> &SyncState {
        &self.sync_state
    }

    /// The bound user, if any.
    #[must_use]
    pub fn session_user(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.user_id.as_str())
    }

    /// Whether a live remote subscription is open.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.client.is_subscribed())
    }

    pub const fn scheduler(&self) -> &N {
        &self.scheduler
    }

    pub const fn connectivity(&self) -> &ConnectivityObserver {
        &self.connectivity
    }

    /// Incomplete tasks, highest priority first.
    #[must_use]
    pub fn incomplete_tasks(&self) -> Vec<Task> {
        views::incomplete(self.tasks.values())
    }

    /// Completed tasks, most recently completed first.
    #[must_use]
    pub fn completed_tasks(&self) -> Vec<Task> {
        views::completed(self.tasks.values(), Utc::now())
    }

    #[must_use]
    pub fn due_today_tasks(&self) -> Vec<Task> {
        views::due_today(self.tasks.values(), Utc::now())
    }

    #[must_use]
    pub fn overdue_tasks(&self) -> Vec<Task> {
        views::overdue(self.tasks.values(), Utc::now())
    }

    /// Tasks created, due or completed today.
    #[must_use]
    pub fn today_tasks(&self) -> Vec<Task> {
        views::today(self.tasks.values(), Utc::now())
    }

    #[must_use]
    pub fn statistics(&self) -> TaskStatistics {
        TaskStatistics::compute(self.tasks.values(), Utc::now())
    }

    /// Subscribes to state-change notifications.
    #[must_use]
    pub fn subscribe_changes(&self) -> broadcast::Receiver<RepositoryEvent> {
        self.changes.subscribe()
    }

    // -----------------------------------------------------------------------
    // Summary notifications
    // -----------------------------------------------------------------------

    /// Schedules the repeating daily summary at `hour:minute` local time,
    /// replacing any previous one.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Notify`] if the time is invalid or delivery is
    /// unavailable.
    pub fn schedule_daily_summary(&self, hour: u32, minute: u32) -> Result<(), RepositoryError> {
        self.scheduler.schedule(
            DAILY_SUMMARY_ID,
            Trigger::Daily { hour, minute },
            Notification::daily_summary(),
        )?;
        tracing::info!(hour, minute, "daily summary scheduled");
        Ok(())
    }

    pub fn cancel_daily_summary(&self) {
        self.scheduler.cancel(DAILY_SUMMARY_ID);
    }

    /// Delivers a summary of today's numbers right away.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Notify`] if delivery is unavailable.
    pub fn send_summary_now(&self) -> Result<(), RepositoryError> {
        let notification = Notification::summary_now(&self.statistics());
        let id = uuid::Uuid::now_v7().to_string();
        self.scheduler
            .schedule(&id, Trigger::At(Utc::now()), notification)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Bookkeeping shared by add, update and toggle.
    fn after_local_change(&mut self, id: &TaskId) {
        *self.revisions.entry(id.clone()).or_default() += 1;
        self.persist_tasks();
        self.spawn_push(id);
        self.emit(RepositoryEvent::TasksChanged);
    }

    /// Schedules the task's reminder if it has one and is not completed.
    fn schedule_reminder(&self, task: &Task) {
        let Some(at) = task.reminder_at else {
            return;
        };
        if task.is_completed {
            return;
        }
        let id = task.id.to_string();
        if let Err(e) = self
            .scheduler
            .schedule(&id, Trigger::At(at), Notification::task_reminder(task))
        {
            tracing::warn!(task_id = %id, error = %e, "failed to schedule reminder");
            self.emit(RepositoryEvent::ReminderFailed {
                id,
                reason: e.to_string(),
            });
        }
    }

    /// Starts a push of `id`, or marks it pending when that is not possible.
    fn spawn_push(&mut self, id: &TaskId) {
        let Some(task) = self.tasks.get(id) else {
            return;
        };
        let push = match &self.session {
            Some(session) if self.connectivity.is_connected() => session.client.push_task(task),
            _ => {
                tracing::debug!(task_id = %id, "push skipped, marking pending");
                self.mark_pending(id);
                return;
            }
        };

        let tx = self.events_tx.clone();
        let epoch = self.epoch;
        let revision = self.revisions.get(id).copied().unwrap_or_default();
        let previous = self.writes.remove(id);
        *self.pushing.entry(id.clone()).or_default() += 1;
        self.in_flight += 1;
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            let result = push.await;
            let _ = tx.send(SyncEvent::Pushed {
                epoch,
                id: task_id,
                revision,
                result,
            });
        });
        self.writes.insert(id.clone(), handle);
    }

    /// Best-effort remote delete; never queued.
    fn spawn_delete(&mut self, id: &TaskId) {
        let delete = match &self.session {
            Some(session) if self.connectivity.is_connected() => session.client.delete_task(id),
            _ => {
                tracing::info!(task_id = %id, "offline delete not sent to remote");
                return;
            }
        };

        let tx = self.events_tx.clone();
        let epoch = self.epoch;
        let previous = self.writes.remove(id);
        self.deleting.insert(id.clone(), Deletion::InFlight);
        self.in_flight += 1;
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            let result = delete.await;
            let _ = tx.send(SyncEvent::Deleted {
                epoch,
                id: task_id,
                result,
            });
        });
        self.writes.insert(id.clone(), handle);
    }

    fn mark_pending(&mut self, id: &TaskId) {
        if self.pending.insert(id.clone()) {
            self.persist_pending();
        }
    }

    /// Applies a push result. Success clears the pending mark unless the
    /// task changed again since the push started; failure sets it.
    fn record_push(&mut self, id: &TaskId, revision: u64, result: Result<(), RemoteError>) {
        match result {
            Ok(()) => {
                let current = self.revisions.get(id).copied().unwrap_or_default();
                if revision >= current && self.pending.remove(id) {
                    self.persist_pending();
                }
            }
            Err(e) => {
                tracing::warn!(task_id = %id, error = %e, "push failed, marking pending");
                if self.tasks.contains_key(id) {
                    self.mark_pending(id);
                }
            }
        }
    }

    fn persist_tasks(&self) {
        if let Err(e) = self.store.save_snapshot(self.tasks.values()) {
            tracing::error!(error = %e, "failed to persist task snapshot");
        }
    }

    fn persist_pending(&self) {
        if let Err(e) = self.store.save_pending_set(&self.pending) {
            tracing::error!(error = %e, "failed to persist pending set");
        }
    }

    fn emit(&self, event: RepositoryEvent) {
        // No subscribers is fine.
        let _ = self.changes.send(event);
    }

    fn emit_sync_state(&self) {
        self.emit(RepositoryEvent::SyncStateChanged(self.sync_state.clone()));
    }
}
