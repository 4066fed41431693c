//! Session lifecycle and synchronization.

use std::collections::HashMap;

use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::broadcast::error::RecvError;

use tasksync_proto::task::{Task, TaskId};

use super::{
    Deletion, OFFLINE_MESSAGE, RepositoryError, RepositoryEvent, Session, SyncEvent, SyncState,
    TaskRepository,
};
use crate::connectivity::ConnectivityEvent;
use crate::merge::merge_tasks;
use crate::notify::NotificationScheduler;
use crate::remote::{RemoteError, RemoteStore, RemoteSyncClient};
use crate::store::KeyValueBackend;

impl<R, N, B> TaskRepository<R, N, B>
where
    R: RemoteStore,
    N: NotificationScheduler,
    B: KeyValueBackend,
{
    // -----------------------------------------------------------------------
    // Session lifecycle
    // -----------------------------------------------------------------------

    /// Binds the repository to `user_id`.
    ///
    /// Restores the state persisted for this user (state persisted for a
    /// different user is discarded), re-arms future reminders, starts
    /// following connectivity transitions and, if connected, runs a full
    /// sync. Tasks created before any session are adopted. Binding the user
    /// that is already bound is a no-op; binding another one tears the
    /// current session down first.
    pub async fn setup_session(&mut self, user_id: impl Into<String>) {
        let user_id = user_id.into();
        if self.session_user() == Some(user_id.as_str()) {
            tracing::debug!(user_id = %user_id, "session already bound");
            return;
        }
        if self.session.is_some() {
            self.teardown_session();
        }

        match self.store.load_owner() {
            Some(owner) if owner != user_id => {
                tracing::info!(previous = %owner, "discarding state of another user");
                if let Err(e) = self.store.clear() {
                    tracing::error!(error = %e, "failed to clear local store");
                }
            }
            _ => {}
        }

        self.epoch += 1;
        self.in_flight = 0;
        self.awaiting_snapshot = false;

        // Persisted state first; anything already in memory wins.
        let mut restored: HashMap<TaskId, Task> = self
            .store
            .load_snapshot()
            .into_iter()
            .map(|task| (task.id.clone(), task))
            .collect();
        restored.extend(self.tasks.drain());
        self.tasks = restored;
        self.pending.extend(self.store.load_pending_set());
        self.pending.retain(|id| self.tasks.contains_key(id));
        self.sync_state = SyncState {
            last_sync: self.store.load_sync_timestamp(),
            ..SyncState::default()
        };

        if let Err(e) = self.store.save_owner(&user_id) {
            tracing::error!(error = %e, "failed to persist session owner");
        }
        self.persist_tasks();
        self.persist_pending();

        let now = Utc::now();
        let rearm: Vec<Task> = self
            .tasks
            .values()
            .filter(|task| task.reminder_at.is_some_and(|at| at > now))
            .cloned()
            .collect();
        for task in &rearm {
            self.schedule_reminder(task);
        }

        let client = RemoteSyncClient::new(
            std::sync::Arc::clone(&self.remote),
            user_id.clone(),
            self.connectivity.clone(),
        );
        let connectivity_task = self.spawn_connectivity_forwarder();
        self.session = Some(Session {
            user_id: user_id.clone(),
            client,
            connectivity_task,
        });

        tracing::info!(
            user_id = %user_id,
            tasks = self.tasks.len(),
            pending = self.pending.len(),
            "session started"
        );
        self.emit(RepositoryEvent::TasksChanged);
        self.emit_sync_state();

        if self.connectivity.is_connected()
            && let Err(e) = self.sync_now().await
        {
            tracing::warn!(error = %e, "initial sync failed");
        }
    }

    /// Ends the session: cancels the subscription and connectivity
    /// forwarding, cancels reminders of current tasks, and clears the
    /// collection, pending set, sync state and local store. Results of work
    /// started before this call are ignored when they arrive.
    pub fn teardown_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.client.unsubscribe();
            tracing::info!(user_id = %session.user_id, "session ended");
        }
        for id in self.tasks.keys() {
            self.scheduler.cancel(&id.to_string());
        }

        self.epoch += 1;
        self.in_flight = 0;
        self.awaiting_snapshot = false;
        self.tasks.clear();
        self.pending.clear();
        self.revisions.clear();
        self.deleting.clear();
        self.pushing.clear();
        self.writes.clear();
        self.sync_state = SyncState::default();
        if let Err(e) = self.store.clear() {
            tracing::error!(error = %e, "failed to clear local store");
        }

        self.emit(RepositoryEvent::TasksChanged);
        self.emit_sync_state();
    }

    // -----------------------------------------------------------------------
    // Synchronization
    // -----------------------------------------------------------------------

    /// Pushes every pending task, then opens a fresh subscription whose
    /// first snapshot is merged when it arrives.
    ///
    /// Without a session this logs a warning and does nothing.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Offline`] when disconnected (also recorded as
    /// `last_error`), or [`RepositoryError::Remote`] if the subscription
    /// cannot be opened. Individual push failures are not errors; those ids
    /// stay pending.
    pub async fn sync_now(&mut self) -> Result<(), RepositoryError> {
        let Some(session) = &self.session else {
            tracing::warn!("sync requested without a session");
            return Ok(());
        };
        if !self.connectivity.is_connected() {
            self.sync_state.last_error = Some(OFFLINE_MESSAGE.to_string());
            self.emit_sync_state();
            return Err(RepositoryError::Offline);
        }

        let mut ids = self.pending_ids();
        ids.retain(|id| self.tasks.contains_key(id));
        let pushes: Vec<_> = ids
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .map(|task| session.client.push_task(task))
            .collect();
        let revisions: Vec<u64> = ids
            .iter()
            .map(|id| self.revisions.get(id).copied().unwrap_or_default())
            .collect();

        self.sync_state.last_error = None;
        self.sync_state.is_syncing = true;
        self.emit_sync_state();
        tracing::info!(pending = ids.len(), "sync started");

        let results = join_all(pushes).await;
        for ((id, revision), result) in ids.iter().zip(revisions).zip(results) {
            self.record_push(id, revision, result);
        }

        self.subscription_seq += 1;
        let tx = self.events_tx.clone();
        let epoch = self.epoch;
        let seq = self.subscription_seq;
        let deliver = move |result: Result<Vec<Task>, RemoteError>| {
            tx.send(SyncEvent::Snapshot { epoch, seq, result }).is_ok()
        };
        let subscribed = match self.session.as_mut() {
            Some(session) => session.client.subscribe(deliver).await,
            None => Err(RemoteError::ConnectionClosed),
        };

        match subscribed {
            Ok(()) => {
                self.awaiting_snapshot = true;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to open subscription");
                self.fail_sync(&e);
                Err(e.into())
            }
        }
    }

    /// Pushes every task (manual backup) and records the sync time if all
    /// pushes succeed. Returns the number of tasks pushed.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::NoSession`], [`RepositoryError::Offline`], or the
    /// first push failure (after every push has been attempted; failed ids
    /// are marked pending).
    pub async fn backup_all(&mut self) -> Result<usize, RepositoryError> {
        let session = self.session.as_ref().ok_or(RepositoryError::NoSession)?;
        if !self.connectivity.is_connected() {
            return Err(RepositoryError::Offline);
        }

        let mut ids: Vec<TaskId> = self.tasks.keys().cloned().collect();
        ids.sort();
        let pushes: Vec<_> = ids
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .map(|task| session.client.push_task(task))
            .collect();
        let revisions: Vec<u64> = ids
            .iter()
            .map(|id| self.revisions.get(id).copied().unwrap_or_default())
            .collect();

        let results = join_all(pushes).await;
        let mut first_error = None;
        for ((id, revision), result) in ids.iter().zip(revisions).zip(results) {
            if let Err(e) = &result {
                first_error.get_or_insert_with(|| e.clone());
            }
            self.record_push(id, revision, result);
        }

        if let Some(e) = first_error {
            return Err(e.into());
        }
        self.record_sync_success();
        tracing::info!(count = ids.len(), "backup complete");
        Ok(ids.len())
    }

    /// Replaces the local collection with a one-shot fetch of the remote
    /// one. Pending marks survive only for ids present remotely. Returns the
    /// number of tasks restored.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::NoSession`], [`RepositoryError::Offline`], or the
    /// fetch failure (also recorded as `last_error`).
    pub async fn restore_from_remote(&mut self) -> Result<usize, RepositoryError> {
        let session = self.session.as_ref().ok_or(RepositoryError::NoSession)?;
        if !self.connectivity.is_connected() {
            return Err(RepositoryError::Offline);
        }

        let fetch = session.client.fetch_all();
        self.sync_state.last_error = None;
        self.sync_state.is_syncing = true;
        self.emit_sync_state();

        let remote = match fetch.await {
            Ok(remote) => remote,
            Err(e) => {
                self.fail_sync(&e);
                return Err(e.into());
            }
        };

        for id in self.tasks.keys() {
            self.scheduler.cancel(&id.to_string());
        }
        self.tasks = remote
            .into_iter()
            .map(|task| (task.id.clone(), task))
            .collect();
        let restored: Vec<Task> = self.tasks.values().cloned().collect();
        for task in &restored {
            self.schedule_reminder(task);
        }
        let before = self.pending.len();
        self.pending.retain(|id| self.tasks.contains_key(id));
        if self.pending.len() != before {
            self.persist_pending();
        }
        self.persist_tasks();
        self.record_sync_success();
        self.emit(RepositoryEvent::TasksChanged);

        tracing::info!(count = restored.len(), "restored from remote");
        Ok(restored.len())
    }

    // -----------------------------------------------------------------------
    // Event processing
    // -----------------------------------------------------------------------

    /// Waits for the next asynchronous result and applies it.
    pub async fn next_event(&mut self) {
        if let Some(event) = self.events_rx.recv().await {
            self.handle_event(event).await;
        }
    }

    /// `true` when no push or delete is outstanding and no requested
    /// snapshot is still due.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.in_flight == 0 && !self.awaiting_snapshot
    }

    /// Applies events until the repository is idle and nothing is queued.
    ///
    /// Waits without bound for outstanding work; wrap in a timeout when the
    /// remote may not answer.
    pub async fn run_until_idle(&mut self) {
        loop {
            if self.is_idle() {
                match self.events_rx.try_recv() {
                    Ok(event) => self.handle_event(event).await,
                    Err(_) => return,
                }
            } else {
                self.next_event().await;
            }
        }
    }

    async fn handle_event(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::Pushed {
                epoch,
                id,
                revision,
                result,
            } => {
                if !self.is_current(epoch) {
                    return;
                }
                self.in_flight = self.in_flight.saturating_sub(1);
                if let Some(count) = self.pushing.get_mut(&id) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        self.pushing.remove(&id);
                    }
                }
                self.writes.retain(|_, handle| !handle.is_finished());
                self.record_push(&id, revision, result);
            }
            SyncEvent::Deleted { epoch, id, result } => {
                if !self.is_current(epoch) {
                    return;
                }
                self.in_flight = self.in_flight.saturating_sub(1);
                self.writes.retain(|_, handle| !handle.is_finished());
                match result {
                    Ok(()) => {
                        if let Some(state) = self.deleting.get_mut(&id) {
                            *state = Deletion::Confirmed;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(task_id = %id, error = %e, "remote delete dropped");
                        self.deleting.remove(&id);
                    }
                }
            }
            SyncEvent::Snapshot { epoch, seq, result } => {
                if !self.is_current(epoch) || seq != self.subscription_seq {
                    return;
                }
                self.awaiting_snapshot = false;
                match result {
                    Ok(remote) => self.apply_snapshot(&remote),
                    Err(e) => {
                        tracing::warn!(error = %e, "subscription failed");
                        self.fail_sync(&e);
                    }
                }
            }
            SyncEvent::Connectivity { epoch, event } => {
                if !self.is_current(epoch) {
                    return;
                }
                match event {
                    ConnectivityEvent::Connected => {
                        if let Err(e) = self.sync_now().await {
                            tracing::warn!(error = %e, "sync after reconnect failed");
                        }
                    }
                    ConnectivityEvent::Disconnected => self.go_offline(),
                }
            }
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        if epoch == self.epoch && self.session.is_some() {
            return true;
        }
        tracing::debug!(epoch, current = self.epoch, "dropping stale result");
        false
    }

    /// Merges a remote snapshot into the collection, re-arms reminders that
    /// changed and re-pushes local-only survivors.
    ///
    /// Ids deleted here but still present in the snapshot are skipped, and
    /// tasks with a push outstanding keep their local copy.
    fn apply_snapshot(&mut self, snapshot: &[Task]) {
        self.deleting.retain(|id, state| {
            *state == Deletion::InFlight || snapshot.iter().any(|task| &task.id == id)
        });
        let remote: Vec<Task> = snapshot
            .iter()
            .filter(|task| !self.deleting.contains_key(&task.id))
            .cloned()
            .collect();

        let mut outcome = merge_tasks(&self.tasks, &remote);
        for id in self.pushing.keys() {
            if let Some(local) = self.tasks.get(id) {
                outcome.tasks.insert(id.clone(), local.clone());
            }
        }
        outcome.repush.retain(|id| !self.pushing.contains_key(id));
        let previous = std::mem::replace(&mut self.tasks, outcome.tasks);

        for (id, old) in &previous {
            if self.tasks.get(id) != Some(old) {
                self.scheduler.cancel(&id.to_string());
            }
        }
        let changed: Vec<Task> = self
            .tasks
            .values()
            .filter(|task| previous.get(&task.id) != Some(*task))
            .cloned()
            .collect();
        for task in &changed {
            self.schedule_reminder(task);
        }

        self.persist_tasks();
        for id in &outcome.repush {
            self.spawn_push(id);
        }
        self.record_sync_success();
        tracing::info!(
            remote = remote.len(),
            repush = outcome.repush.len(),
            "applied remote snapshot"
        );
        if !changed.is_empty() || previous.len() != self.tasks.len() {
            self.emit(RepositoryEvent::TasksChanged);
        }
    }

    /// Stops live updates while offline so a snapshot cannot overwrite
    /// pending local edits before they are pushed.
    fn go_offline(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.client.unsubscribe();
        }
        self.subscription_seq += 1;
        self.awaiting_snapshot = false;
        if self.sync_state.is_syncing {
            self.sync_state.is_syncing = false;
            self.emit_sync_state();
        }
        tracing::info!(pending = self.pending.len(), "offline");
    }

    fn record_sync_success(&mut self) {
        let now = Utc::now();
        self.sync_state.last_sync = Some(now);
        self.sync_state.is_syncing = false;
        self.sync_state.last_error = None;
        if let Err(e) = self.store.save_sync_timestamp(now) {
            tracing::error!(error = %e, "failed to persist sync time");
        }
        self.emit_sync_state();
    }

    fn fail_sync(&mut self, error: &RemoteError) {
        self.sync_state.is_syncing = false;
        self.sync_state.last_error = Some(error.to_string());
        self.emit_sync_state();
    }

    fn spawn_connectivity_forwarder(&self) -> tokio::task::JoinHandle<()> {
        let mut transitions = self.connectivity.subscribe();
        let observer = self.connectivity.clone();
        let tx = self.events_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            loop {
                let event = match transitions.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "connectivity events lagged");
                        if observer.is_connected() {
                            ConnectivityEvent::Connected
                        } else {
                            ConnectivityEvent::Disconnected
                        }
                    }
                    Err(RecvError::Closed) => break,
                };
                if tx.send(SyncEvent::Connectivity { epoch, event }).is_err() {
                    break;
                }
            }
        })
    }
}
