//! Derived, sorted read views over a task collection.

use std::cmp::Reverse;

use chrono::{DateTime, Utc};

use tasksync_proto::task::Task;

use crate::stats::is_today_task;

/// Incomplete tasks, highest priority first. Ties fall back to creation
/// time so the order is stable.
#[must_use]
pub fn incomplete<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Vec<Task> {
    let mut out: Vec<Task> = tasks
        .into_iter()
        .filter(|t| !t.is_completed)
        .cloned()
        .collect();
    out.sort_by_key(|t| (Reverse(t.priority), t.created_at));
    out
}

/// Completed tasks, most recently completed first. A missing completion
/// time sorts as `now`.
#[must_use]
pub fn completed<'a>(tasks: impl IntoIterator<Item = &'a Task>, now: DateTime<Utc>) -> Vec<Task> {
    let mut out: Vec<Task> = tasks
        .into_iter()
        .filter(|t| t.is_completed)
        .cloned()
        .collect();
    out.sort_by_key(|t| Reverse(t.completed_at.unwrap_or(now)));
    out
}

#[must_use]
pub fn due_today<'a>(tasks: impl IntoIterator<Item = &'a Task>, now: DateTime<Utc>) -> Vec<Task> {
    let mut out: Vec<Task> = tasks
        .into_iter()
        .filter(|t| t.is_due_today(now))
        .cloned()
        .collect();
    out.sort_by_key(|t| t.due_at);
    out
}

/// Overdue tasks, longest overdue first.
#[must_use]
pub fn overdue<'a>(tasks: impl IntoIterator<Item = &'a Task>, now: DateTime<Utc>) -> Vec<Task> {
    let mut out: Vec<Task> = tasks
        .into_iter()
        .filter(|t| t.is_overdue(now))
        .cloned()
        .collect();
    out.sort_by_key(|t| t.due_at);
    out
}

#[must_use]
pub fn today<'a>(tasks: impl IntoIterator<Item = &'a Task>, now: DateTime<Utc>) -> Vec<Task> {
    let mut out: Vec<Task> = tasks
        .into_iter()
        .filter(|t| is_today_task(t, now))
        .cloned()
        .collect();
    out.sort_by_key(|t| t.created_at);
    out
}
