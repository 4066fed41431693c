//! Reminder notifications.
//!
//! The [`NotificationScheduler`] trait is the seam to the platform's
//! notification delivery. Entries are keyed by a stable identifier:
//! scheduling an identifier that already exists replaces it, cancelling an
//! unknown identifier is a no-op. Task reminders use the task id's string
//! form; the repeating daily summary uses [`DAILY_SUMMARY_ID`].
//!
//! Implementations:
//! - [`RecordingScheduler`]: keeps entries in memory for inspection.
//! - [`TimerScheduler`]: fires entries from tokio timers into a channel.

pub mod recording;
pub mod timer;

use chrono::{DateTime, Utc};

use tasksync_proto::task::Task;

use crate::stats::TaskStatistics;

pub use recording::RecordingScheduler;
pub use timer::{Delivered, TimerScheduler};

/// Identifier of the repeating daily summary reminder.
pub const DAILY_SUMMARY_ID: &str = "daily_summary";

/// When a notification fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Once, at the given instant. Past instants are accepted as-is.
    At(DateTime<Utc>),
    /// Every day at `hour:minute` local time.
    Daily { hour: u32, minute: u32 },
}

/// What the user sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

impl Notification {
    #[must_use]
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }

    /// The reminder for a single task.
    #[must_use]
    pub fn task_reminder(task: &Task) -> Self {
        Self::new("Task Reminder", task.title.clone())
    }

    /// The repeating daily summary prompt.
    #[must_use]
    pub fn daily_summary() -> Self {
        Self::new(
            "Daily Task Summary",
            "Check your productivity stats and plan your day!",
        )
    }

    /// An immediate summary carrying today's numbers.
    #[must_use]
    pub fn summary_now(stats: &TaskStatistics) -> Self {
        Self::new(
            "Your Daily Summary",
            format!(
                "Completed: {}\nTotal: {}\nPending: {}",
                stats.completed_today, stats.total, stats.pending
            ),
        )
    }
}

/// Errors reported by a notification scheduler.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum NotifyError {
    /// The trigger cannot be scheduled (e.g. hour out of range).
    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),

    /// The delivery platform is not available.
    #[error("notification delivery unavailable: {0}")]
    Unavailable(String),
}

/// Platform notification delivery, keyed by identifier.
pub trait NotificationScheduler: Send + Sync {
    /// Schedules `notification` under `id`, replacing any existing entry.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if the trigger is invalid or delivery is
    /// unavailable.
    fn schedule(
        &self,
        id: &str,
        trigger: Trigger,
        notification: Notification,
    ) -> Result<(), NotifyError>;

    /// Removes the entry under `id`, if any.
    fn cancel(&self, id: &str);
}

/// Rejects `Daily` triggers with an impossible time of day.
///
/// # Errors
///
/// Returns [`NotifyError::InvalidTrigger`] for hour >= 24 or minute >= 60.
pub fn check_trigger(trigger: Trigger) -> Result<(), NotifyError> {
    match trigger {
        Trigger::Daily { hour, minute } if hour >= 24 || minute >= 60 => Err(
            NotifyError::InvalidTrigger(format!("{hour:02}:{minute:02} is not a time of day")),
        ),
        _ => Ok(()),
    }
}
