//! The task record and the facts derived from it.
//!
//! A [`Task`] is the unit of synchronization: it is stored whole in the
//! local snapshot, pushed whole to the remote collection and replaced whole
//! when a remote snapshot wins a merge. Completion state is only changed
//! through [`Task::set_completed`] and [`Task::toggle_completion`] so that
//! `completed_at` is present exactly when `is_completed` is true.

use std::str::FromStr;

use chrono::{DateTime, Local, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed task title length in characters.
pub const MAX_TITLE_LENGTH: usize = 100;

/// Maximum allowed task description length in characters.
pub const MAX_DESCRIPTION_LENGTH: usize = 500;

/// Maximum number of tasks a single user may hold.
pub const MAX_TASKS_PER_USER: usize = 1000;

/// Errors produced when a task record violates its constraints.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TaskError {
    /// Task title cannot be empty.
    #[error("task title cannot be empty")]
    TitleEmpty,
    /// Task title exceeds [`MAX_TITLE_LENGTH`].
    #[error("task title too long (max {MAX_TITLE_LENGTH} characters)")]
    TitleTooLong,
    /// Task description exceeds [`MAX_DESCRIPTION_LENGTH`].
    #[error("task description too long (max {MAX_DESCRIPTION_LENGTH} characters)")]
    DescriptionTooLong,
    /// The completion flag and completion timestamp disagree.
    #[error("completion flag and completion time disagree")]
    CompletionMismatch,
    /// A priority tag that is not one of `Low`, `Medium`, `High`.
    #[error("unknown priority: {0}")]
    UnknownPriority(String),
    /// A category tag outside the closed category set.
    #[error("unknown category: {0}")]
    UnknownCategory(String),
    /// A task id that is not a valid UUID.
    #[error("invalid task id: {0}")]
    InvalidId(String),
}

/// Unique identifier for a task, based on UUID v7 for time-ordering.
///
/// The hyphenated string form is the remote document id and the reminder
/// notification identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Creates a new time-ordered task identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `TaskId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| TaskError::InvalidId(s.to_string()))
    }
}

/// Task priority. Ordering follows declaration order: `Low < Medium < High`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Priority {
    /// Can wait.
    Low,
    /// The default.
    #[default]
    Medium,
    /// Do first.
    High,
}

impl Priority {
    /// All priorities from lowest to highest.
    pub const ALL: [Self; 3] = [Self::Low, Self::Medium, Self::High];

    /// The string tag used in remote documents.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| TaskError::UnknownPriority(s.to_string()))
    }
}

/// Task category. Cosmetic only; it never affects sync behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Work,
    #[default]
    Personal,
    Health,
    Finance,
    Learning,
    Shopping,
    Travel,
    Other,
}

impl Category {
    /// Every category, in display order.
    pub const ALL: [Self; 8] = [
        Self::Work,
        Self::Personal,
        Self::Health,
        Self::Finance,
        Self::Learning,
        Self::Shopping,
        Self::Travel,
        Self::Other,
    ];

    /// The string tag used in remote documents.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Work => "Work",
            Self::Personal => "Personal",
            Self::Health => "Health",
            Self::Finance => "Finance",
            Self::Learning => "Learning",
            Self::Shopping => "Shopping",
            Self::Travel => "Travel",
            Self::Other => "Other",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Category {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| TaskError::UnknownCategory(s.to_string()))
    }
}

/// A single task record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier, immutable once assigned.
    pub id: TaskId,
    /// Short title, 1 to [`MAX_TITLE_LENGTH`] characters.
    pub title: String,
    /// Free-form description, up to [`MAX_DESCRIPTION_LENGTH`] characters.
    pub description: String,
    pub priority: Priority,
    pub category: Category,
    /// Completion flag. Change it with [`Task::set_completed`].
    pub is_completed: bool,
    /// When the task was created. Set once.
    pub created_at: DateTime<Utc>,
    /// Optional deadline.
    pub due_at: Option<DateTime<Utc>>,
    /// Present exactly when `is_completed` is true.
    pub completed_at: Option<DateTime<Utc>>,
    /// When to fire the reminder notification, if any.
    pub reminder_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Creates an incomplete task with a fresh id, created now, using the
    /// default priority and category.
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self::new_at(title, Utc::now())
    }

    /// Like [`Task::new`] with an explicit creation time.
    #[must_use]
    pub fn new_at(title: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: TaskId::new(),
            title: title.into(),
            description: String::new(),
            priority: Priority::default(),
            category: Category::default(),
            is_completed: false,
            created_at,
            due_at: None,
            completed_at: None,
            reminder_at: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub const fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    #[must_use]
    pub const fn with_due(mut self, due_at: DateTime<Utc>) -> Self {
        self.due_at = Some(due_at);
        self
    }

    #[must_use]
    pub const fn with_reminder(mut self, reminder_at: DateTime<Utc>) -> Self {
        self.reminder_at = Some(reminder_at);
        self
    }

    /// Checks the length bounds and the completion invariant.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint as a [`TaskError`].
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.title.trim().is_empty() {
            return Err(TaskError::TitleEmpty);
        }
        if self.title.chars().count() > MAX_TITLE_LENGTH {
            return Err(TaskError::TitleTooLong);
        }
        if self.description.chars().count() > MAX_DESCRIPTION_LENGTH {
            return Err(TaskError::DescriptionTooLong);
        }
        if self.is_completed != self.completed_at.is_some() {
            return Err(TaskError::CompletionMismatch);
        }
        Ok(())
    }

    /// Sets the completion flag, stamping or clearing `completed_at`.
    ///
    /// Setting the flag to its current value leaves the record untouched.
    pub fn set_completed(&mut self, completed: bool, now: DateTime<Utc>) {
        if self.is_completed == completed {
            return;
        }
        self.is_completed = completed;
        self.completed_at = completed.then_some(now);
    }

    /// Flips the completion flag and returns the new value.
    pub fn toggle_completion(&mut self, now: DateTime<Utc>) -> bool {
        self.set_completed(!self.is_completed, now);
        self.is_completed
    }

    /// True when the task has a due time in the past and is not completed.
    #[must_use]
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.is_completed && self.due_at.is_some_and(|due| due < now)
    }

    /// True when the due time falls on the same local calendar day as `now`.
    #[must_use]
    pub fn is_due_today(&self, now: DateTime<Utc>) -> bool {
        self.due_at.is_some_and(|due| same_local_day(due, now))
    }

    /// True when the task was completed on the local calendar day of `now`.
    #[must_use]
    pub fn is_completed_today(&self, now: DateTime<Utc>) -> bool {
        self.is_completed && self.completed_at.is_some_and(|at| same_local_day(at, now))
    }

    /// Time between creation and completion. `None` unless completed.
    #[must_use]
    pub fn time_spent(&self) -> Option<TimeDelta> {
        if !self.is_completed {
            return None;
        }
        self.completed_at.map(|done| done - self.created_at)
    }
}

/// Whether two instants fall on the same calendar day in the local timezone.
#[must_use]
pub fn same_local_day(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.with_timezone(&Local).date_naive() == b.with_timezone(&Local).date_naive()
}
