//! Task statistics and their display formatting.

use chrono::{DateTime, TimeDelta, Utc};

use tasksync_proto::task::{Task, same_local_day};

/// Aggregate counts over a task collection at a point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskStatistics {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
    pub overdue: usize,
    /// Tasks created, due or completed today.
    pub today: usize,
    pub completed_today: usize,
    /// Completed / total, `0.0` for an empty collection.
    pub completion_rate: f64,
    /// Mean creation-to-completion time over completed tasks.
    pub average_completion_time: Option<TimeDelta>,
}

impl TaskStatistics {
    /// Computes statistics over `tasks` as of `now`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compute<'a>(tasks: impl IntoIterator<Item = &'a Task>, now: DateTime<Utc>) -> Self {
        let mut stats = Self::default();
        let mut spent_total = TimeDelta::zero();
        let mut spent_count: i32 = 0;

        for task in tasks {
            stats.total += 1;
            if task.is_completed {
                stats.completed += 1;
            } else {
                stats.pending += 1;
            }
            if task.is_overdue(now) {
                stats.overdue += 1;
            }
            if is_today_task(task, now) {
                stats.today += 1;
            }
            if task.is_completed_today(now) {
                stats.completed_today += 1;
            }
            if let Some(spent) = task.time_spent() {
                spent_total += spent;
                spent_count += 1;
            }
        }

        if stats.total > 0 {
            stats.completion_rate = stats.completed as f64 / stats.total as f64;
        }
        if spent_count > 0 {
            stats.average_completion_time = Some(spent_total / spent_count);
        }
        stats
    }

    /// Completion rate as a whole percentage, e.g. `"67%"`.
    #[must_use]
    pub fn completion_rate_label(&self) -> String {
        format!("{:.0}%", self.completion_rate * 100.0)
    }

    /// Average completion time for display. See [`format_duration`].
    #[must_use]
    pub fn average_time_label(&self) -> String {
        self.average_completion_time
            .map_or_else(|| "N/A".to_string(), format_duration)
    }
}

/// Whether a task belongs in the "today" view: created today, due today or
/// completed today.
#[must_use]
pub fn is_today_task(task: &Task, now: DateTime<Utc>) -> bool {
    same_local_day(task.created_at, now) || task.is_due_today(now) || task.is_completed_today(now)
}

/// Formats a duration as `"2d 3h"`, `"3h 15m"`, `"15m"` or `"< 1m"`.
/// Zero and negative durations read `"N/A"`.
#[must_use]
pub fn format_duration(duration: TimeDelta) -> String {
    let total_secs = duration.num_seconds();
    if total_secs <= 0 {
        return "N/A".to_string();
    }
    let hours = total_secs / 3600;
    let minutes = (total_secs / 60) % 60;
    let days = hours / 24;

    if days > 0 {
        format!("{days}d {}h", hours % 24)
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m")
    } else {
        "< 1m".to_string()
    }
}
