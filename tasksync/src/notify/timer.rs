//! [`NotificationScheduler`] backed by tokio timers.
//!
//! Each identifier owns one spawned timer task. When it fires, a
//! [`Delivered`] value is sent on the channel returned by
//! [`TimerScheduler::new`]. Rescheduling or cancelling an identifier aborts
//! its timer. Daily triggers re-arm themselves after each delivery.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Local, NaiveTime, TimeDelta, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Notification, NotificationScheduler, NotifyError, Trigger, check_trigger};

/// A notification whose trigger fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub id: String,
    pub notification: Notification,
}

/// Armed timers keyed by identifier. The generation lets a finished
/// one-shot timer remove its own entry without clobbering a replacement.
type Timers = Arc<Mutex<HashMap<String, (u64, JoinHandle<()>)>>>;

/// Timer-driven scheduler. Must be used from within a tokio runtime.
pub struct TimerScheduler {
    timers: Timers,
    generation: AtomicU64,
    delivered_tx: mpsc::Sender<Delivered>,
}

impl TimerScheduler {
    /// Creates a scheduler and the receiver its deliveries arrive on.
    #[must_use]
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Delivered>) {
        let (tx, rx) = mpsc::channel(buffer);
        let scheduler = Self {
            timers: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            delivered_tx: tx,
        };
        (scheduler, rx)
    }

    /// Number of armed timers.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.timers.lock().len()
    }
}

impl Drop for TimerScheduler {
    fn drop(&mut self) {
        for (_, (_, handle)) in self.timers.lock().drain() {
            handle.abort();
        }
    }
}

impl NotificationScheduler for TimerScheduler {
    fn schedule(
        &self,
        id: &str,
        trigger: Trigger,
        notification: Notification,
    ) -> Result<(), NotifyError> {
        check_trigger(trigger)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| NotifyError::Unavailable(e.to_string()))?;

        let tx = self.delivered_tx.clone();
        let timers = Arc::clone(&self.timers);
        let key = id.to_string();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        // Held until the entry is inserted so a timer that fires at once
        // cannot try to remove itself first.
        let mut armed = self.timers.lock();
        let handle = runtime.spawn(async move {
            loop {
                let delay = delay_until_next(trigger, Utc::now());
                tokio::time::sleep(delay).await;
                let delivered = Delivered {
                    id: key.clone(),
                    notification: notification.clone(),
                };
                if tx.send(delivered).await.is_err() {
                    tracing::debug!(id = %key, "notification receiver dropped");
                    break;
                }
                if matches!(trigger, Trigger::At(_)) {
                    break;
                }
            }
            let mut timers = timers.lock();
            if timers.get(&key).is_some_and(|(g, _)| *g == generation) {
                timers.remove(&key);
            }
        });

        if let Some((_, previous)) = armed.insert(id.to_string(), (generation, handle)) {
            previous.abort();
        }
        drop(armed);
        tracing::debug!(id, ?trigger, "notification scheduled");
        Ok(())
    }

    fn cancel(&self, id: &str) {
        let removed = self.timers.lock().remove(id);
        if let Some((_, handle)) = removed {
            handle.abort();
            tracing::debug!(id, "notification cancelled");
        }
    }
}

/// Time to wait from `now` until `trigger` next fires. Past one-shot
/// triggers fire immediately.
fn delay_until_next(trigger: Trigger, now: DateTime<Utc>) -> Duration {
    let target = match trigger {
        Trigger::At(at) => at,
        Trigger::Daily { hour, minute } => next_daily(hour, minute, now),
    };
    (target - now).to_std().unwrap_or(Duration::ZERO)
}

/// The next local `hour:minute` strictly after `now`.
fn next_daily(hour: u32, minute: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    let Some(time) = NaiveTime::from_hms_opt(hour, minute, 0) else {
        return now;
    };
    let local_now = now.with_timezone(&Local);
    let mut day = local_now.date_naive();
    // Two attempts cover the "already passed today" case; the third guards
    // against a local time skipped by a DST jump.
    for _ in 0..3 {
        if let Some(candidate) = Local
            .from_local_datetime(&day.and_time(time))
            .earliest()
            .map(|t| t.with_timezone(&Utc))
            && candidate > now
        {
            return candidate;
        }
        day += TimeDelta::days(1);
    }
    now + TimeDelta::days(1)
}
