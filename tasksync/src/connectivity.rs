//! Connectivity observer.
//!
//! Holds the current online/offline state fed in by the platform (or by a
//! transport that notices its link drop) and republishes *changes* to
//! subscribers. Subscribing does not replay the current state; read it with
//! [`ConnectivityObserver::is_connected`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;

/// Capacity of the transition broadcast channel.
const EVENT_BUFFER: usize = 16;

/// A connectivity transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Connected,
    Disconnected,
}

/// Cloneable handle to shared connectivity state.
#[derive(Clone)]
pub struct ConnectivityObserver {
    inner: Arc<Inner>,
}

struct Inner {
    connected: AtomicBool,
    events: broadcast::Sender<ConnectivityEvent>,
}

impl ConnectivityObserver {
    /// Creates an observer with the given initial state.
    #[must_use]
    pub fn new(connected: bool) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: Arc::new(Inner {
                connected: AtomicBool::new(connected),
                events,
            }),
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Updates the state. Emits an event and returns `true` only when the
    /// value actually changed.
    pub fn set_connected(&self, connected: bool) -> bool {
        let previous = self.inner.connected.swap(connected, Ordering::SeqCst);
        if previous == connected {
            return false;
        }
        let event = if connected {
            ConnectivityEvent::Connected
        } else {
            ConnectivityEvent::Disconnected
        };
        tracing::info!(?event, "connectivity changed");
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
        true
    }

    /// Subscribes to future transitions.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.inner.events.subscribe()
    }
}

impl Default for ConnectivityObserver {
    fn default() -> Self {
        Self::new(false)
    }
}

impl std::fmt::Debug for ConnectivityObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityObserver")
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn reports_initial_state() {
        assert!(ConnectivityObserver::new(true).is_connected());
        assert!(!ConnectivityObserver::new(false).is_connected());
        assert!(!ConnectivityObserver::default().is_connected());
    }

    #[test]
    fn subscribe_does_not_replay_state() {
        let observer = ConnectivityObserver::new(true);
        let mut rx = observer.subscribe();
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn emits_only_on_change() {
        let observer = ConnectivityObserver::new(false);
        let mut rx = observer.subscribe();

        assert!(!observer.set_connected(false));
        assert!(observer.set_connected(true));
        assert!(!observer.set_connected(true));
        assert!(observer.set_connected(false));

        assert_eq!(rx.try_recv(), Ok(ConnectivityEvent::Connected));
        assert_eq!(rx.try_recv(), Ok(ConnectivityEvent::Disconnected));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn clones_share_state() {
        let a = ConnectivityObserver::new(false);
        let b = a.clone();
        let mut rx = b.subscribe();
        a.set_connected(true);
        assert!(b.is_connected());
        assert_eq!(rx.try_recv(), Ok(ConnectivityEvent::Connected));
    }
}
