//! Sync progress reporting.
//!
//! `SyncListener` is what the orchestrator reports to. `EventBus` is the
//! stock listener: it turns every callback into a serializable `SyncEvent`
//! and fans it out to subscribers.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Orchestrator state as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Error,
}

/// Receives progress of sync passes. All methods default to no-ops.
pub trait SyncListener: Send + Sync {
    fn on_sync_started(&self) {}
    fn on_sync_progress(&self, _message: &str) {}
    fn on_sync_success(&self, _message: &str) {}
    fn on_sync_error(&self, _message: &str) {}
    fn on_sync_status_changed(&self, _status: SyncStatus) {}
}

/// Listener that ignores everything.
pub struct NoopListener;

impl SyncListener for NoopListener {}

/// Sync events for monitoring and UI updates.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// A pass was entered.
    Started {
        /// Milliseconds since Unix epoch.
        timestamp: i64,
    },
    Progress {
        message: String,
        timestamp: i64,
    },
    Success {
        message: String,
        timestamp: i64,
    },
    Error {
        message: String,
        timestamp: i64,
    },
    StatusChanged {
        status: SyncStatus,
        timestamp: i64,
    },
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Hold this value to keep receiving events, drop it to unsubscribe.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Arc<dyn Fn(SyncEvent) + Send + Sync>;

/// Event bus for publishing sync events to subscribers.
///
/// Wrap in `Arc` to enable subscriptions.
#[derive(Default)]
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(SyncEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run while emit holds the read lock.
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: SyncEvent) {
        // Clone the list so a callback may subscribe without deadlocking.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }
}

impl SyncListener for EventBus {
    fn on_sync_started(&self) {
        self.emit(SyncEvent::Started {
            timestamp: crate::model::now_millis(),
        });
    }

    fn on_sync_progress(&self, message: &str) {
        self.emit(SyncEvent::Progress {
            message: message.to_string(),
            timestamp: crate::model::now_millis(),
        });
    }

    fn on_sync_success(&self, message: &str) {
        self.emit(SyncEvent::Success {
            message: message.to_string(),
            timestamp: crate::model::now_millis(),
        });
    }

    fn on_sync_error(&self, message: &str) {
        self.emit(SyncEvent::Error {
            message: message.to_string(),
            timestamp: crate::model::now_millis(),
        });
    }

    fn on_sync_status_changed(&self, status: SyncStatus) {
        self.emit(SyncEvent::StatusChanged {
            status,
            timestamp: crate::model::now_millis(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_subscribe_and_emit() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let _sub = bus.subscribe(move |_| {
            count_clone.fetch_add(1, Ordering::Relaxed);
        });

        bus.on_sync_started();
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_subscription_unsubscribes_on_drop() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));

        {
            let count_clone = Arc::clone(&count);
            let _sub = bus.subscribe(move |_| {
                count_clone.fetch_add(1, Ordering::Relaxed);
            });
            bus.on_sync_progress("pushing");
            assert_eq!(count.load(Ordering::Relaxed), 1);
        }

        bus.on_sync_progress("pulling");
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_listener_callbacks_become_events() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let _sub = bus.subscribe(move |event| seen_clone.lock().unwrap().push(event));

        bus.on_sync_status_changed(SyncStatus::Syncing);
        bus.on_sync_error("push rejected");

        let seen = seen.lock().unwrap();
        assert!(matches!(
            seen[0],
            SyncEvent::StatusChanged {
                status: SyncStatus::Syncing,
                ..
            }
        ));
        assert!(matches!(&seen[1], SyncEvent::Error { message, .. } if message == "push rejected"));
    }

    #[test]
    fn test_sync_event_serialization() {
        let event = SyncEvent::StatusChanged {
            status: SyncStatus::Idle,
            timestamp: 1_700_000_000_000,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"statusChanged\""));
        assert!(json.contains("\"status\":\"idle\""));
        assert!(json.contains("\"timestamp\":1700000000000"));
    }
}
