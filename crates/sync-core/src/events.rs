//! Engine notifications for whatever presents state to the user.
//!
//! Provides `EngineEvent` and `EventBus` for subscriptions. Callbacks run
//! synchronously on the emitting task, so they should only hand the event
//! off (e.g. into a channel).

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

use crate::status::FolderStatus;

/// Events emitted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    /// A local edit is waiting for the daemon to confirm convergence.
    FilePending { path: String },
    /// The daemon confirmed convergence for a tracked path.
    FileSynced { path: String },
    /// Folder status changed.
    StatusChanged { status: FolderStatus },
    /// A device connected or disconnected.
    DevicesChanged,
    /// New items may be available in the recent-activity list.
    HistoryChanged,
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

type Callback = Arc<dyn Fn(EngineEvent) + Send + Sync>;

/// Event bus for publishing engine events to subscribers.
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
        callback: impl Fn(EngineEvent) + Send + Sync + 'static,
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
        // try_write: Drop may run during unwinding while emit holds a read lock
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: EngineEvent) {
        // Snapshot so a callback may subscribe without deadlocking
        let callbacks: Vec<Callback> = self
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(bus: &Arc<EventBus>) -> (Arc<Mutex<Vec<EngineEvent>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = bus.subscribe(move |event| sink.lock().unwrap().push(event));
        (seen, sub)
    }

    #[test]
    fn test_subscribe_and_emit() {
        let bus = Arc::new(EventBus::new());
        let (seen, _sub) = recorder(&bus);

        bus.emit(EngineEvent::FilePending { path: "a.md".into() });

        assert_eq!(
            *seen.lock().unwrap(),
            vec![EngineEvent::FilePending { path: "a.md".into() }]
        );
    }

    #[test]
    fn test_subscription_unsubscribes_on_drop() {
        let bus = Arc::new(EventBus::new());
        let (seen, sub) = recorder(&bus);
        let (other, _other_sub) = recorder(&bus);

        bus.emit(EngineEvent::DevicesChanged);
        drop(sub);
        bus.emit(EngineEvent::HistoryChanged);

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(other.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_engine_event_serialization() {
        let json = serde_json::to_string(&EngineEvent::StatusChanged {
            status: FolderStatus::Converging,
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"statusChanged","status":"converging"}"#);

        let json = serde_json::to_string(&EngineEvent::FileSynced { path: "a.md".into() }).unwrap();
        assert!(json.contains("\"type\":\"fileSynced\""));
    }
}
