//! Listener fan-out
//!
//! Listeners are handed to the store at construction; there is no global
//! registry. Events are queued and delivered by a dedicated task, so a slow or
//! panicking listener never stalls or aborts a writer.

use intent_model::{IntentKey, IntentState};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// State transition notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentEvent {
    /// Intent that changed
    pub key: IntentKey,
    /// State before the write; `None` for a first record
    pub old_state: Option<IntentState>,
    /// State written
    pub new_state: IntentState,
    /// Version of the written record
    pub version: u64,
}

/// Subscriber to intent state transitions
///
/// Fire-and-forget: return values and panics are ignored by the engine.
pub trait IntentListener: Send + Sync {
    /// Called once per accepted state write, in write order per key
    fn on_intent_state_changed(&self, event: &IntentEvent);
}

/// Queue feeding a fixed listener set
#[derive(Debug, Clone)]
pub struct EventFanout {
    sender: mpsc::UnboundedSender<IntentEvent>,
}

impl EventFanout {
    /// Spawn the delivery task
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn spawn(listeners: Vec<Arc<dyn IntentListener>>) -> (Self, JoinHandle<()>) {
        let (sender, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(deliver(listeners, rx));
        (Self { sender }, handle)
    }

    /// Queue an event (never blocks)
    pub fn publish(&self, event: IntentEvent) {
        if self.sender.send(event).is_err() {
            tracing::debug!("listener fan-out closed, dropping event");
        }
    }
}

async fn deliver(listeners: Vec<Arc<dyn IntentListener>>, mut rx: mpsc::UnboundedReceiver<IntentEvent>) {
    while let Some(event) = rx.recv().await {
        for listener in &listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_intent_state_changed(&event)));
            if outcome.is_err() {
                tracing::warn!(key = %event.key, state = %event.new_state, "intent listener panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<IntentEvent>>,
    }

    impl IntentListener for Recorder {
        fn on_intent_state_changed(&self, event: &IntentEvent) {
            self.seen.lock().unwrap().push(event.clone());
        }
    }

    struct Panicker;

    impl IntentListener for Panicker {
        fn on_intent_state_changed(&self, _event: &IntentEvent) {
            panic!("listener failure");
        }
    }

    fn event(version: u64) -> IntentEvent {
        IntentEvent {
            key: IntentKey::new("k"),
            old_state: None,
            new_state: IntentState::InstallReq,
            version,
        }
    }

    #[tokio::test]
    async fn panicking_listener_does_not_stop_delivery() {
        let recorder = Arc::new(Recorder::default());
        let listeners: Vec<Arc<dyn IntentListener>> = vec![Arc::new(Panicker), recorder.clone()];
        let (fanout, handle) = EventFanout::spawn(listeners);

        fanout.publish(event(0));
        fanout.publish(event(1));
        drop(fanout);
        handle.await.unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.iter().map(|e| e.version).collect::<Vec<_>>(), vec![0, 1]);
    }
}
