//! Event bus for session notifications
//!
//! State changes and failures of a session are broadcast to any number of
//! subscribers (the binary's log printer, a hosting UI layer).

pub mod types;

pub use types::SessionEvent;

use tokio::sync::broadcast;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Broadcast bus for [`SessionEvent`]s
///
/// Events published with no subscriber are dropped. A subscriber that falls
/// more than the channel capacity behind receives `Lagged`.
///
/// # Example
///
/// ```no_run
/// use browser_stream::events::{EventBus, SessionEvent};
/// use browser_stream::session::SessionState;
///
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
///
/// bus.publish(SessionEvent::StateChanged {
///     session_id: "abc".to_string(),
///     state: SessionState::Negotiating,
/// });
///
/// // Only media events
/// if let Ok(event) = rx.try_recv() {
///     if event.matches_topic("media.*") {
///         println!("{}", event.event_name());
///     }
/// }
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
