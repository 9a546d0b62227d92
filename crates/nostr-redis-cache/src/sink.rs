use tokio::sync::mpsc;

use crate::events::NostrEvent;

/// Where an emitted event came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOrigin {
    /// Replayed from the cache.
    Cache,
    /// Delivered live by a relay.
    Relay(String),
}

impl EventOrigin {
    pub fn is_cached(&self) -> bool {
        matches!(self, EventOrigin::Cache)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedEvent {
    pub event: NostrEvent,
    pub origin: EventOrigin,
}

/// Receiver of events matched by a subscription.
pub trait EventSink: Send + Sync {
    fn event_received(&self, event: NostrEvent, origin: EventOrigin);
}

impl EventSink for mpsc::UnboundedSender<ReceivedEvent> {
    fn event_received(&self, event: NostrEvent, origin: EventOrigin) {
        // A closed receiver means the subscription is gone.
        let _ = self.send(ReceivedEvent { event, origin });
    }
}
