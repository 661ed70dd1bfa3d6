use tokio::sync::broadcast;
use tracing::trace;

use crate::types::DebugEvent;

/// Outbound side of the debug channel.
///
/// One bus serves every graph. Subscribers see all events and filter by
/// `graph_id`; a debugger attached to one graph never blocks invocations of
/// another. Publishing never fails: with no subscriber attached the event is
/// dropped, and a subscriber that falls behind by more than `capacity` events
/// skips the oldest ones.
pub struct EventBus {
    tx: broadcast::Sender<DebugEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Returns how many subscribers received it.
    pub fn publish(&self, event: DebugEvent) -> usize {
        let kind = event.kind();
        let graph_id = event.graph_id().to_string();
        match self.tx.send(event) {
            Ok(delivered) => delivered,
            Err(_) => {
                trace!(graph_id = %graph_id, kind, "Debug event dropped, nobody attached");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DebugEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
