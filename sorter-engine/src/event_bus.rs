//! Single broadcast channel for observer events

use sorter_core::SorterEvent;
use tokio::sync::broadcast;
use tracing::debug;

/// Events are delivered in emission order to every subscriber. Slow
/// subscribers lag and lose old events; the engine never waits on them.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SorterEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: SorterEvent) {
        if self.sender.send(event).is_err() {
            debug!("No event subscribers");
        }
    }

    pub fn log(&self, message: impl Into<String>) {
        self.publish(SorterEvent::log(message));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SorterEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
