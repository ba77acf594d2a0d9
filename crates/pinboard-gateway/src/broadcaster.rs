use std::sync::Arc;

use tokio::sync::broadcast;

use pinboard_types::events::FeedEvent;

/// Fans feed events out to every connected gateway client.
///
/// Constructed once at startup and handed to the API as a collaborator;
/// nothing reaches for it through ambient state. Delivery is at-most-once:
/// no persistence, no replay, and a publish with zero subscribers is a no-op.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<BroadcasterInner>,
}

struct BroadcasterInner {
    tx: broadcast::Sender<FeedEvent>,
}

impl Broadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(BroadcasterInner { tx }),
        }
    }

    /// Publish an event to all currently connected clients.
    /// Never fails; a send error only means nobody is listening.
    pub fn publish(&self, event: FeedEvent) {
        let _ = self.inner.tx.send(event);
    }

    /// Subscribe to feed events. Each gateway connection holds one receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.inner.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.tx.receiver_count()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}
