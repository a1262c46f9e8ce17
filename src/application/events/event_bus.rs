//! Lazy, bounded broadcast of error events

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::types::{ErrorEvent, EventMessage};

const DEFAULT_CAPACITY: usize = 256;

/// Broadcasts [`ErrorEvent`]s to every subscriber.
///
/// The underlying channel is only created on the first `subscribe`, so an
/// endpoint nobody listens to never buffers events. Once closed the bus
/// drops every event and subscribers see the end of the stream.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<Mutex<Option<broadcast::Sender<EventMessage>>>>,
    capacity: usize,
    closed: Arc<AtomicBool>,
    subscriber_count: Arc<AtomicUsize>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sender: Arc::new(Mutex::new(None)),
            capacity: capacity.max(1),
            closed: Arc::new(AtomicBool::new(false)),
            subscriber_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn sender(&self) -> MutexGuard<'_, Option<broadcast::Sender<EventMessage>>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn publish(&self, event: ErrorEvent) {
        let event_type = event.event_type();
        let channel = event.channel().to_string();

        let guard = self.sender();
        let Some(sender) = guard.as_ref() else {
            debug!(event_type, channel, "Error event dropped (no subscribers)");
            return;
        };

        match sender.send(EventMessage::new(event)) {
            Ok(count) => debug!(event_type, channel, subscribers = count, "Error event published"),
            Err(_) => debug!(event_type, channel, "Error event published (no subscribers)"),
        }
    }

    pub fn subscribe(&self) -> EventSubscriber {
        let receiver = {
            let mut guard = self.sender();
            if self.closed.load(Ordering::SeqCst) {
                None
            } else {
                let capacity = self.capacity;
                Some(
                    guard
                        .get_or_insert_with(|| broadcast::channel(capacity).0)
                        .subscribe(),
                )
            }
        };

        let count = self.subscriber_count.fetch_add(1, Ordering::SeqCst) + 1;
        info!(total = count, "New error stream subscriber");

        EventSubscriber {
            receiver,
            subscriber_count: self.subscriber_count.clone(),
        }
    }

    /// End the stream for every subscriber.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.sender().take();
            debug!("Error stream closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::SeqCst)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receives events from an [`EventBus`].
pub struct EventSubscriber {
    receiver: Option<broadcast::Receiver<EventMessage>>,
    subscriber_count: Arc<AtomicUsize>,
}

impl EventSubscriber {
    /// Next event, or `None` once the bus is closed.
    pub async fn recv(&mut self) -> Option<EventMessage> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(missed = count, "Error stream subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return None;
                }
            }
        }
    }
}

impl Drop for EventSubscriber {
    fn drop(&mut self) {
        let prev = self.subscriber_count.fetch_sub(1, Ordering::SeqCst);
        debug!(remaining = prev.saturating_sub(1), "Error stream subscriber dropped");
    }
}

pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;

    fn orphan(id: &str) -> ErrorEvent {
        ErrorEvent::OrphanResponse {
            channel: "cp1".into(),
            unique_id: id.into(),
        }
    }

    #[tokio::test]
    async fn events_before_the_first_subscriber_are_dropped() {
        let bus = EventBus::new();
        bus.publish(orphan("early"));

        let mut subscriber = bus.subscribe();
        bus.publish(orphan("late"));

        let message = subscriber.recv().await.unwrap();
        assert_eq!(message.event, orphan("late"));
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn close_ends_every_stream() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        bus.publish(orphan("a"));
        bus.close();

        assert!(first.recv().await.is_some());
        assert!(first.recv().await.is_none());

        let mut after_close = bus.subscribe();
        assert!(after_close.recv().await.is_none());
        assert!(bus.is_closed());
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_to_recent_events() {
        let bus = EventBus::with_capacity(2);
        let mut subscriber = bus.subscribe();
        for i in 0..5 {
            bus.publish(orphan(&i.to_string()));
        }
        let message = subscriber.recv().await.unwrap();
        assert_eq!(message.event, orphan("3"));
    }
}
