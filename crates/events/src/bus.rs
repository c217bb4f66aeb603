//! Fan-out event bus with per-subscriber channels

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::{logging, AppEvent, EventMeta};

/// An event together with its emission metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub meta: EventMeta,
    pub event: AppEvent,
}

impl EventMessage {
    /// Build a message with metadata derived from the event itself
    #[must_use]
    pub fn from_event(event: AppEvent) -> Self {
        let mut meta = EventMeta::new(event.log_level(), event.event_source());
        if let Some(correlation) = event.correlation_id() {
            meta = meta.with_correlation_id(correlation);
        }
        Self { meta, event }
    }
}

/// Handle identifying one subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Receiving end of a bus subscription
///
/// Dropping the subscription unsubscribes it on the next publish.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    rx: UnboundedReceiver<EventMessage>,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next event; `None` once unsubscribed and drained
    pub async fn recv(&mut self) -> Option<EventMessage> {
        self.rx.recv().await
    }

    /// Take the next buffered event without waiting
    pub fn try_recv(&mut self) -> Option<EventMessage> {
        self.rx.try_recv().ok()
    }
}

#[derive(Debug, Default)]
struct Subscribers {
    next_sequence: u64,
    senders: Vec<(SubscriberId, UnboundedSender<EventMessage>)>,
}

/// Event Sink shared by every component
///
/// Each subscriber owns an unbounded channel, so a slow consumer never blocks
/// publishers. Messages are numbered and delivered under one lock, so every
/// subscriber observes the same global order.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Subscribers>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().senders.push((id, tx));
        Subscription { id, rx }
    }

    /// Remove a subscriber; returns whether it was registered
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.lock();
        let before = subscribers.senders.len();
        subscribers.senders.retain(|(sid, _)| *sid != id);
        subscribers.senders.len() != before
    }

    /// Number of live subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.lock();
        subscribers.senders.retain(|(_, tx)| !tx.is_closed());
        subscribers.senders.len()
    }

    /// Log the event and deliver it to every live subscriber
    pub fn publish(&self, event: AppEvent) {
        let mut message = EventMessage::from_event(event);
        let mut subscribers = self.lock();
        message.meta.sequence = subscribers.next_sequence;
        subscribers.next_sequence += 1;
        logging::log_event(&message);
        subscribers
            .senders
            .retain(|(_, tx)| tx.send(message.clone()).is_ok());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Subscribers> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DownloadEvent;
    use fetchup_types::DownloadId;

    fn cancelled(id: &str) -> AppEvent {
        AppEvent::Download(DownloadEvent::Cancelled {
            id: DownloadId::new(id),
        })
    }

    #[tokio::test]
    async fn delivers_to_every_subscriber_in_order() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(cancelled("one"));
        bus.publish(cancelled("two"));

        for sub in [&mut a, &mut b] {
            let first = sub.recv().await.unwrap();
            let second = sub.recv().await.unwrap();
            assert!(first.meta.sequence < second.meta.sequence);
            assert_eq!(first.meta.correlation_id.as_deref(), Some("one"));
            assert_eq!(second.meta.correlation_id.as_deref(), Some("two"));
        }
    }

    #[tokio::test]
    async fn unsubscribe_closes_the_channel() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        assert!(bus.unsubscribe(sub.id()));
        assert!(!bus.unsubscribe(sub.id()));

        bus.publish(cancelled("ignored"));
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        let _kept = bus.subscribe();
        drop(sub);
        bus.publish(cancelled("prune"));
        assert_eq!(bus.subscriber_count(), 1);
    }
}
