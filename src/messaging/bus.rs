// EventBus - fan-out of queue notifications to subscribers

use crate::command::session::SessionId;
use crate::messaging::channels::{EventConsumer, create_event_channel};
use crate::messaging::notification::{QueueAction, QueueEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Callback invoked for every published event
pub type Listener = Arc<dyn Fn(&QueueEvent) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Synchronous notification hub.
///
/// Listeners run on the publishing thread, after the engine has released its
/// internal state, so they may call back into the engine.
pub struct EventBus {
    enabled: AtomicBool,
    next_id: AtomicU64,
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
}

impl EventBus {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, listener: impl Fn(&QueueEvent) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Subscribe through a bounded ring buffer.
    ///
    /// Events that do not fit are dropped; the consumer side can be drained
    /// from any single thread.
    pub fn subscribe_channel(&self, capacity: usize) -> (SubscriptionId, EventConsumer) {
        let (producer, consumer) = create_event_channel(capacity);
        let producer = Mutex::new(producer);
        let id = self.subscribe(move |event| {
            let mut producer = producer.lock();
            if ringbuf::traits::Producer::try_push(&mut *producer, event.clone()).is_err() {
                tracing::trace!(action = %event.action, "event channel full, dropping event");
            }
        });
        (id, consumer)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(sub, _)| *sub != id);
        listeners.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn publish(&self, action: QueueAction, session: SessionId) {
        if !self.is_enabled() {
            return;
        }
        // Snapshot so listeners can (un)subscribe while being notified.
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        if listeners.is_empty() {
            return;
        }
        let event = QueueEvent::new(action, session);
        for listener in listeners {
            listener(&event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbuf::traits::Consumer;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let bus = EventBus::default();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let id = bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(QueueAction::Enqueued, SessionId::DEFAULT);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(QueueAction::Applied, SessionId::DEFAULT);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disabled_bus_is_silent() {
        let bus = EventBus::new(false);
        let (_, mut consumer) = bus.subscribe_channel(8);

        bus.publish(QueueAction::Enqueued, SessionId::DEFAULT);
        assert!(consumer.try_pop().is_none());

        bus.set_enabled(true);
        bus.publish(QueueAction::Enqueued, SessionId::DEFAULT);
        assert_eq!(consumer.try_pop().map(|e| e.action), Some(QueueAction::Enqueued));
    }

    #[test]
    fn test_full_channel_drops_events() {
        let bus = EventBus::default();
        let (_, mut consumer) = bus.subscribe_channel(2);

        for _ in 0..5 {
            bus.publish(QueueAction::Applied, SessionId::DEFAULT);
        }

        let mut received = 0;
        while consumer.try_pop().is_some() {
            received += 1;
        }
        assert_eq!(received, 2);
    }
}
