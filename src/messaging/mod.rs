// Notification plumbing: events, lock-free channels and the subscriber hub

pub mod bus;
pub mod channels;
pub mod notification;

pub use bus::{EventBus, Listener, SubscriptionId};
pub use channels::{EventConsumer, EventProducer, create_event_channel};
pub use notification::{QueueAction, QueueEvent};
