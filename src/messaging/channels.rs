// Lock-free event channels

use crate::messaging::notification::QueueEvent;
use ringbuf::{HeapRb, traits::Split};

pub type EventProducer = ringbuf::HeapProd<QueueEvent>;
pub type EventConsumer = ringbuf::HeapCons<QueueEvent>;

pub fn create_event_channel(capacity: usize) -> (EventProducer, EventConsumer) {
    let rb = HeapRb::<QueueEvent>::new(capacity);
    rb.split()
}
