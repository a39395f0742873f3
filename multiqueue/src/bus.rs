//! Publish engine events to subscribers without blocking the publisher.

use crate::{Dequeued, Enqueued, Tip};
use futures::channel::mpsc;
use prometheus_client::metrics::counter::Counter;
use std::sync::Mutex;
use tracing::warn;

/// A single event stream with any number of bounded subscribers.
pub(crate) struct Topic<T: Clone> {
    name: &'static str,
    capacity: usize,
    subscribers: Mutex<Vec<mpsc::Sender<T>>>,
    dropped: Counter,
}

impl<T: Clone> Topic<T> {
    fn new(name: &'static str, capacity: usize, dropped: Counter) -> Self {
        Self {
            name,
            capacity,
            subscribers: Mutex::new(Vec::new()),
            dropped,
        }
    }

    /// Register a new subscriber that receives every event published from now on.
    ///
    /// Dropping the receiver unsubscribes it.
    pub fn subscribe(&self) -> mpsc::Receiver<T> {
        let (sender, receiver) = mpsc::channel(self.capacity);
        self.subscribers.lock().unwrap().push(sender);
        receiver
    }

    /// Deliver `event` to every subscriber with room for it.
    ///
    /// Subscribers whose buffer is full miss the event. Closed subscribers are removed.
    pub fn publish(&self, event: T) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain_mut(|subscriber| match subscriber.try_send(event.clone()) {
            Ok(()) => true,
            Err(err) if err.is_full() => {
                warn!(topic = self.name, "subscriber full: dropping event");
                self.dropped.inc();
                true
            }
            Err(_) => false,
        });
    }

    /// Number of live subscribers.
    #[cfg(test)]
    pub fn subscribers(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

/// The topics published by an [crate::Engine].
pub(crate) struct Bus {
    pub enqueue: Topic<Enqueued>,
    pub dequeue: Topic<Dequeued>,
    pub tip: Topic<Tip>,
}

impl Bus {
    pub fn new(capacity: usize, dropped: Counter) -> Self {
        Self {
            enqueue: Topic::new("enqueue", capacity, dropped.clone()),
            dequeue: Topic::new("dequeue", capacity, dropped.clone()),
            tip: Topic::new("tip", capacity, dropped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{FutureExt, StreamExt};

    #[test]
    fn test_publish_to_all_subscribers() {
        let topic = Topic::new("test", 4, Counter::default());
        let mut a = topic.subscribe();
        let mut b = topic.subscribe();
        topic.publish(1u64);
        topic.publish(2u64);
        assert_eq!(a.next().now_or_never(), Some(Some(1)));
        assert_eq!(a.next().now_or_never(), Some(Some(2)));
        assert_eq!(b.next().now_or_never(), Some(Some(1)));
        assert_eq!(b.next().now_or_never(), Some(Some(2)));
        assert!(a.next().now_or_never().is_none());
    }

    #[test]
    fn test_full_subscriber_drops_events() {
        let dropped = Counter::<u64>::default();
        let topic = Topic::new("test", 0, dropped.clone());
        let mut slow = topic.subscribe();

        // A channel holds its buffer plus one slot per sender
        topic.publish(1u64);
        topic.publish(2u64);
        topic.publish(3u64);
        assert_eq!(dropped.get(), 2);
        assert_eq!(topic.subscribers(), 1);

        assert_eq!(slow.next().now_or_never(), Some(Some(1)));
        assert!(slow.next().now_or_never().is_none());

        // Room frees up once the subscriber catches up
        topic.publish(4u64);
        assert_eq!(slow.next().now_or_never(), Some(Some(4)));
    }

    #[test]
    fn test_closed_subscriber_removed() {
        let topic = Topic::new("test", 4, Counter::default());
        let kept = topic.subscribe();
        let closed = topic.subscribe();
        drop(closed);
        assert_eq!(topic.subscribers(), 2);
        topic.publish(1u64);
        assert_eq!(topic.subscribers(), 1);
        drop(kept);
    }
}
