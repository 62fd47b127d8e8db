//! In-process pub/sub broker.
//!
//! Fans each publish out to every subscriber of the channel, synchronously on
//! the publishing task, the way a network transport would call back on its own
//! I/O thread. Subscribers only enqueue, so this never runs handler code.
//!
//! # Example
//!
//! ```
//! use packet_bridge::transport::{MemoryBroker, Publisher};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let broker = MemoryBroker::new();
//! let publisher = broker.publisher();
//! publisher.publish("lobby:chat", "hi".into()).await.unwrap();
//! assert_eq!(broker.published(), 1);
//! # }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;

use super::{MessageListener, Publisher, Subscriber};
use crate::error::{PacketError, Result};
use crate::handler::BoxFuture;

#[derive(Default)]
struct BrokerInner {
    /// channel -> (subscriber id -> listener)
    channels: DashMap<String, Vec<(u64, Arc<dyn MessageListener>)>>,
    next_subscriber: AtomicU64,
    published: AtomicU64,
    delivered: AtomicU64,
}

/// Shared in-process broker. Cheap to clone.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publisher with no added latency.
    pub fn publisher(&self) -> MemoryPublisher {
        MemoryPublisher {
            broker: self.clone(),
            latency: None,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// New subscriber connection.
    pub fn subscriber(&self) -> MemorySubscriber {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::AcqRel);
        MemorySubscriber {
            broker: self.clone(),
            id,
            closed: AtomicBool::new(false),
        }
    }

    /// Deliver `payload` to every listener on `channel`.
    ///
    /// Returns the number of listeners reached.
    pub fn publish(&self, channel: &str, payload: Bytes) -> usize {
        self.inner.published.fetch_add(1, Ordering::AcqRel);

        // Snapshot so no map lock is held while listeners run.
        let listeners: Vec<Arc<dyn MessageListener>> = match self.inner.channels.get(channel) {
            Some(entry) => entry.iter().map(|(_, l)| l.clone()).collect(),
            None => return 0,
        };

        for listener in &listeners {
            listener.on_message(channel, payload.clone());
        }

        self.inner
            .delivered
            .fetch_add(listeners.len() as u64, Ordering::AcqRel);
        listeners.len()
    }

    /// Number of subscribers on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .get(channel)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }

    /// Total publishes since creation.
    pub fn published(&self) -> u64 {
        self.inner.published.load(Ordering::Acquire)
    }

    /// Total listener deliveries since creation.
    pub fn delivered(&self) -> u64 {
        self.inner.delivered.load(Ordering::Acquire)
    }

    fn add(&self, channel: &str, id: u64, listener: Arc<dyn MessageListener>) {
        let mut entry = self.inner.channels.entry(channel.to_string()).or_default();
        match entry.iter_mut().find(|(sub, _)| *sub == id) {
            Some(slot) => slot.1 = listener,
            None => entry.push((id, listener)),
        }
    }

    fn remove_subscriber(&self, id: u64) {
        self.inner.channels.retain(|_, listeners| {
            listeners.retain(|(sub, _)| *sub != id);
            !listeners.is_empty()
        });
    }
}

/// Publishing connection to a [`MemoryBroker`].
///
/// Clones share the connection, so closing one closes all of them.
#[derive(Clone)]
pub struct MemoryPublisher {
    broker: MemoryBroker,
    latency: Option<Duration>,
    closed: Arc<AtomicBool>,
}

impl MemoryPublisher {
    /// Delay every publish by `latency`, simulating a slow link.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Publisher for MemoryPublisher {
    fn publish(&self, channel: &str, payload: Bytes) -> BoxFuture<'static, Result<()>> {
        let broker = self.broker.clone();
        let latency = self.latency;
        let closed = self.closed.clone();
        let channel = channel.to_string();

        Box::pin(async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            if closed.load(Ordering::Acquire) {
                return Err(PacketError::Transport(
                    "publisher connection is closed".to_string(),
                ));
            }
            broker.publish(&channel, payload);
            Ok::<(), PacketError>(())
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Subscribing connection to a [`MemoryBroker`].
pub struct MemorySubscriber {
    broker: MemoryBroker,
    id: u64,
    closed: AtomicBool,
}

impl Subscriber for MemorySubscriber {
    fn subscribe(&self, channel: &str, listener: Arc<dyn MessageListener>) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PacketError::Transport(
                "subscriber connection is closed".to_string(),
            ));
        }
        self.broker.add(channel, self.id, listener);
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.broker.remove_subscriber(self.id);
        }
    }
}

impl Drop for MemorySubscriber {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, Bytes)>>,
    }

    impl MessageListener for Recorder {
        fn on_message(&self, channel: &str, payload: Bytes) {
            self.seen
                .lock()
                .unwrap()
                .push((channel.to_string(), payload));
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let broker = MemoryBroker::new();
        assert_eq!(broker.publish("nobody", Bytes::from_static(b"x")), 0);
        assert_eq!(broker.published(), 1);
        assert_eq!(broker.delivered(), 0);
    }

    #[test]
    fn test_fan_out_to_all_subscribers() {
        let broker = MemoryBroker::new();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());

        let sub_a = broker.subscriber();
        let sub_b = broker.subscriber();
        sub_a.subscribe("room", a.clone()).unwrap();
        sub_b.subscribe("room", b.clone()).unwrap();

        assert_eq!(broker.publish("room", Bytes::from_static(b"hello")), 2);
        assert_eq!(a.seen.lock().unwrap().len(), 1);
        assert_eq!(b.seen.lock().unwrap()[0].1, Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_resubscribe_replaces_listener() {
        let broker = MemoryBroker::new();
        let old = Arc::new(Recorder::default());
        let new = Arc::new(Recorder::default());

        let sub = broker.subscriber();
        sub.subscribe("room", old.clone()).unwrap();
        sub.subscribe("room", new.clone()).unwrap();
        assert_eq!(broker.subscriber_count("room"), 1);

        broker.publish("room", Bytes::from_static(b"x"));
        assert!(old.seen.lock().unwrap().is_empty());
        assert_eq!(new.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_close_removes_subscriptions() {
        let broker = MemoryBroker::new();
        let rec = Arc::new(Recorder::default());

        let sub = broker.subscriber();
        sub.subscribe("a", rec.clone()).unwrap();
        sub.subscribe("b", rec.clone()).unwrap();

        sub.close();
        sub.close();

        assert_eq!(broker.subscriber_count("a"), 0);
        assert_eq!(broker.publish("b", Bytes::new()), 0);
        assert!(sub.subscribe("c", rec).is_err());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let broker = MemoryBroker::new();
        {
            let sub = broker.subscriber();
            sub.subscribe("room", Arc::new(Recorder::default())).unwrap();
            assert_eq!(broker.subscriber_count("room"), 1);
        }
        assert_eq!(broker.subscriber_count("room"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publisher_latency() {
        let broker = MemoryBroker::new();
        let publisher = broker.publisher().with_latency(Duration::from_millis(250));

        let start = tokio::time::Instant::now();
        publisher
            .publish("room", Bytes::from_static(b"late"))
            .await
            .unwrap();

        assert!(start.elapsed() >= Duration::from_millis(250));
        assert_eq!(broker.published(), 1);
    }

    #[tokio::test]
    async fn test_closed_publisher_rejects() {
        let broker = MemoryBroker::new();
        let publisher = broker.publisher();
        let shared = publisher.clone();

        publisher.close();
        publisher.close();

        assert!(shared.is_closed());
        let err = shared
            .publish("room", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, PacketError::Transport(_)));
        assert_eq!(broker.published(), 0);
    }
}
