//! Fanout publisher/subscriber
//!
//! The ticker publishes one snapshot per tick to the arena channel and every
//! session holds its own subscription. Gateways sharing the same broker see
//! each other's snapshots, which is what keeps several processes behind a
//! load balancer on one consistent arena view.

pub mod redis_pubsub;

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

pub use redis_pubsub::RedisBroker;

/// Messages buffered per channel before slow subscribers start skipping
pub(crate) const CHANNEL_CAPACITY: usize = 64;

/// Publish/subscribe contract consumed by the gateway
pub trait Broker: Send + Sync + 'static {
    /// Fire-and-forget publish; never blocks the caller
    fn publish(&self, channel: &str, message: Bytes);

    /// Subscribe to a channel. Dropping the subscription unsubscribes.
    fn subscribe(&self, channel: &str) -> Subscription;
}

/// Stream of messages from one channel
pub struct Subscription {
    channel: String,
    rx: broadcast::Receiver<Bytes>,
    /// Listener feeding `rx`, owned when the broker runs one per subscription
    listener: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, rx: broadcast::Receiver<Bytes>) -> Self {
        Self {
            channel: channel.into(),
            rx,
            listener: None,
        }
    }

    /// Subscription whose listener task is aborted when it is dropped
    pub fn with_listener(
        channel: impl Into<String>,
        rx: broadcast::Receiver<Bytes>,
        listener: JoinHandle<()>,
    ) -> Self {
        Self {
            channel: channel.into(),
            rx,
            listener: Some(listener),
        }
    }

    /// Next message, or `None` once the channel is gone
    pub async fn recv(&mut self) -> Option<Bytes> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(channel = %self.channel, lagged_count = n, "Subscriber lagged, skipping {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

/// In-memory broker; gateways sharing one instance behave like sibling
/// processes sharing one external channel
#[derive(Default)]
pub struct LocalBroker {
    channels: DashMap<String, broadcast::Sender<Bytes>>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Bytes> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Live subscriptions on a channel
    #[cfg(test)]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Broker for LocalBroker {
    fn publish(&self, channel: &str, message: Bytes) {
        // Err only means nobody is subscribed right now
        if self.sender(channel).send(message).is_err() {
            trace!(channel, "Published with no subscribers");
        }
    }

    fn subscribe(&self, channel: &str) -> Subscription {
        Subscription::new(channel, self.sender(channel).subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn subscribers_receive_published_bytes_verbatim() {
        let broker = LocalBroker::new();
        let mut a = broker.subscribe("game1");
        let mut b = broker.subscribe("game1");

        broker.publish("game1", Bytes::from_static(b"{\"code\":\"x\"}"));

        assert_eq!(a.recv().await.unwrap(), Bytes::from_static(b"{\"code\":\"x\"}"));
        assert_eq!(b.recv().await.unwrap(), Bytes::from_static(b"{\"code\":\"x\"}"));
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let broker = LocalBroker::new();
        let mut other = broker.subscribe("game2");
        broker.publish("game1", Bytes::from_static(b"hello"));

        let res = timeout(Duration::from_millis(20), other.recv()).await;
        assert!(res.is_err(), "game2 must not see game1 traffic");
    }

    #[tokio::test]
    async fn dropping_subscription_unsubscribes() {
        let broker = LocalBroker::new();
        let sub = broker.subscribe("game1");
        assert_eq!(broker.subscriber_count("game1"), 1);
        drop(sub);
        assert_eq!(broker.subscriber_count("game1"), 0);

        // Publishing with no subscribers is fine
        broker.publish("game1", Bytes::from_static(b"x"));
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_ahead() {
        let broker = LocalBroker::new();
        let mut sub = broker.subscribe("game1");
        for i in 0..(CHANNEL_CAPACITY + 10) {
            broker.publish("game1", Bytes::from(i.to_string()));
        }
        // Oldest messages were overwritten; the first one we get is not "0"
        let first = sub.recv().await.unwrap();
        assert_ne!(first, Bytes::from("0"));
    }
}
