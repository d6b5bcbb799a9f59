//! Redis pub/sub broker for gateways running as separate processes
//!
//! Publishing goes through one multiplexed connection owned by a background
//! task. Every subscription opens its own pubsub connection, so dropping the
//! subscription closes it and unsubscribes on the server.

use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use redis::AsyncCommands;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{Broker, Subscription, CHANNEL_CAPACITY};

/// Snapshots queued for the publisher before new ones are dropped
const PUBLISH_QUEUE: usize = 256;
/// Wait between reconnect attempts
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Broker setup errors
#[derive(Debug, thiserror::Error)]
pub enum FanoutError {
    #[error("invalid redis url: {0}")]
    InvalidUrl(#[source] redis::RedisError),
}

pub struct RedisBroker {
    client: redis::Client,
    publish_tx: mpsc::Sender<(String, Bytes)>,
}

impl RedisBroker {
    /// Parse the url and start the publisher task. Needs a running tokio
    /// runtime; the server itself is contacted lazily.
    pub fn new(url: &str) -> Result<Self, FanoutError> {
        let client = redis::Client::open(url).map_err(FanoutError::InvalidUrl)?;
        let (publish_tx, publish_rx) = mpsc::channel(PUBLISH_QUEUE);
        tokio::spawn(publish_loop(client.clone(), publish_rx));
        Ok(Self { client, publish_tx })
    }
}

impl Broker for RedisBroker {
    fn publish(&self, channel: &str, message: Bytes) {
        match self.publish_tx.try_send((channel.to_string(), message)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(channel, "Redis publish queue full, dropping message");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!(channel, "Redis publisher stopped");
            }
        }
    }

    fn subscribe(&self, channel: &str) -> Subscription {
        let (tx, rx) = broadcast::channel(CHANNEL_CAPACITY);
        let listener = tokio::spawn(subscribe_loop(self.client.clone(), channel.to_string(), tx));
        Subscription::with_listener(channel, rx, listener)
    }
}

async fn publish_loop(client: redis::Client, mut publish_rx: mpsc::Receiver<(String, Bytes)>) {
    let mut conn: Option<redis::aio::MultiplexedConnection> = None;
    let mut retry_at: Option<Instant> = None;

    while let Some((channel, message)) = publish_rx.recv().await {
        if conn.is_none() {
            if retry_at.is_some_and(|at| Instant::now() < at) {
                continue;
            }
            match client.get_multiplexed_async_connection().await {
                Ok(c) => {
                    info!("Redis publisher connected");
                    conn = Some(c);
                    retry_at = None;
                }
                Err(e) => {
                    warn!(error = %e, "Redis unavailable, dropping snapshots");
                    retry_at = Some(Instant::now() + RECONNECT_DELAY);
                    continue;
                }
            }
        }

        if let Some(c) = conn.as_mut() {
            let published: redis::RedisResult<()> = c.publish(&channel, &message[..]).await;
            if let Err(e) = published {
                warn!(channel = %channel, error = %e, "Redis publish failed");
                conn = None;
            }
        }
    }

    debug!("Redis publisher stopped");
}

async fn subscribe_loop(client: redis::Client, channel: String, tx: broadcast::Sender<Bytes>) {
    loop {
        match client.get_async_pubsub().await {
            Ok(mut pubsub) => match pubsub.subscribe(&channel).await {
                Ok(()) => {
                    debug!(channel = %channel, "Redis subscription open");
                    let mut messages = pubsub.on_message();
                    while let Some(msg) = messages.next().await {
                        // No receiver left: the subscription was dropped
                        if tx.send(Bytes::copy_from_slice(msg.get_payload_bytes())).is_err() {
                            return;
                        }
                    }
                    warn!(channel = %channel, "Redis subscription lost, reconnecting");
                }
                Err(e) => warn!(channel = %channel, error = %e, "Redis subscribe failed"),
            },
            Err(e) => warn!(channel = %channel, error = %e, "Redis unavailable for subscription"),
        }

        if tx.receiver_count() == 0 {
            return;
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}
