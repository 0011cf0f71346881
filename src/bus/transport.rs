//! Pub/sub transports carrying raw bus payloads.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::{Mutex, broadcast};
use tracing::warn;

use crate::common::error::BusError;

/// Stream of raw payloads received on one channel.
pub type PayloadStream = BoxStream<'static, String>;

/// A named-channel publish/subscribe transport.
#[async_trait]
pub trait BusTransport: Send + Sync {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError>;

    async fn subscribe(&self, channel: &str) -> Result<PayloadStream, BusError>;
}

/// Redis pub/sub.
pub struct RedisTransport {
    client: redis::Client,
    manager: ConnectionManager,
}

impl RedisTransport {
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client.clone()).await?;
        Ok(Self { client, manager })
    }
}

#[async_trait]
impl BusTransport for RedisTransport {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError> {
        let mut conn = self.manager.clone();
        let _receivers: i64 = conn.publish(channel, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<PayloadStream, BusError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move {
                match msg.get_payload::<String>() {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        warn!("Dropping non-text payload on {}: {}", msg.get_channel_name(), e);
                        None
                    }
                }
            });

        Ok(stream.boxed())
    }
}

/// In-process transport backed by one broadcast channel per name.
pub struct MemoryTransport {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    capacity: usize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: 256,
        }
    }

    async fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusTransport for MemoryTransport {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError> {
        // No subscribers is not an error, same as redis PUBLISH returning 0.
        let _ = self.sender(channel).await.send(payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<PayloadStream, BusError> {
        let rx = self.sender(channel).await.subscribe();
        let name = channel.to_string();

        let stream = stream::unfold((rx, name), |(mut rx, name)| async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => return Some((payload, (rx, name))),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Subscriber on {} lagged, {} payloads lost", name, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(stream.boxed())
    }
}
