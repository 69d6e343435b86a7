//! Broadcast channel used to tell every process that the tenant set changed.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use redis::{aio::ConnectionManager, AsyncCommands};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use super::signal::RefreshSignal;
use crate::store::StoreError;

pub type SignalStream = BoxStream<'static, Result<Vec<u8>, StoreError>>;

#[async_trait]
pub trait InvalidationBus: Send + Sync {
    async fn publish(&self, payload: &[u8]) -> Result<(), StoreError>;

    /// Open a new subscription. The stream ends when the connection drops.
    async fn subscribe(&self) -> Result<SignalStream, StoreError>;
}

/// In-process bus. Clones share the same channel, which is how tests stand
/// up several "processes" in one runtime.
#[derive(Clone, Debug)]
pub struct MemoryBus {
    sender: broadcast::Sender<Vec<u8>>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }
}

#[async_trait]
impl InvalidationBus for MemoryBus {
    async fn publish(&self, payload: &[u8]) -> Result<(), StoreError> {
        // No subscribers is not an error.
        let _ = self.sender.send(payload.to_vec());
        Ok(())
    }

    async fn subscribe(&self) -> Result<SignalStream, StoreError> {
        let receiver = self.sender.subscribe();
        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            match receiver.recv().await {
                Ok(payload) => Some((Ok(payload), receiver)),
                Err(RecvError::Lagged(missed)) => {
                    // Missed signals collapse into one refresh.
                    warn!("Invalidation subscriber lagged by {missed} messages");
                    let payload = serde_json::to_vec(&RefreshSignal::now()).map_err(StoreError::from);
                    Some((payload, receiver))
                }
                Err(RecvError::Closed) => None,
            }
        });
        Ok(stream.boxed())
    }
}

/// Redis pub/sub. Publishing goes through a shared connection; every
/// subscription opens its own dedicated connection.
#[derive(Clone)]
pub struct RedisBus {
    client: redis::Client,
    publisher: ConnectionManager,
    channel: String,
}

impl RedisBus {
    /// # Errors
    /// Returns an error if the URL is invalid or the publisher cannot connect.
    pub async fn connect(url: &str, channel: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("Invalid redis url")?;
        let publisher = ConnectionManager::new(client.clone())
            .await
            .context("Failed to connect to redis")?;
        Ok(Self {
            client,
            publisher,
            channel: channel.to_string(),
        })
    }
}

#[async_trait]
impl InvalidationBus for RedisBus {
    async fn publish(&self, payload: &[u8]) -> Result<(), StoreError> {
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn.publish(&self.channel, payload).await?;
        debug!("Published invalidation to {receivers} subscribers");
        Ok(())
    }

    async fn subscribe(&self) -> Result<SignalStream, StoreError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.channel).await?;
        let stream = pubsub
            .into_on_message()
            .map(|message| Ok(message.get_payload_bytes().to_vec()));
        Ok(stream.boxed())
    }
}
