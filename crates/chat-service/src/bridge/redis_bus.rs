//! Redis pub/sub implementation of [`MessageBus`].
//!
//! Publishing goes through a `MultiplexedConnection`, which is cheap to clone
//! and safe to use concurrently. Each subscription opens its own dedicated
//! pub/sub connection since Redis puts a subscribed connection into a
//! restricted mode.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tracing::{debug, error};

use super::{BusMessage, BusSubscription, MessageBus};
use crate::errors::ChatError;

/// Redis-backed bus.
#[derive(Clone)]
pub struct RedisBus {
    client: Client,
    connection: MultiplexedConnection,
}

impl RedisBus {
    /// Open a client and the shared publishing connection.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::Redis` if the URL is invalid or the server is
    /// unreachable.
    pub async fn connect(redis_url: &str) -> Result<Self, ChatError> {
        let client = Client::open(redis_url).map_err(|e| {
            // Do not log the URL, it may carry credentials
            error!(target: "chat.bridge.redis", error = %e, "Failed to open Redis client");
            ChatError::Redis(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(target: "chat.bridge.redis", error = %e, "Failed to connect to Redis");
                ChatError::Redis(format!("Failed to connect to Redis: {e}"))
            })?;

        Ok(Self { client, connection })
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), ChatError> {
        let mut conn = self.connection.clone();
        let receivers: i64 = conn
            .publish(topic, payload.as_ref())
            .await
            .map_err(|e| ChatError::Publish(e.to_string()))?;

        debug!(target: "chat.bridge.redis", topic = %topic, receivers, "PUBLISH");
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<BusSubscription, ChatError> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(|e| {
            error!(target: "chat.bridge.redis", error = %e, "Failed to open pub/sub connection");
            ChatError::Redis(format!("Failed to open pub/sub connection: {e}"))
        })?;

        pubsub.psubscribe(pattern).await.map_err(|e| {
            error!(target: "chat.bridge.redis", error = %e, pattern = %pattern, "PSUBSCRIBE failed");
            ChatError::Redis(format!("PSUBSCRIBE failed: {e}"))
        })?;

        let stream = pubsub.into_on_message().map(|msg| BusMessage {
            topic: msg.get_channel_name().to_string(),
            payload: Bytes::copy_from_slice(msg.get_payload_bytes()),
        });

        Ok(stream.boxed())
    }
}
