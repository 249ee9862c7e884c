//! Bridge between the shared pub/sub bus and the local hub.
//!
//! Every chat-relevant event (chat lines, presence notices, diagnostic
//! broadcasts) goes out through [`Bridge::publish`], even when the only
//! recipients are on this instance. The subscription loop relays whatever
//! arrives on the wildcard pattern into the hub's local fan-out, byte for
//! byte.
//!
//! # Failure semantics
//!
//! - A publish failure is returned to the caller. Nothing is retried here.
//! - The subscription ending is fatal to this instance's relay. There is no
//!   reconnect; the process is expected to be restarted.

pub mod mock;
pub mod redis_bus;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::actors::HubHandle;
use crate::errors::ChatError;
use crate::observability::metrics;
use crate::protocol::Envelope;

pub use redis_bus::RedisBus;

/// One message received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Concrete topic the message was published on.
    pub topic: String,
    /// Opaque payload, identical to what the publisher sent.
    pub payload: Bytes,
}

/// Stream of bus messages for one pattern subscription.
pub type BusSubscription = BoxStream<'static, BusMessage>;

/// Publish/subscribe transport.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish `payload` on `topic`.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), ChatError>;

    /// Subscribe to every topic matching the glob `pattern`.
    ///
    /// Returns once the subscription is confirmed. The stream ends when the
    /// subscription is lost.
    async fn subscribe(&self, pattern: &str) -> Result<BusSubscription, ChatError>;
}

/// Namespacing adapter over a [`MessageBus`].
#[derive(Clone)]
pub struct Bridge {
    bus: Arc<dyn MessageBus>,
    topic_prefix: Arc<str>,
}

impl Bridge {
    pub fn new(bus: Arc<dyn MessageBus>, topic_prefix: &str) -> Self {
        Self {
            bus,
            topic_prefix: Arc::from(topic_prefix),
        }
    }

    /// Bus topic for a channel name.
    #[must_use]
    pub fn topic_for(&self, channel: &str) -> String {
        format!("{}{channel}", self.topic_prefix)
    }

    /// Wildcard pattern covering every chat topic.
    #[must_use]
    pub fn subscription_pattern(&self) -> String {
        format!("{}*", self.topic_prefix)
    }

    /// Serialize `envelope` and publish it on the channel's topic.
    ///
    /// # Errors
    ///
    /// `Serialization` if encoding fails, `Publish` if the bus rejects it.
    #[instrument(skip_all, fields(channel = %channel, kind = envelope.kind()))]
    pub async fn publish(&self, channel: &str, envelope: &Envelope) -> Result<(), ChatError> {
        let payload = envelope.to_bytes()?;
        let topic = self.topic_for(channel);

        match self.bus.publish(&topic, payload).await {
            Ok(()) => {
                metrics::record_bus_publish("success");
                debug!(target: "chat.bridge", topic = %topic, "Published envelope");
                Ok(())
            }
            Err(e) => {
                metrics::record_bus_publish("error");
                warn!(target: "chat.bridge", topic = %topic, error = %e, "Publish failed");
                Err(e)
            }
        }
    }

    /// Open the wildcard subscription.
    ///
    /// # Errors
    ///
    /// Whatever the bus returns when the subscription cannot be established.
    pub async fn subscribe(&self) -> Result<BusSubscription, ChatError> {
        let pattern = self.subscription_pattern();
        let subscription = self.bus.subscribe(&pattern).await?;
        info!(target: "chat.bridge", pattern = %pattern, "Subscribed to chat topics");
        Ok(subscription)
    }
}

/// Relay every bus message into the hub's local fan-out until cancelled.
///
/// Payloads are forwarded without inspection.
///
/// # Errors
///
/// `SubscriptionFatal` if the subscription stream ends, or `HubUnavailable`
/// if the hub stopped while the relay was still running.
pub async fn run_subscription(
    mut subscription: BusSubscription,
    hub: HubHandle,
    cancel_token: CancellationToken,
) -> Result<(), ChatError> {
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                debug!(target: "chat.bridge", "Subscription relay cancelled");
                return Ok(());
            }

            next = subscription.next() => {
                let Some(message) = next else {
                    warn!(target: "chat.bridge", "Bus subscription ended");
                    return Err(ChatError::SubscriptionFatal(
                        "bus subscription stream ended".to_string(),
                    ));
                };

                metrics::record_bus_message_received();
                hub.deliver_local(message.payload).await?;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::mock::MockBus;
    use super::*;
    use common::types::UserIdentity;

    fn bridge(bus: &Arc<MockBus>) -> Bridge {
        Bridge::new(Arc::clone(bus) as Arc<dyn MessageBus>, "chat:")
    }

    #[test]
    fn test_topic_naming() {
        let bus = Arc::new(MockBus::new());
        let bridge = bridge(&bus);

        assert_eq!(bridge.topic_for("general"), "chat:general");
        assert_eq!(bridge.subscription_pattern(), "chat:*");
    }

    #[tokio::test]
    async fn test_publish_serializes_once_onto_namespaced_topic() {
        let bus = Arc::new(MockBus::new());
        let bridge = bridge(&bus);
        let alice = UserIdentity::new(1, "alice", "alice@example.com");
        let envelope = Envelope::chat("general", "hi", &alice);

        bridge.publish("general", &envelope).await.unwrap();

        let published = bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "chat:general");
        let decoded: Envelope = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[tokio::test]
    async fn test_publish_error_is_returned_to_caller() {
        let bus = Arc::new(MockBus::new());
        bus.fail_publishes(true);
        let bridge = bridge(&bus);

        let result = bridge.publish("general", &Envelope::diagnostic("general")).await;
        assert!(matches!(result, Err(ChatError::Publish(_))));
    }

    #[tokio::test]
    async fn test_subscription_sees_only_matching_topics() {
        let bus = Arc::new(MockBus::new());
        let bridge = bridge(&bus);
        let mut subscription = bridge.subscribe().await.unwrap();

        bus.publish("other:general", Bytes::from_static(b"skip"))
            .await
            .unwrap();
        bus.publish("chat:general", Bytes::from_static(b"keep"))
            .await
            .unwrap();

        let message = subscription.next().await.unwrap();
        assert_eq!(message.topic, "chat:general");
        assert_eq!(message.payload, Bytes::from_static(b"keep"));
    }
}
