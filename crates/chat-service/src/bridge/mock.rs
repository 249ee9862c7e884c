//! In-memory bus for tests.
//!
//! Loops every publish back to the subscriptions whose glob pattern matches
//! the topic, records publishes for assertions, and can be told to fail.

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{BusMessage, BusSubscription, MessageBus};
use crate::errors::ChatError;

/// Mock bus with Redis-style pattern subscriptions.
#[derive(Clone, Default)]
pub struct MockBus {
    inner: Arc<Mutex<MockBusInner>>,
}

#[derive(Default)]
struct MockBusInner {
    subscribers: Vec<(String, mpsc::UnboundedSender<BusMessage>)>,
    published: Vec<BusMessage>,
    fail_publishes: bool,
    fail_subscribes: bool,
}

impl MockBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockBusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every subsequent publish fail with `ChatError::Publish`.
    pub fn fail_publishes(&self, fail: bool) {
        self.lock().fail_publishes = fail;
    }

    /// Make every subsequent subscribe fail with `ChatError::Redis`.
    pub fn fail_subscribes(&self, fail: bool) {
        self.lock().fail_subscribes = fail;
    }

    /// Successful publishes, in order.
    #[must_use]
    pub fn published(&self) -> Vec<BusMessage> {
        self.lock().published.clone()
    }

    /// Successful publishes on one topic, in order.
    #[must_use]
    pub fn published_on(&self, topic: &str) -> Vec<Bytes> {
        self.lock()
            .published
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload.clone())
            .collect()
    }

    #[must_use]
    pub fn publish_count(&self) -> usize {
        self.lock().published.len()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|(_, tx)| !tx.is_closed());
        inner.subscribers.len()
    }

    /// End every open subscription stream, as if the bus connection dropped.
    pub fn drop_subscriptions(&self) {
        self.lock().subscribers.clear();
    }
}

#[async_trait]
impl MessageBus for MockBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), ChatError> {
        let mut inner = self.lock();
        if inner.fail_publishes {
            return Err(ChatError::Publish("mock bus unavailable".to_string()));
        }

        let message = BusMessage {
            topic: topic.to_string(),
            payload,
        };
        inner.subscribers.retain(|(pattern, tx)| {
            !glob_matches(pattern, topic) || tx.unbounded_send(message.clone()).is_ok()
        });
        inner.published.push(message);
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<BusSubscription, ChatError> {
        let mut inner = self.lock();
        if inner.fail_subscribes {
            return Err(ChatError::Redis("mock subscribe refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded();
        inner.subscribers.push((pattern.to_string(), tx));
        Ok(rx.boxed())
    }
}

/// Redis glob subset: `*` matches any run, `?` matches one character.
fn glob_matches(pattern: &str, topic: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let topic: Vec<char> = topic.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < topic.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || Some(&c) == topic.get(t) => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star_p, star_t)) => {
                    p = star_p + 1;
                    t = star_t + 1;
                    backtrack = Some((star_p, star_t + 1));
                }
                None => return false,
            },
        }
    }

    pattern.get(p..).is_some_and(|rest| rest.iter().all(|&c| c == '*'))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_matches() {
        assert!(glob_matches("chat:*", "chat:general"));
        assert!(glob_matches("chat:*", "chat:"));
        assert!(glob_matches("chat:?en*", "chat:general"));
        assert!(glob_matches("*", "anything"));
        assert!(glob_matches("chat:*:x", "chat:a:b:x"));
        assert!(!glob_matches("chat:*", "room:general"));
        assert!(!glob_matches("chat:general", "chat:generals"));
        assert!(!glob_matches("chat:?", "chat:"));
    }

    #[tokio::test]
    async fn test_publish_is_recorded_and_looped_back() {
        let bus = MockBus::new();
        let mut sub = bus.subscribe("chat:*").await.unwrap();

        bus.publish("chat:general", Bytes::from_static(b"one"))
            .await
            .unwrap();

        assert_eq!(bus.publish_count(), 1);
        assert_eq!(
            bus.published_on("chat:general"),
            vec![Bytes::from_static(b"one")]
        );
        assert_eq!(sub.next().await.unwrap().payload, Bytes::from_static(b"one"));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let bus = MockBus::new();
        bus.fail_publishes(true);
        bus.fail_subscribes(true);

        assert!(matches!(
            bus.publish("chat:general", Bytes::new()).await,
            Err(ChatError::Publish(_))
        ));
        assert!(bus.subscribe("chat:*").await.is_err());
        assert_eq!(bus.publish_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_subscriptions_ends_streams() {
        let bus = MockBus::new();
        let mut sub = bus.subscribe("chat:*").await.unwrap();
        assert_eq!(bus.subscriber_count(), 1);

        bus.drop_subscriptions();

        assert!(sub.next().await.is_none());
        assert_eq!(bus.subscriber_count(), 0);
    }
}
