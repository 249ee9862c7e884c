//! Supervised realtime lifecycle.
//!
//! [`ChatRuntime`] owns every long-running task of the realtime core: the hub
//! loop, its presence-notice forwarder and the bus subscription relay. All of
//! them hang off one `CancellationToken`. A relay failure is surfaced through
//! [`ChatRuntime::fatal`] instead of being logged and forgotten.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::actors::{HubActor, HubConfig, HubHandle, SessionConfig};
use crate::bridge::{run_subscription, Bridge, MessageBus};
use crate::config::Config;
use crate::errors::ChatError;
use crate::observability::HealthState;

/// How long `shutdown` waits for tasks to finish.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Running realtime core.
pub struct ChatRuntime {
    hub: HubHandle,
    bridge: Bridge,
    health: Arc<HealthState>,
    session_config: SessionConfig,
    cancel_token: CancellationToken,
    hub_task: JoinHandle<()>,
    relay_task: JoinHandle<()>,
    fatal_rx: Option<oneshot::Receiver<ChatError>>,
}

impl ChatRuntime {
    /// Spawn the hub, subscribe to the bus and start relaying.
    ///
    /// Returns once the subscription is confirmed; readiness is flipped on at
    /// that point.
    ///
    /// # Errors
    ///
    /// Whatever the bus returns if the subscription cannot be established.
    pub async fn start(bus: Arc<dyn MessageBus>, config: &Config) -> Result<Self, ChatError> {
        let cancel_token = CancellationToken::new();
        let health = Arc::new(HealthState::new());
        let bridge = Bridge::new(bus, &config.topic_prefix);

        let (hub, hub_task) = HubActor::spawn(
            HubConfig {
                queue_capacity: config.hub_queue_capacity,
                notice_channel: config.default_channel.clone(),
            },
            bridge.clone(),
            cancel_token.child_token(),
        );

        let subscription = match bridge.subscribe().await {
            Ok(subscription) => subscription,
            Err(e) => {
                error!(target: "chat.runtime", error = %e, "Failed to subscribe to bus");
                cancel_token.cancel();
                return Err(e);
            }
        };
        health.set_ready();

        let (fatal_tx, fatal_rx) = oneshot::channel();
        let relay_task = tokio::spawn({
            let hub = hub.clone();
            let health = Arc::clone(&health);
            let token = cancel_token.child_token();
            async move {
                match run_subscription(subscription, hub, token).await {
                    Ok(()) => info!(target: "chat.runtime", "Subscription relay stopped"),
                    Err(e) => {
                        error!(target: "chat.runtime", error = %e, "Subscription relay died");
                        health.set_not_ready();
                        let _ = fatal_tx.send(e);
                    }
                }
            }
        });

        info!(
            target: "chat.runtime",
            instance_id = %config.instance_id,
            pattern = %bridge.subscription_pattern(),
            "Realtime core started"
        );

        Ok(Self {
            hub,
            bridge,
            health,
            session_config: SessionConfig {
                queue_capacity: config.session_queue_capacity,
                pong_wait: config.pong_wait(),
                ping_period: config.ping_period(),
                write_wait: config.write_wait(),
            },
            cancel_token,
            hub_task,
            relay_task,
            fatal_rx: Some(fatal_rx),
        })
    }

    #[must_use]
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    #[must_use]
    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    #[must_use]
    pub fn health(&self) -> Arc<HealthState> {
        Arc::clone(&self.health)
    }

    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        self.session_config
    }

    /// Resolves with the error that killed the relay. Pending forever if the
    /// relay stops cleanly or this was already awaited.
    pub async fn fatal(&mut self) -> ChatError {
        let Some(rx) = self.fatal_rx.take() else {
            return std::future::pending().await;
        };
        match rx.await {
            Ok(e) => e,
            Err(_) => std::future::pending().await,
        }
    }

    /// Cancel all tasks and wait for them to finish.
    pub async fn shutdown(self) {
        let Self {
            health,
            cancel_token,
            hub_task,
            relay_task,
            ..
        } = self;

        health.set_not_ready();
        cancel_token.cancel();

        let joined = tokio::time::timeout(SHUTDOWN_TIMEOUT, async move {
            let _ = relay_task.await;
            let _ = hub_task.await;
        })
        .await;

        if joined.is_err() {
            warn!(
                target: "chat.runtime",
                timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                "Realtime tasks did not stop in time"
            );
        } else {
            info!(target: "chat.runtime", "Realtime core stopped");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::SessionHandle;
    use crate::bridge::mock::MockBus;
    use crate::protocol::Envelope;
    use common::types::{SessionId, UserIdentity};
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    fn config() -> Config {
        Config::from_vars(&HashMap::from([
            ("REDIS_URL".to_string(), "redis://localhost".to_string()),
            ("CHAT_JWT_SECRET".to_string(), "secret".to_string()),
        ]))
        .unwrap()
    }

    #[tokio::test]
    async fn test_start_marks_ready_and_relays_round_trip() {
        let bus = Arc::new(MockBus::new());
        let runtime = ChatRuntime::start(Arc::clone(&bus) as Arc<dyn MessageBus>, &config())
            .await
            .unwrap();
        assert!(runtime.health().is_ready());

        let (outbound, mut rx) = mpsc::channel(16);
        let alice = UserIdentity::new(1, "alice", "alice@example.com");
        runtime
            .hub()
            .register(SessionHandle {
                id: SessionId::new(),
                user: alice.clone(),
                outbound,
            })
            .await
            .unwrap();
        let _connected = rx.recv().await.unwrap();

        let envelope = Envelope::chat("general", "hi", &alice);
        runtime.bridge().publish("general", &envelope).await.unwrap();

        // The user_joined notice and the chat line both come back through
        // the bus; the chat payload must be byte-identical to what went out.
        let sent = envelope.to_bytes().unwrap();
        let mut seen = false;
        for _ in 0..2 {
            if rx.recv().await.unwrap() == sent {
                seen = true;
            }
        }
        assert!(seen);

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscribe_failure_aborts_start() {
        let bus = Arc::new(MockBus::new());
        bus.fail_subscribes(true);

        let result = ChatRuntime::start(bus as Arc<dyn MessageBus>, &config()).await;
        assert!(matches!(result, Err(ChatError::Redis(_))));
    }

    #[tokio::test]
    async fn test_lost_subscription_is_fatal() {
        let bus = Arc::new(MockBus::new());
        let mut runtime = ChatRuntime::start(Arc::clone(&bus) as Arc<dyn MessageBus>, &config())
            .await
            .unwrap();

        bus.drop_subscriptions();

        let err = tokio::time::timeout(Duration::from_secs(5), runtime.fatal())
            .await
            .expect("fatal should resolve");
        assert!(matches!(err, ChatError::SubscriptionFatal(_)));
        assert!(!runtime.health().is_ready());

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_marks_not_ready_and_stops_hub() {
        let bus = Arc::new(MockBus::new());
        let runtime = ChatRuntime::start(bus as Arc<dyn MessageBus>, &config())
            .await
            .unwrap();
        let hub = runtime.hub().clone();
        let health = runtime.health();

        runtime.shutdown().await;

        assert!(!health.is_ready());
        assert!(matches!(
            hub.deliver_local(bytes::Bytes::new()).await,
            Err(ChatError::HubUnavailable)
        ));
    }
}
