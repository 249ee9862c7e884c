//! `HubActor` - single owner of this instance's live session set.
//!
//! The hub loop is the only code that mutates the set. Everything else talks
//! to it through [`HubHandle`], which wraps three bounded queues (register,
//! unregister, deliver-local). Reads of the connected-user list and session
//! count go through a separate reader-writer lock that the loop refreshes
//! after every mutation, so readers never wait on queued work and the loop
//! never waits on readers. Snapshots may lag mutations still in the queues.
//!
//! # Backpressure
//!
//! Fan-out uses `try_send` only. A session whose outbound queue is full (or
//! already closed) is removed on the spot and announced as having left. The
//! loop never blocks on a slow consumer, and other sessions never lose or
//! reorder messages because of one.
//!
//! # Presence notices
//!
//! Join/leave envelopes go through a bounded queue to a forwarder task that
//! publishes them in order via the [`Bridge`]. The loop only ever `try_send`s
//! onto that queue: when a slow bus has filled it, the notice is dropped and
//! counted rather than stalling the loop.

use super::messages::{DeliverLocal, DeliveryReport, Register, SessionHandle, Unregister};
use crate::bridge::Bridge;
use crate::errors::ChatError;
use crate::observability::metrics;
use crate::protocol::{Envelope, UserInfo};

use bytes::Bytes;
use common::types::{SessionId, UserIdentity};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard, Weak};
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Read-side copy of the session set.
type Roster = Arc<RwLock<HashMap<SessionId, UserIdentity>>>;

/// Hub settings.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Bound of each inbound queue.
    pub queue_capacity: usize,
    /// Channel that join/leave notices are published on.
    pub notice_channel: String,
}

struct HubShared {
    register_tx: mpsc::Sender<Register>,
    unregister_tx: mpsc::Sender<Unregister>,
    deliver_tx: mpsc::Sender<DeliverLocal>,
    roster: Roster,
}

/// Handle to the hub.
///
/// Cheap to clone. When the last handle drops, the hub loop exits.
#[derive(Clone)]
pub struct HubHandle {
    shared: Arc<HubShared>,
}

/// Non-owning hub reference held by sessions.
#[derive(Clone)]
pub struct WeakHubHandle {
    shared: Weak<HubShared>,
}

impl WeakHubHandle {
    #[must_use]
    pub fn upgrade(&self) -> Option<HubHandle> {
        self.shared.upgrade().map(|shared| HubHandle { shared })
    }
}

impl HubHandle {
    #[must_use]
    pub fn downgrade(&self) -> WeakHubHandle {
        WeakHubHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Add a session. Resolves once it is in the set.
    ///
    /// # Errors
    ///
    /// `HubUnavailable` if the hub loop has stopped.
    pub async fn register(&self, session: SessionHandle) -> Result<(), ChatError> {
        let (tx, rx) = oneshot::channel();
        self.shared
            .register_tx
            .send(Register {
                session,
                respond_to: tx,
            })
            .await
            .map_err(|_| ChatError::HubUnavailable)?;

        rx.await.map_err(|_| ChatError::HubUnavailable)
    }

    /// Remove a session. Returns whether it was present.
    ///
    /// # Errors
    ///
    /// `HubUnavailable` if the hub loop has stopped.
    pub async fn unregister(&self, session_id: SessionId) -> Result<bool, ChatError> {
        let (tx, rx) = oneshot::channel();
        self.shared
            .unregister_tx
            .send(Unregister {
                session_id,
                respond_to: Some(tx),
            })
            .await
            .map_err(|_| ChatError::HubUnavailable)?;

        rx.await.map_err(|_| ChatError::HubUnavailable)
    }

    /// Queue an already-serialized envelope for local fan-out.
    ///
    /// # Errors
    ///
    /// `HubUnavailable` if the hub loop has stopped.
    pub async fn deliver_local(&self, payload: Bytes) -> Result<(), ChatError> {
        self.shared
            .deliver_tx
            .send(DeliverLocal {
                payload,
                report_to: None,
            })
            .await
            .map_err(|_| ChatError::HubUnavailable)
    }

    /// Like [`HubHandle::deliver_local`], but waits for the fan-out result.
    ///
    /// # Errors
    ///
    /// `HubUnavailable` if the hub loop has stopped.
    pub async fn deliver_local_with_report(
        &self,
        payload: Bytes,
    ) -> Result<DeliveryReport, ChatError> {
        let (tx, rx) = oneshot::channel();
        self.shared
            .deliver_tx
            .send(DeliverLocal {
                payload,
                report_to: Some(tx),
            })
            .await
            .map_err(|_| ChatError::HubUnavailable)?;

        rx.await.map_err(|_| ChatError::HubUnavailable)
    }

    /// Connected users, one entry per user ID, ordered by ID.
    #[must_use]
    pub fn connected_users(&self) -> Vec<UserInfo> {
        let roster = self
            .shared
            .roster
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let mut unique: BTreeMap<u64, &str> = BTreeMap::new();
        for user in roster.values() {
            unique.entry(user.user_id).or_insert(&user.username);
        }

        unique
            .into_iter()
            .map(|(id, username)| UserInfo {
                id,
                username: username.to_string(),
            })
            .collect()
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.shared
            .roster
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// The hub loop state.
pub struct HubActor {
    sessions: HashMap<SessionId, SessionHandle>,
    roster: Roster,
    register_rx: mpsc::Receiver<Register>,
    unregister_rx: mpsc::Receiver<Unregister>,
    deliver_rx: mpsc::Receiver<DeliverLocal>,
    notices: mpsc::Sender<Envelope>,
    notice_channel: String,
    cancel_token: CancellationToken,
}

impl HubActor {
    /// Spawn the hub loop and its notice forwarder.
    ///
    /// The returned join handle completes after both tasks have stopped.
    pub fn spawn(
        config: HubConfig,
        bridge: Bridge,
        cancel_token: CancellationToken,
    ) -> (HubHandle, JoinHandle<()>) {
        let (register_tx, register_rx) = mpsc::channel(config.queue_capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(config.queue_capacity);
        let (deliver_tx, deliver_rx) = mpsc::channel(config.queue_capacity);
        let (notice_tx, notice_rx) = mpsc::channel(config.queue_capacity);
        let roster = Roster::default();

        let forwarder = tokio::spawn(forward_notices(
            notice_rx,
            bridge,
            config.notice_channel.clone(),
            cancel_token.clone(),
        ));

        let actor = Self {
            sessions: HashMap::new(),
            roster: Arc::clone(&roster),
            register_rx,
            unregister_rx,
            deliver_rx,
            notices: notice_tx,
            notice_channel: config.notice_channel,
            cancel_token,
        };

        let task_handle = tokio::spawn(actor.run(forwarder));

        let handle = HubHandle {
            shared: Arc::new(HubShared {
                register_tx,
                unregister_tx,
                deliver_tx,
                roster,
            }),
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "chat.actor.hub")]
    async fn run(mut self, forwarder: JoinHandle<()>) {
        info!(target: "chat.actor.hub", "HubActor started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(target: "chat.actor.hub", "HubActor received cancellation signal");
                    break;
                }

                msg = self.register_rx.recv() => {
                    // All three senders live in the same handle, so one closed
                    // queue means every handle is gone.
                    let Some(msg) = msg else {
                        debug!(target: "chat.actor.hub", "All hub handles dropped, exiting");
                        break;
                    };
                    self.handle_register(msg);
                }

                Some(msg) = self.unregister_rx.recv() => {
                    self.handle_unregister(msg);
                }

                Some(msg) = self.deliver_rx.recv() => {
                    self.handle_deliver(msg);
                }
            }
        }

        let remaining = self.sessions.len();
        self.sessions.clear();
        self.roster_write().clear();
        metrics::set_sessions_active(0);
        info!(
            target: "chat.actor.hub",
            sessions_closed = remaining,
            "HubActor stopped"
        );

        // Closing the notice queue lets the forwarder drain and exit.
        drop(self);
        if let Err(e) = forwarder.await {
            warn!(target: "chat.actor.hub", error = %e, "Notice forwarder task failed");
        }
    }

    fn roster_write(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, UserIdentity>> {
        self.roster.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_register(&mut self, msg: Register) {
        let Register {
            session,
            respond_to,
        } = msg;
        let session_id = session.id;

        if self.sessions.contains_key(&session_id) {
            warn!(
                target: "chat.actor.hub",
                session_id = %session_id,
                "Duplicate register ignored"
            );
            let _ = respond_to.send(());
            return;
        }

        // Courtesy message for this session only; never fanned out.
        match Envelope::connected(&session.user).to_bytes() {
            Ok(bytes) => {
                if let Err(e) = session.outbound.try_send(bytes) {
                    warn!(
                        target: "chat.actor.hub",
                        session_id = %session_id,
                        error = %e,
                        "Could not enqueue connected notice"
                    );
                }
            }
            Err(e) => {
                warn!(target: "chat.actor.hub", error = %e, "Failed to encode connected notice");
            }
        }

        let user = session.user.clone();
        self.sessions.insert(session_id, session);
        self.roster_write().insert(session_id, user.clone());
        metrics::set_sessions_active(self.sessions.len());

        info!(
            target: "chat.actor.hub",
            session_id = %session_id,
            user_id = user.user_id,
            sessions = self.sessions.len(),
            "Session registered"
        );

        let _ = respond_to.send(());
        self.announce(Envelope::joined(&self.notice_channel, &user));
    }

    fn handle_unregister(&mut self, msg: Unregister) {
        let removed = self.remove_session(msg.session_id, "unregistered");
        if let Some(respond_to) = msg.respond_to {
            let _ = respond_to.send(removed);
        }
    }

    fn handle_deliver(&mut self, msg: DeliverLocal) {
        let started = Instant::now();
        let mut delivered = 0;
        let mut evict = Vec::new();

        for (session_id, session) in &self.sessions {
            match session.outbound.try_send(msg.payload.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        target: "chat.actor.hub",
                        session_id = %session_id,
                        user_id = session.user.user_id,
                        "Outbound queue full, dropping slow consumer"
                    );
                    evict.push(*session_id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(
                        target: "chat.actor.hub",
                        session_id = %session_id,
                        "Outbound queue closed, removing session"
                    );
                    evict.push(*session_id);
                }
            }
        }

        let evicted = evict.len();
        for session_id in evict {
            self.remove_session(session_id, "evicted");
        }

        metrics::record_fanout(delivered, started.elapsed());
        metrics::record_evictions(evicted);

        if let Some(report_to) = msg.report_to {
            let _ = report_to.send(DeliveryReport { delivered, evicted });
        }
    }

    /// Drop a session from the set. Dropping its handle closes its queue.
    fn remove_session(&mut self, session_id: SessionId, reason: &'static str) -> bool {
        let Some(session) = self.sessions.remove(&session_id) else {
            debug!(
                target: "chat.actor.hub",
                session_id = %session_id,
                "Unregister for absent session ignored"
            );
            return false;
        };

        self.roster_write().remove(&session_id);
        metrics::set_sessions_active(self.sessions.len());

        info!(
            target: "chat.actor.hub",
            session_id = %session_id,
            user_id = session.user.user_id,
            reason,
            sessions = self.sessions.len(),
            "Session removed"
        );

        self.announce(Envelope::left(&self.notice_channel, &session.user));
        true
    }

    fn announce(&self, envelope: Envelope) {
        match self.notices.try_send(envelope) {
            Ok(()) => {}
            Err(TrySendError::Full(envelope)) => {
                metrics::record_presence_notice_dropped();
                warn!(
                    target: "chat.actor.hub",
                    kind = envelope.kind(),
                    "Notice queue full, notice dropped"
                );
            }
            Err(TrySendError::Closed(_)) => {
                debug!(target: "chat.actor.hub", "Notice forwarder gone, notice dropped");
            }
        }
    }
}

/// Publish presence notices in the order the hub produced them.
async fn forward_notices(
    mut notices: mpsc::Receiver<Envelope>,
    bridge: Bridge,
    channel: String,
    cancel_token: CancellationToken,
) {
    loop {
        let envelope = tokio::select! {
            () = cancel_token.cancelled() => break,
            next = notices.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };

        // A stalled publish must not hold up shutdown.
        tokio::select! {
            () = cancel_token.cancelled() => break,
            result = bridge.publish(&channel, &envelope) => {
                if let Err(e) = result {
                    warn!(
                        target: "chat.actor.hub",
                        kind = envelope.kind(),
                        error = %e,
                        "Presence notice not published"
                    );
                }
            }
        }
    }

    debug!(target: "chat.actor.hub", "Notice forwarder stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::bridge::mock::MockBus;
    use crate::bridge::{BusSubscription, MessageBus};
    use futures::StreamExt;
    use serde_json::Value;

    struct Fixture {
        hub: HubHandle,
        task: JoinHandle<()>,
        notices: BusSubscription,
        cancel: CancellationToken,
    }

    async fn fixture() -> Fixture {
        let bus = Arc::new(MockBus::new());
        let notices = bus.subscribe("chat:*").await.unwrap();
        let bridge = Bridge::new(bus as Arc<dyn MessageBus>, "chat:");
        let cancel = CancellationToken::new();
        let (hub, task) = HubActor::spawn(
            HubConfig {
                queue_capacity: 16,
                notice_channel: "general".to_string(),
            },
            bridge,
            cancel.clone(),
        );
        Fixture {
            hub,
            task,
            notices,
            cancel,
        }
    }

    fn session(user: &UserIdentity, capacity: usize) -> (SessionHandle, mpsc::Receiver<Bytes>) {
        let (outbound, rx) = mpsc::channel(capacity);
        let handle = SessionHandle {
            id: SessionId::new(),
            user: user.clone(),
            outbound,
        };
        (handle, rx)
    }

    fn json(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    fn alice() -> UserIdentity {
        UserIdentity::new(1, "alice", "alice@example.com")
    }

    fn bob() -> UserIdentity {
        UserIdentity::new(2, "bob", "bob@example.com")
    }

    #[tokio::test]
    async fn test_register_unregister_counts() {
        let f = fixture().await;
        let (s1, _rx1) = session(&alice(), 8);
        let (s2, _rx2) = session(&bob(), 8);
        let (id1, id2) = (s1.id, s2.id);

        f.hub.register(s1).await.unwrap();
        f.hub.register(s2).await.unwrap();
        assert_eq!(f.hub.session_count(), 2);

        assert!(f.hub.unregister(id1).await.unwrap());
        assert_eq!(f.hub.session_count(), 1);

        // Second removal and unknown IDs are no-ops
        assert!(!f.hub.unregister(id1).await.unwrap());
        assert!(!f.hub.unregister(SessionId::new()).await.unwrap());
        assert_eq!(f.hub.session_count(), 1);

        assert!(f.hub.unregister(id2).await.unwrap());
        assert_eq!(f.hub.session_count(), 0);
    }

    #[tokio::test]
    async fn test_register_sends_connected_only_to_new_session_and_announces() {
        let mut f = fixture().await;
        let (s1, mut rx1) = session(&alice(), 8);
        let (s2, mut rx2) = session(&bob(), 8);

        f.hub.register(s1).await.unwrap();
        let connected = json(&rx1.recv().await.unwrap());
        assert_eq!(connected["type"], "system");
        assert_eq!(connected["data"]["user_id"], 1);

        f.hub.register(s2).await.unwrap();
        let connected = json(&rx2.recv().await.unwrap());
        assert_eq!(connected["data"]["user_id"], 2);
        assert!(rx1.try_recv().is_err(), "bob's connected notice is not fanned out");

        let joined = f.notices.next().await.unwrap();
        assert_eq!(joined.topic, "chat:general");
        let joined = json(&joined.payload);
        assert_eq!(joined["type"], "user_joined");
        assert_eq!(joined["data"]["message"], "alice joined the chat");

        let joined = json(&f.notices.next().await.unwrap().payload);
        assert_eq!(joined["data"]["message"], "bob joined the chat");
    }

    #[tokio::test]
    async fn test_unregister_closes_queue_and_announces_left() {
        let mut f = fixture().await;
        let (s1, mut rx1) = session(&alice(), 8);
        let id1 = s1.id;
        f.hub.register(s1).await.unwrap();
        let _joined = f.notices.next().await.unwrap();

        f.hub.unregister(id1).await.unwrap();

        let _connected = rx1.recv().await.unwrap();
        assert!(rx1.recv().await.is_none(), "queue closed on removal");

        let left = json(&f.notices.next().await.unwrap().payload);
        assert_eq!(left["type"], "user_left");
        assert_eq!(left["data"]["message"], "alice left the chat");
    }

    #[tokio::test]
    async fn test_deliver_evicts_full_queue_only() {
        let f = fixture().await;
        // Capacity 1 is filled by the connected notice
        let (slow, mut slow_rx) = session(&alice(), 1);
        let (fast, mut fast_rx) = session(&bob(), 8);
        f.hub.register(slow).await.unwrap();
        f.hub.register(fast).await.unwrap();
        let _ = fast_rx.recv().await.unwrap();

        let payload = Bytes::from_static(br#"{"type":"system","data":{"message":"x"}}"#);
        let report = f
            .hub
            .deliver_local_with_report(payload.clone())
            .await
            .unwrap();

        assert_eq!(
            report,
            DeliveryReport {
                delivered: 1,
                evicted: 1
            }
        );
        assert_eq!(f.hub.session_count(), 1);
        assert_eq!(fast_rx.recv().await.unwrap(), payload);
        assert!(fast_rx.try_recv().is_err());

        let _connected = slow_rx.recv().await.unwrap();
        assert!(slow_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_deliver_removes_sessions_whose_receiver_is_gone() {
        let f = fixture().await;
        let (s1, rx1) = session(&alice(), 8);
        f.hub.register(s1).await.unwrap();
        drop(rx1);

        let report = f
            .hub
            .deliver_local_with_report(Bytes::from_static(b"{}"))
            .await
            .unwrap();

        assert_eq!(report.evicted, 1);
        assert_eq!(f.hub.session_count(), 0);
    }

    #[tokio::test]
    async fn test_connected_users_deduplicates_by_user() {
        let f = fixture().await;
        let (a1, _r1) = session(&alice(), 8);
        let (a2, _r2) = session(&alice(), 8);
        let (b1, _r3) = session(&bob(), 8);
        f.hub.register(b1).await.unwrap();
        f.hub.register(a1).await.unwrap();
        f.hub.register(a2).await.unwrap();

        let users = f.hub.connected_users();
        assert_eq!(f.hub.session_count(), 3);
        assert_eq!(
            users,
            vec![
                UserInfo {
                    id: 1,
                    username: "alice".to_string()
                },
                UserInfo {
                    id: 2,
                    username: "bob".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_duplicate_register_is_ignored() {
        let f = fixture().await;
        let (s1, _rx1) = session(&alice(), 8);
        let duplicate = SessionHandle {
            id: s1.id,
            user: s1.user.clone(),
            outbound: s1.outbound.clone(),
        };

        f.hub.register(s1).await.unwrap();
        f.hub.register(duplicate).await.unwrap();

        assert_eq!(f.hub.session_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_loop_and_closes_queues() {
        let f = fixture().await;
        let (s1, mut rx1) = session(&alice(), 8);
        f.hub.register(s1).await.unwrap();

        f.cancel.cancel();
        f.task.await.unwrap();

        let _connected = rx1.recv().await.unwrap();
        assert!(rx1.recv().await.is_none());
        assert_eq!(f.hub.session_count(), 0);
        assert!(matches!(
            f.hub.deliver_local(Bytes::new()).await,
            Err(ChatError::HubUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_loop_exits_when_handles_dropped() {
        let f = fixture().await;
        let Fixture { hub, task, .. } = f;

        drop(hub);

        tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .expect("hub loop should exit")
            .unwrap();
    }

    /// A bus whose publishes never complete.
    struct StalledBus;

    #[async_trait::async_trait]
    impl MessageBus for StalledBus {
        async fn publish(&self, _topic: &str, _payload: Bytes) -> Result<(), ChatError> {
            std::future::pending().await
        }

        async fn subscribe(&self, _pattern: &str) -> Result<BusSubscription, ChatError> {
            Ok(futures::stream::pending().boxed())
        }
    }

    #[tokio::test]
    async fn test_stalled_bus_does_not_block_register() {
        let cancel = CancellationToken::new();
        let (hub, task) = HubActor::spawn(
            HubConfig {
                queue_capacity: 2,
                notice_channel: "general".to_string(),
            },
            Bridge::new(Arc::new(StalledBus) as Arc<dyn MessageBus>, "chat:"),
            cancel.clone(),
        );

        // One notice is stuck in publish, two fill the queue, the rest drop.
        let mut receivers = Vec::new();
        for _ in 0..6 {
            let (handle, rx) = session(&alice(), 8);
            receivers.push(rx);
            tokio::time::timeout(std::time::Duration::from_secs(5), hub.register(handle))
                .await
                .expect("register must not wait on the bus")
                .unwrap();
        }
        assert_eq!(hub.session_count(), 6);

        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .expect("hub loop should exit despite a stalled publish")
            .unwrap();
    }
}
