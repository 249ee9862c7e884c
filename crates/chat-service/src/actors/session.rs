//! `Session` - one client connection and its two pumps.
//!
//! # Lifecycle
//!
//! 1. Created after the auth collaborator admits the connection
//! 2. `run()` registers with the hub, then drives the inbound and outbound
//!    pumps concurrently until either one finishes
//! 3. Unregisters (idempotent) and sends a best-effort close frame
//!
//! The hub holds the only strong sender of the outbound queue. The session
//! keeps a weak sender for its own direct replies (`pong`, `users_list`), so
//! the queue closes exactly when the hub drops the session.
//!
//! Chat lines are never written into the sender's own queue. They go out
//! through the bridge and come back via local fan-out like everyone else's.

use super::hub::{HubHandle, WeakHubHandle};
use super::messages::SessionHandle;
use crate::bridge::Bridge;
use crate::observability::metrics;
use crate::protocol::{ClientCommand, Envelope};

use axum::extract::ws::Message;
use bytes::Bytes;
use common::types::{SessionId, UserIdentity};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

/// Per-session timing and queue settings.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Outbound queue bound.
    pub queue_capacity: usize,
    /// No inbound frame for this long ends the session.
    pub pong_wait: Duration,
    /// Keepalive ping period. Must be shorter than `pong_wait`.
    pub ping_period: Duration,
    /// Deadline for each outbound write.
    pub write_wait: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            pong_wait: Duration::from_secs(60),
            ping_period: Duration::from_secs(54),
            write_wait: Duration::from_secs(10),
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Client sent a close frame or the stream ended.
    ClientClosed,
    /// No frame within the liveness timeout.
    PeerTimeout,
    /// Transport read failed.
    ReadError,
    /// Transport write failed.
    WriteError,
    /// Transport write exceeded its deadline.
    WriteTimeout,
    /// Hub removed the session (slow consumer or shutdown).
    Evicted,
    /// Hub was not running.
    HubUnavailable,
}

impl SessionEnd {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SessionEnd::ClientClosed => "client_closed",
            SessionEnd::PeerTimeout => "peer_timeout",
            SessionEnd::ReadError => "read_error",
            SessionEnd::WriteError => "write_error",
            SessionEnd::WriteTimeout => "write_timeout",
            SessionEnd::Evicted => "evicted",
            SessionEnd::HubUnavailable => "hub_unavailable",
        }
    }
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logical client connection.
pub struct Session {
    id: SessionId,
    user: UserIdentity,
    hub: WeakHubHandle,
    bridge: Bridge,
    config: SessionConfig,
}

impl Session {
    pub fn new(user: UserIdentity, hub: &HubHandle, bridge: Bridge, config: SessionConfig) -> Self {
        Self {
            id: SessionId::new(),
            user,
            hub: hub.downgrade(),
            bridge,
            config,
        }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Run the session to completion over a split transport.
    #[instrument(
        skip_all,
        name = "chat.session",
        fields(session_id = %self.id, user_id = self.user.user_id)
    )]
    pub async fn run<W, R, E>(self, mut sink: W, mut stream: R) -> SessionEnd
    where
        W: Sink<Message> + Unpin + Send,
        W::Error: fmt::Display,
        R: Stream<Item = Result<Message, E>> + Unpin + Send,
        E: fmt::Display,
    {
        let (outbound, mut outbound_rx) = mpsc::channel(self.config.queue_capacity);
        let own_queue = outbound.downgrade();

        let registered = match self.hub.upgrade() {
            Some(hub) => hub
                .register(SessionHandle {
                    id: self.id,
                    user: self.user.clone(),
                    outbound,
                })
                .await
                .is_ok(),
            None => false,
        };
        if !registered {
            warn!(target: "chat.session", session_id = %self.id, "Hub unavailable, closing");
            close_transport(&mut sink, self.config.write_wait).await;
            return SessionEnd::HubUnavailable;
        }

        info!(
            target: "chat.session",
            session_id = %self.id,
            user_id = self.user.user_id,
            "Session started"
        );

        let end = tokio::select! {
            end = self.read_pump(&mut stream, &own_queue) => end,
            end = write_pump(&mut sink, &mut outbound_rx, &self.config) => end,
        };

        if let Some(hub) = self.hub.upgrade() {
            let _ = hub.unregister(self.id).await;
        }
        close_transport(&mut sink, self.config.write_wait).await;

        info!(
            target: "chat.session",
            session_id = %self.id,
            user_id = self.user.user_id,
            reason = %end,
            "Session ended"
        );
        end
    }

    /// Read frames until the client goes away.
    async fn read_pump<R, E>(
        &self,
        stream: &mut R,
        own_queue: &mpsc::WeakSender<Bytes>,
    ) -> SessionEnd
    where
        R: Stream<Item = Result<Message, E>> + Unpin + Send,
        E: fmt::Display,
    {
        loop {
            let frame = match timeout(self.config.pong_wait, stream.next()).await {
                Err(_) => {
                    debug!(target: "chat.session", session_id = %self.id, "Peer liveness timeout");
                    return SessionEnd::PeerTimeout;
                }
                Ok(None) => return SessionEnd::ClientClosed,
                Ok(Some(Err(e))) => {
                    debug!(target: "chat.session", session_id = %self.id, error = %e, "Read failed");
                    return SessionEnd::ReadError;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            let parsed = match frame {
                Message::Text(text) => ClientCommand::parse(&text),
                Message::Binary(bytes) => ClientCommand::parse_bytes(&bytes),
                Message::Close(_) => return SessionEnd::ClientClosed,
                // Any frame counts as liveness; nothing else to do.
                Message::Ping(_) | Message::Pong(_) => continue,
            };

            match parsed {
                Ok(command) => {
                    if let Some(end) = self.handle_command(command, own_queue).await {
                        return end;
                    }
                }
                Err(e) => {
                    metrics::record_protocol_error(e.reason());
                    debug!(
                        target: "chat.session",
                        session_id = %self.id,
                        error = %e,
                        "Skipping unparsable frame"
                    );
                }
            }
        }
    }

    async fn handle_command(
        &self,
        command: ClientCommand,
        own_queue: &mpsc::WeakSender<Bytes>,
    ) -> Option<SessionEnd> {
        debug!(
            target: "chat.session",
            session_id = %self.id,
            command = command.kind(),
            "Handling client command"
        );

        match command {
            ClientCommand::ChatMessage { channel, content } => {
                if channel.is_empty() || content.is_empty() {
                    debug!(
                        target: "chat.session",
                        session_id = %self.id,
                        "Dropping chat message with empty channel or content"
                    );
                    return None;
                }

                let envelope = Envelope::chat(&channel, &content, &self.user);
                // The bridge logs and counts failures; the line is lost.
                let _ = self.bridge.publish(&channel, &envelope).await;
                None
            }

            ClientCommand::Ping => self.reply(&Envelope::pong(), own_queue).await,

            ClientCommand::GetUsers => {
                let hub = self.hub.upgrade()?;
                let envelope = Envelope::users_list(hub.connected_users());
                drop(hub);
                self.reply(&envelope, own_queue).await
            }
        }
    }

    /// Enqueue a direct reply on this session's own queue.
    ///
    /// A full queue gets the same treatment as during fan-out: the session
    /// is unregistered.
    async fn reply(
        &self,
        envelope: &Envelope,
        own_queue: &mpsc::WeakSender<Bytes>,
    ) -> Option<SessionEnd> {
        let bytes = match envelope.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(target: "chat.session", error = %e, "Failed to encode reply");
                return None;
            }
        };

        let Some(queue) = own_queue.upgrade() else {
            return Some(SessionEnd::Evicted);
        };

        match queue.try_send(bytes) {
            Ok(()) => None,
            Err(TrySendError::Closed(_)) => Some(SessionEnd::Evicted),
            Err(TrySendError::Full(_)) => {
                drop(queue);
                warn!(
                    target: "chat.session",
                    session_id = %self.id,
                    kind = envelope.kind(),
                    "Own queue full on direct reply, dropping session"
                );
                if let Some(hub) = self.hub.upgrade() {
                    let _ = hub.unregister(self.id).await;
                }
                Some(SessionEnd::Evicted)
            }
        }
    }
}

/// Drain the outbound queue into the transport and send keepalive pings.
async fn write_pump<W>(
    sink: &mut W,
    outbound: &mut mpsc::Receiver<Bytes>,
    config: &SessionConfig,
) -> SessionEnd
where
    W: Sink<Message> + Unpin + Send,
    W::Error: fmt::Display,
{
    let mut keepalive = interval_at(Instant::now() + config.ping_period, config.ping_period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            next = outbound.recv() => match next {
                Some(bytes) => to_frame(bytes),
                None => return SessionEnd::Evicted,
            },
            _ = keepalive.tick() => Message::Ping(Vec::new()),
        };

        if let Err(end) = write_frame(sink, frame, config.write_wait).await {
            return end;
        }
    }
}

async fn write_frame<W>(sink: &mut W, frame: Message, write_wait: Duration) -> Result<(), SessionEnd>
where
    W: Sink<Message> + Unpin + Send,
    W::Error: fmt::Display,
{
    match timeout(write_wait, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!(target: "chat.session", error = %e, "Write failed");
            Err(SessionEnd::WriteError)
        }
        Err(_) => {
            debug!(target: "chat.session", "Write deadline exceeded");
            Err(SessionEnd::WriteTimeout)
        }
    }
}

/// Envelopes are JSON and go out as text; anything else as binary.
fn to_frame(bytes: Bytes) -> Message {
    match String::from_utf8(bytes.to_vec()) {
        Ok(text) => Message::Text(text),
        Err(e) => Message::Binary(e.into_bytes()),
    }
}

async fn close_transport<W>(sink: &mut W, write_wait: Duration)
where
    W: Sink<Message> + Unpin + Send,
    W::Error: fmt::Display,
{
    let _ = timeout(write_wait, sink.send(Message::Close(None))).await;
}
