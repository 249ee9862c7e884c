//! Message types for hub communication.
//!
//! Each hub operation has its own bounded queue. Request-reply uses
//! `tokio::sync::oneshot`.

use bytes::Bytes;
use common::types::{SessionId, UserIdentity};
use tokio::sync::{mpsc, oneshot};

/// The hub's view of one session: identity plus the only strong sender of
/// its outbound queue. Dropping this closes the queue.
#[derive(Debug)]
pub struct SessionHandle {
    pub id: SessionId,
    pub user: UserIdentity,
    pub outbound: mpsc::Sender<Bytes>,
}

/// Add a session to the hub.
#[derive(Debug)]
pub struct Register {
    pub session: SessionHandle,
    /// Fires once the session is in the set.
    pub respond_to: oneshot::Sender<()>,
}

/// Remove a session from the hub.
#[derive(Debug)]
pub struct Unregister {
    pub session_id: SessionId,
    /// Receives whether the session was present.
    pub respond_to: Option<oneshot::Sender<bool>>,
}

/// Fan an already-serialized envelope out to every local session.
#[derive(Debug)]
pub struct DeliverLocal {
    pub payload: Bytes,
    pub report_to: Option<oneshot::Sender<DeliveryReport>>,
}

/// Outcome of one fan-out pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Sessions that accepted the payload.
    pub delivered: usize,
    /// Sessions removed because their queue was full or closed.
    pub evicted: usize,
}
