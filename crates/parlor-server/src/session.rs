//! Delivery sessions and the per-connection receive loop.
//!
//! A [`DeliverySession`] is the server-side half of one live receive
//! connection. Routing pushes serialized events into its bounded queue; the
//! receive loop drains the queue into the client link until the link closes
//! or the session is terminated.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parlor_shared::UserId;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::registry::ConnectionRegistry;

/// A serialized outbound event. Shared between every recipient of a fan-out.
pub type Payload = Arc<str>;

/// First event on every stream.
pub const CONNECTED_EVENT: &str = r#"{"type":"connected"}"#;

/// Buffer between the receive loop and the HTTP body. Kept at one so the
/// session queue remains the only place payloads pile up.
///
/// A client that stops reading holds at most `capacity + 1` payloads: the
/// one the loop is waiting to hand to the link, plus a full queue.
const LINK_BUFFER: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of a non-blocking enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Queue at capacity; the payload was discarded.
    Dropped,
    /// The session was terminated or its receive loop is gone.
    Closed,
}

/// Why a receive loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The client went away.
    PeerClosed,
    /// The session's termination signal was raised.
    Terminated,
}

pub struct DeliverySession {
    id: SessionId,
    user: UserId,
    queue: mpsc::Sender<Payload>,
    shutdown: CancellationToken,
    dropped: AtomicU64,
}

impl DeliverySession {
    /// Create a session for `user` with room for `capacity` pending payloads.
    /// Returns the session and the receiving end of its queue.
    ///
    /// `capacity` must be non-zero.
    pub fn new(user: UserId, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(capacity);
        let session = Arc::new(Self {
            id: SessionId::new(),
            user,
            queue: tx,
            shutdown: CancellationToken::new(),
            dropped: AtomicU64::new(0),
        });
        (session, rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    /// Queue a payload without waiting. A full queue drops the new payload.
    /// A terminated session accepts nothing.
    pub fn enqueue(&self, payload: Payload) -> EnqueueOutcome {
        if self.is_terminated() {
            return EnqueueOutcome::Closed;
        }
        match self.queue.try_send(payload) {
            Ok(()) => EnqueueOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(
                    user = %self.user,
                    session = %self.id,
                    "Dropping payload for saturated session"
                );
                EnqueueOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => EnqueueOutcome::Closed,
        }
    }

    /// Raise the termination signal. The receive loop exits promptly.
    pub fn terminate(&self) {
        self.shutdown.cancel();
    }

    pub fn is_terminated(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Payloads waiting in the queue.
    pub fn pending(&self) -> usize {
        self.queue.max_capacity() - self.queue.capacity()
    }

    /// Payloads dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for DeliverySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliverySession")
            .field("id", &self.id)
            .field("user", &self.user)
            .field("pending", &self.pending())
            .field("dropped", &self.dropped())
            .finish()
    }
}

/// Accept a receive connection for `user`: create and register a session,
/// then spawn its receive loop. The returned receiver is the client link;
/// dropping it closes the connection.
pub async fn open(
    registry: &ConnectionRegistry,
    user: UserId,
    capacity: usize,
) -> mpsc::Receiver<Payload> {
    let (session, queue) = DeliverySession::new(user, capacity);
    let (link_tx, link_rx) = mpsc::channel(LINK_BUFFER);

    registry.register(session.clone()).await;
    info!(user = %user, session = %session.id(), "Receive connection opened");

    tokio::spawn(run_receive_loop(session, queue, link_tx, registry.clone()));

    link_rx
}

/// Drive one connection until it ends, then remove the session from the
/// registry (only if it is still the current one for its user).
pub async fn run_receive_loop(
    session: Arc<DeliverySession>,
    mut queue: mpsc::Receiver<Payload>,
    link: mpsc::Sender<Payload>,
    registry: ConnectionRegistry,
) -> LoopExit {
    let exit = pump(&session, &mut queue, &link).await;

    let removed = registry.unregister(session.user(), session.id()).await;
    info!(
        user = %session.user(),
        session = %session.id(),
        reason = ?exit,
        removed,
        dropped = session.dropped(),
        "Receive connection closed"
    );

    exit
}

async fn pump(
    session: &DeliverySession,
    queue: &mut mpsc::Receiver<Payload>,
    link: &mpsc::Sender<Payload>,
) -> LoopExit {
    if let Some(exit) = forward(session, link, Payload::from(CONNECTED_EVENT)).await {
        return exit;
    }

    loop {
        // The session owns the queue's only sender and outlives this loop,
        // so `recv` never yields `None` here.
        tokio::select! {
            Some(payload) = queue.recv() => {
                if let Some(exit) = forward(session, link, payload).await {
                    return exit;
                }
            }
            _ = link.closed() => return LoopExit::PeerClosed,
            _ = session.shutdown.cancelled() => return LoopExit::Terminated,
        }
    }
}

/// Push one payload to the client, giving up if the session is terminated
/// while the link is full.
async fn forward(
    session: &DeliverySession,
    link: &mpsc::Sender<Payload>,
    payload: Payload,
) -> Option<LoopExit> {
    tokio::select! {
        sent = link.send(payload) => sent.err().map(|_| LoopExit::PeerClosed),
        _ = session.shutdown.cancelled() => Some(LoopExit::Terminated),
    }
}
