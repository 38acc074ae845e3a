//! # Sessions
//!
//! One `Session` per client connection. The session exclusively owns its
//! execution context; the registry hands out `Arc<Session>` only for the
//! duration of a dispatch or a broadcast round.
//!
//! ## Lifecycle
//!
//! `Open` (context built, reachable) -> `Closing` (unreachable, teardown running)
//! -> `Closed` (context released). Transitions only move forward.

use std::sync::Arc;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;

use tokio::sync::Mutex;

use crate::context::ExecutionContext;
use crate::transport;
use crate::transport::Transport;

/// Strong type for connection identifiers.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Open,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

pub struct Session {
    id: ConnectionId,
    state: AtomicU8,
    /// `None` once teardown has taken it.
    ///
    /// The lock is held for the whole of a dispatch, so `close` waits for any
    /// in-flight request before tearing the context down.
    pub(crate) context: Mutex<Option<Box<dyn ExecutionContext>>>,
    transport: Arc<dyn Transport>,
}

impl Session {
    pub(crate) fn new(id: ConnectionId, context: Box<dyn ExecutionContext>, transport: Arc<dyn Transport>) -> Self {
        Self {
            id,
            state: AtomicU8::new(SessionState::Open as u8),
            context: Mutex::new(Some(context)),
            transport,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Advances the lifecycle. Moving backwards is ignored.
    pub(crate) fn advance(&self, next: SessionState) {
        self.state.fetch_max(next as u8, Ordering::AcqRel);
    }

    /// Hands an already-framed payload to this connection's transport.
    pub async fn deliver(&self, framed: &[u8]) -> transport::Result<()> {
        self.transport.send(framed).await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
