//! # Session Registry
//!
//! The one shared, mutable structure of the agent: connection id to live session.
//!
//! Uses DashMap so connects, disconnects, dispatches and broadcast snapshots
//! proceed concurrently without a global lock.
//!
//! ## Invariants
//! - **Publish Complete**: A session is inserted only after its context is built.
//! - **Unpublish First**: `close` removes the entry before tearing the context
//!   down, so no later lookup or snapshot can observe a closing session.
//! - **Contained Failures**: A context error or panic becomes an error reply for
//!   that request. A failed delivery is counted and logged, never returned.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::context::ContextProvider;
use crate::context::Event;
use crate::framing;
use crate::session::ConnectionId;
use crate::session::Session;
use crate::session::SessionState;
use crate::transport::Transport;

#[derive(Debug)]
pub enum Error {
    /// No open session with this id.
    SessionNotFound(ConnectionId),
    /// The provider could not build a context for a new connection.
    ContextCreation(anyhow::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SessionNotFound(id) => write!(f, "Session not found: {}", id),
            Self::ContextCreation(e) => write!(f, "Context creation failed: {}", e),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of one broadcast round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sessions in the snapshot, in ascending id order.
    pub recipients: Vec<ConnectionId>,
    pub delivered: usize,
    pub failed: usize,
}

pub struct Registry {
    sessions: DashMap<ConnectionId, Arc<Session>>,
    provider: Arc<dyn ContextProvider>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new(provider: Arc<dyn ContextProvider>) -> Self {
        Self {
            sessions: DashMap::new(),
            provider,
            next_id: AtomicU64::new(1),
        }
    }

    /// Builds a context for a new connection and publishes the session.
    pub fn open(&self, transport: Arc<dyn Transport>) -> Result<ConnectionId> {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let context = self.provider.create_context(id).map_err(Error::ContextCreation)?;
        self.sessions.insert(id, Arc::new(Session::new(id, context, transport)));
        info!(%id, live = self.sessions.len(), "session opened");
        Ok(id)
    }

    /// Unpublishes a session, waits for any in-flight dispatch, then tears it down.
    pub async fn close(&self, id: ConnectionId) -> Result<()> {
        let (_, session) = self.sessions.remove(&id).ok_or(Error::SessionNotFound(id))?;
        session.advance(SessionState::Closing);

        let context = session.context.lock().await.take();
        if let Some(mut context) = context {
            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| context.teardown())) {
                warn!(%id, panic = panic_message(&*panic), "context teardown panicked");
            }
        }

        session.advance(SessionState::Closed);
        info!(%id, live = self.sessions.len(), "session closed");
        Ok(())
    }

    /// Closes every session currently published.
    pub async fn close_all(&self) {
        let ids: Vec<ConnectionId> = self.sessions.iter().map(|e| *e.key()).collect();
        for id in ids {
            // a concurrent disconnect may have won the race
            let _ = self.close(id).await;
        }
    }

    /// Looks up an open session.
    pub fn get(&self, id: ConnectionId) -> Result<Arc<Session>> {
        self.sessions
            .get(&id)
            .map(|entry| entry.value().clone())
            .filter(|session| session.is_open())
            .ok_or(Error::SessionNotFound(id))
    }

    /// Runs one request through the session's context and returns the raw reply.
    ///
    /// Fails only with `SessionNotFound`. Context failures are encoded as a reply.
    pub async fn on_message(&self, id: ConnectionId, raw: &[u8]) -> Result<Vec<u8>> {
        let session = self.get(id)?;
        let mut guard = session.context.lock().await;

        // close() may have unpublished the session while we waited for the lock
        let context = match guard.as_mut() {
            Some(context) if session.is_open() => context,
            _ => return Err(Error::SessionNotFound(id)),
        };

        let request = framing::inbound(raw);
        debug!(%id, bytes = request.len(), "dispatching request");
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| context.handle_request(request)));

        Ok(match outcome {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!(%id, error = %e, "request failed");
                self.provider.encode_failure(request, &e.to_string())
            }
            Err(panic) => {
                let message = panic_message(&*panic);
                warn!(%id, panic = message, "request handler panicked");
                self.provider.encode_failure(request, &format!("handler panicked: {}", message))
            }
        })
    }

    /// The sessions open right now, in ascending id order.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|session| session.is_open())
            .collect();
        sessions.sort_by_key(|session| session.id());
        sessions
    }

    /// Delivers `event` to every session in a snapshot taken on entry.
    ///
    /// The event is encoded and framed once. Deliveries run concurrently, and a
    /// transport never waits on a peer that stopped reading, so one stuck client
    /// costs its own frames only.
    pub async fn broadcast(&self, event: &Event) -> BroadcastReport {
        let framed = match self.provider.encode_event(event).map(|payload| framing::compress(&payload)) {
            Ok(Ok(framed)) => framed,
            Ok(Err(e)) => {
                warn!(error = %e, "failed to frame event");
                return BroadcastReport::default();
            }
            Err(e) => {
                warn!(error = %e, "failed to encode event");
                return BroadcastReport::default();
            }
        };

        let sessions = self.snapshot();
        let deliveries = sessions.iter().map(|session| {
            let framed = &framed;
            async move { (session.id(), session.deliver(framed).await) }
        });
        let outcomes = futures::future::join_all(deliveries).await;

        let mut report = BroadcastReport {
            recipients: sessions.iter().map(|session| session.id()).collect(),
            ..Default::default()
        };
        for (id, outcome) in outcomes {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    debug!(%id, error = %e, "broadcast delivery failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
