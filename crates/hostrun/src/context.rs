//! # Execution Contexts
//!
//! The per-connection state that actually answers requests, and the factory that
//! creates it. The registry treats both as opaque: request and response bytes
//! are never inspected outside a context.

use crate::session::ConnectionId;

/// Something every live session should hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// One line from the host's diagnostic log.
    Log(String),
}

/// State bound to exactly one connection.
///
/// A context is only ever driven by one task at a time, so implementations need
/// no internal locking. Returning `Err` (or panicking) from `handle_request` is
/// contained by the registry and answered with `ContextProvider::encode_failure`.
pub trait ExecutionContext: Send + 'static {
    /// Answers one request. `request` is the inbound payload starting at offset 0.
    fn handle_request(&mut self, request: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// Releases host resources. Called exactly once, after the last request.
    fn teardown(&mut self);
}

/// Creates contexts and encodes the messages that do not come from one.
pub trait ContextProvider: Send + Sync + 'static {
    fn create_context(&self, id: ConnectionId) -> anyhow::Result<Box<dyn ExecutionContext>>;

    /// Encodes an event once for every recipient of a broadcast.
    fn encode_event(&self, event: &Event) -> anyhow::Result<Vec<u8>>;

    /// The error reply for a request whose handling failed.
    ///
    /// Must not fail: `request` may be arbitrary bytes.
    fn encode_failure(&self, request: &[u8], message: &str) -> Vec<u8>;
}
