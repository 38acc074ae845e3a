//! # Dispatcher
//!
//! Entry points the network layer calls: connect, disconnect, one inbound binary
//! message, one log line. Everything here is safe to call concurrently from any
//! number of connection tasks.

use std::sync::Arc;

use tracing::debug;

use crate::context::Event;
use crate::framing;
use crate::registry;
use crate::registry::BroadcastReport;
use crate::registry::Registry;
use crate::session::ConnectionId;
use crate::transport;
use crate::transport::Transport;

#[derive(Debug)]
pub enum Error {
    Registry(registry::Error),
    /// The reply could not be gzip-framed.
    Framing(std::io::Error),
    /// The reply was produced but the connection would not take it.
    Delivery(transport::TransportError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registry(e) => write!(f, "{}", e),
            Self::Framing(e) => write!(f, "Framing error: {}", e),
            Self::Delivery(e) => write!(f, "Delivery failed: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<registry::Error> for Error {
    fn from(e: registry::Error) -> Self {
        Self::Registry(e)
    }
}

impl From<transport::TransportError> for Error {
    fn from(e: transport::TransportError) -> Self {
        Self::Delivery(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn on_connect(&self, transport: Arc<dyn Transport>) -> registry::Result<ConnectionId> {
        self.registry.open(transport)
    }

    pub async fn on_disconnect(&self, id: ConnectionId) -> registry::Result<()> {
        self.registry.close(id).await
    }

    /// Answers one inbound message on the connection it arrived on.
    ///
    /// The reply goes out on this connection only. A failed send is returned to
    /// the caller but leaves the session open.
    pub async fn on_binary(&self, id: ConnectionId, raw: &[u8]) -> Result<()> {
        let reply = self.registry.on_message(id, raw).await?;
        let framed = framing::compress(&reply).map_err(Error::Framing)?;
        let session = self.registry.get(id)?;
        session.deliver(&framed).await?;
        debug!(%id, bytes = framed.len(), "reply sent");
        Ok(())
    }

    /// Fans one log line out to every open session.
    pub async fn on_log_line(&self, line: String) -> BroadcastReport {
        self.registry.broadcast(&Event::Log(line)).await
    }
}
