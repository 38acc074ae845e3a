//! # Transport Abstraction
//!
//! The outbound half of one client connection.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: The Transport knows nothing about frames or compression.
//!   It moves opaque, already-framed buffers.
//! - **Per-Connection**: Each session owns exactly one transport. Inbound bytes
//!   arrive through the `Dispatcher`, not through this trait.

use std::fmt;

use tokio::sync::mpsc;

/// Errors that occur at the network/transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A mechanism to push a byte buffer to one connected client.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends one message.
    ///
    /// # invariants
    /// - Must return `Err` once the connection is gone; never block forever on a dead peer.
    /// - Should not interpret the payload content.
    async fn send(&self, payload: &[u8]) -> Result<()>;
}

/// Feeds a bounded queue drained by the socket writer task.
///
/// Sends never wait for queue space. A client that stops reading fills its
/// queue, after which each further frame is dropped and reported as an error.
pub struct ChannelTransport {
    tx: mpsc::Sender<Vec<u8>>,
}

impl ChannelTransport {
    pub fn new(tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self { tx }
    }

    /// Creates a transport and the receiver its writer task should drain.
    pub fn channel(depth: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait::async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, payload: &[u8]) -> Result<()> {
        self.tx.try_send(payload.to_vec()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Io("outbound queue full, frame dropped".into()),
            mpsc::error::TrySendError::Closed(_) => TransportError::ConnectionLost("socket writer closed".into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_full_queue_fails_without_waiting() {
        let (transport, mut rx) = ChannelTransport::channel(1);
        transport.send(b"first").await.unwrap();

        let second = tokio::time::timeout(Duration::from_secs(1), transport.send(b"second"))
            .await
            .expect("send waited for queue space");
        assert!(matches!(second, Err(TransportError::Io(_))));

        // the dropped frame is gone; draining frees room for the next one
        assert_eq!(rx.recv().await.unwrap(), b"first");
        transport.send(b"third").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"third");
    }

    #[tokio::test]
    async fn test_closed_writer_is_connection_lost() {
        let (transport, rx) = ChannelTransport::channel(4);
        drop(rx);
        assert!(matches!(transport.send(b"x").await, Err(TransportError::ConnectionLost(_))));
    }
}
