//! Mock transports for testing.
//!
//! Used by the unit and integration suites to observe deliveries and to force
//! specific interleavings between broadcasts and connection teardown.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tokio::sync::Notify;

use crate::transport;
use crate::transport::Transport;

/// Captures every payload it is asked to send.
///
/// `cut` makes all further sends fail, as a socket that has gone away would.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
    cut: Arc<AtomicBool>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every payload delivered so far, in order.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self) -> usize {
        self.frames.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn cut(&self) {
        self.cut.store(true, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, payload: &[u8]) -> transport::Result<()> {
        if self.cut.load(Ordering::SeqCst) {
            return Err(transport::TransportError::ConnectionLost("transport cut".into()));
        }
        self.frames.lock().unwrap_or_else(|e| e.into_inner()).push(payload.to_vec());
        Ok(())
    }
}

/// Parks every send until `release` is called, then records it.
///
/// `entered` resolves once a send is parked, which lets a test act while a
/// broadcast is known to be in flight.
#[derive(Clone, Default)]
pub struct StallingTransport {
    inner: RecordingTransport,
    entered: Arc<Notify>,
    gate: Arc<Notify>,
    released: Arc<AtomicBool>,
}

impl StallingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until a send is parked on this transport.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Lets every parked and future send through.
    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
        self.gate.notify_waiters();
    }

    pub fn recorded(&self) -> &RecordingTransport {
        &self.inner
    }
}

#[async_trait::async_trait]
impl Transport for StallingTransport {
    async fn send(&self, payload: &[u8]) -> transport::Result<()> {
        let gate = self.gate.notified();
        tokio::pin!(gate);
        gate.as_mut().enable();

        if !self.released.load(Ordering::SeqCst) {
            self.entered.notify_one();
            gate.await;
        }
        self.inner.send(payload).await
    }
}
