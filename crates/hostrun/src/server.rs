//! # WebSocket Server
//!
//! Binary WebSocket frames in, gzip-framed replies out. One task per
//! connection reads the socket and drives the dispatcher; a second drains the
//! connection's outbound queue into the socket so broadcasts never block on a
//! slow reader.
//!
//! ## Invariants
//! - **Released On Stop**: `ServerHandle::stop` returns only after the
//!   listener is dropped, so the same port can be bound again immediately.
//! - **Disconnect Always**: Every connection that was registered is closed in
//!   the registry when its socket task ends, whatever the cause.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::WebSocketUpgrade;
use axum::extract::ws::Message;
use axum::extract::ws::WebSocket;
use axum::response::IntoResponse;
use axum::routing::get;
use futures::SinkExt;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::dispatch::Dispatcher;
use crate::transport::ChannelTransport;

/// How long a closing socket may spend flushing queued frames.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub bind_attempts: u32,
    pub bind_backoff: Duration,
    pub queue_depth: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            bind_attempts: 5,
            bind_backoff: Duration::from_millis(200),
            queue_depth: crate::config::DEFAULT_QUEUE_DEPTH,
        }
    }
}

#[derive(Clone)]
struct AppState {
    dispatcher: Arc<Dispatcher>,
    queue_depth: usize,
    shutdown: watch::Receiver<bool>,
}

/// A running server. Dropping the handle also shuts it down.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<io::Result<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signals every open socket to close and waits for the listener to go away.
    pub async fn stop(self) -> io::Result<()> {
        // receivers may already be gone if the server task ended on its own
        let _ = self.shutdown.send(true);
        let result = match self.task.await {
            Ok(result) => result,
            Err(e) => Err(io::Error::other(e)),
        };
        info!(addr = %self.local_addr, "server stopped");
        result
    }
}

/// Binds `addr`, retrying while the port is still held by a previous instance.
pub async fn bind_with_retry(addr: SocketAddr, attempts: u32, backoff: Duration) -> io::Result<TcpListener> {
    let mut attempt = 1;
    loop {
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse && attempt < attempts => {
                warn!(%addr, attempt, "address in use, retrying");
                tokio::time::sleep(backoff * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

pub async fn start(addr: SocketAddr, dispatcher: Arc<Dispatcher>, options: ServerOptions) -> io::Result<ServerHandle> {
    let listener = bind_with_retry(addr, options.bind_attempts, options.bind_backoff).await?;
    let local_addr = listener.local_addr()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = AppState {
        dispatcher,
        queue_depth: options.queue_depth.max(1),
        shutdown: shutdown_rx.clone(),
    };

    let app = Router::new()
        .route("/", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    let mut signal = shutdown_rx;
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = signal.wait_for(|stop| *stop).await;
            })
            .await
    });

    info!(addr = %local_addr, "control endpoint listening");
    Ok(ServerHandle {
        local_addr,
        shutdown: shutdown_tx,
        task,
    })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    format!("ok sessions={}\n", state.dispatcher.registry().len())
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (transport, mut outbound) = ChannelTransport::channel(state.queue_depth);

    let id = match state.dispatcher.on_connect(Arc::new(transport)) {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "rejecting connection");
            let _ = ws_tx.send(Message::Close(None)).await;
            return;
        }
    };

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if ws_tx.send(Message::Binary(frame)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    let mut shutdown = state.shutdown.clone();
    loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Binary(bytes))) => {
                    if let Err(e) = state.dispatcher.on_binary(id, &bytes).await {
                        warn!(%id, error = %e, "request not answered");
                    }
                }
                Some(Ok(Message::Text(_))) => debug!(%id, "ignoring text frame"),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(%id, error = %e, "socket error");
                    break;
                }
            },
            // the watch guard must not outlive this arm, or the future stops being Send
            _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => break,
        }
    }

    if let Err(e) = state.dispatcher.on_disconnect(id).await {
        debug!(%id, error = %e, "disconnect after close");
    }

    // the writer ends once the session, and with it the queue sender, is dropped
    let abort = writer.abort_handle();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        abort.abort();
    }
}
