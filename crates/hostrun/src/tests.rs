//! Tests for the registry and dispatcher with mock transports.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use crate::context::ContextProvider;
use crate::context::Event;
use crate::context::ExecutionContext;
use crate::dispatch;
use crate::dispatch::Dispatcher;
use crate::framing;
use crate::mock_transport::RecordingTransport;
use crate::registry;
use crate::registry::Registry;
use crate::session::ConnectionId;
use crate::session::SessionState;

/// Replies `reply:<request>`. The requests `fail` and `panic` do what they say.
#[derive(Default)]
pub(crate) struct EchoProvider {
    pub(crate) teardowns: Arc<AtomicUsize>,
    pub(crate) handled: Arc<Mutex<Vec<(ConnectionId, Vec<u8>)>>>,
}

struct EchoContext {
    id: ConnectionId,
    teardowns: Arc<AtomicUsize>,
    handled: Arc<Mutex<Vec<(ConnectionId, Vec<u8>)>>>,
}

impl ExecutionContext for EchoContext {
    fn handle_request(&mut self, request: &[u8]) -> anyhow::Result<Vec<u8>> {
        self.handled.lock().unwrap().push((self.id, request.to_vec()));
        match request {
            b"fail" => anyhow::bail!("refused"),
            b"panic" => panic!("context exploded"),
            _ => Ok([b"reply:".as_slice(), request].concat()),
        }
    }

    fn teardown(&mut self) {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
    }
}

impl ContextProvider for EchoProvider {
    fn create_context(&self, id: ConnectionId) -> anyhow::Result<Box<dyn ExecutionContext>> {
        Ok(Box::new(EchoContext {
            id,
            teardowns: self.teardowns.clone(),
            handled: self.handled.clone(),
        }))
    }

    fn encode_event(&self, event: &Event) -> anyhow::Result<Vec<u8>> {
        match event {
            Event::Log(line) => Ok(format!("event:{line}").into_bytes()),
        }
    }

    fn encode_failure(&self, _request: &[u8], message: &str) -> Vec<u8> {
        format!("failure:{message}").into_bytes()
    }
}

/// Refuses to build contexts.
struct BrokenProvider;

impl ContextProvider for BrokenProvider {
    fn create_context(&self, _id: ConnectionId) -> anyhow::Result<Box<dyn ExecutionContext>> {
        anyhow::bail!("host detached")
    }

    fn encode_event(&self, _event: &Event) -> anyhow::Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn encode_failure(&self, _request: &[u8], _message: &str) -> Vec<u8> {
        Vec::new()
    }
}

fn registry() -> (Arc<Registry>, Arc<AtomicUsize>) {
    let provider = EchoProvider::default();
    let teardowns = provider.teardowns.clone();
    (Arc::new(Registry::new(Arc::new(provider))), teardowns)
}

#[tokio::test]
async fn test_open_close_lifecycle() {
    let (registry, teardowns) = registry();
    let id = registry.open(Arc::new(RecordingTransport::new())).unwrap();

    let session = registry.get(id).unwrap();
    assert_eq!(session.state(), SessionState::Open);
    assert_eq!(registry.len(), 1);

    registry.close(id).await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);
    assert!(registry.is_empty());
    assert_eq!(teardowns.load(Ordering::SeqCst), 1);

    // a second close finds nothing and tears nothing down
    assert!(matches!(registry.close(id).await, Err(registry::Error::SessionNotFound(_))));
    assert_eq!(teardowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_ids_are_unique() {
    let (registry, _) = registry();
    let a = registry.open(Arc::new(RecordingTransport::new())).unwrap();
    let b = registry.open(Arc::new(RecordingTransport::new())).unwrap();
    registry.close(a).await.unwrap();
    let c = registry.open(Arc::new(RecordingTransport::new())).unwrap();

    assert_ne!(a, b);
    assert_ne!(a, c);
    assert_ne!(b, c);
}

#[tokio::test]
async fn test_message_after_close_is_session_not_found() {
    let (registry, _) = registry();
    let id = registry.open(Arc::new(RecordingTransport::new())).unwrap();
    assert_eq!(registry.on_message(id, b"hi").await.unwrap(), b"reply:hi");

    registry.close(id).await.unwrap();
    let err = registry.on_message(id, b"hi").await.unwrap_err();
    assert!(matches!(err, registry::Error::SessionNotFound(found) if found == id));
}

#[tokio::test]
async fn test_context_failures_become_replies() {
    let (registry, _) = registry();
    let id = registry.open(Arc::new(RecordingTransport::new())).unwrap();

    assert_eq!(registry.on_message(id, b"fail").await.unwrap(), b"failure:refused");

    let reply = registry.on_message(id, b"panic").await.unwrap();
    let reply = String::from_utf8(reply).unwrap();
    assert!(reply.starts_with("failure:handler panicked"), "{}", reply);
    assert!(reply.contains("context exploded"));

    // the session survives both
    assert_eq!(registry.on_message(id, b"again").await.unwrap(), b"reply:again");
    assert!(registry.get(id).unwrap().is_open());
}

#[tokio::test]
async fn test_context_creation_failure_publishes_nothing() {
    let registry = Registry::new(Arc::new(BrokenProvider));
    let result = registry.open(Arc::new(RecordingTransport::new()));

    assert!(matches!(result, Err(registry::Error::ContextCreation(_))));
    assert!(registry.is_empty());
    assert!(registry.snapshot().is_empty());
}

#[tokio::test]
async fn test_snapshot_is_sorted_and_excludes_closed() {
    let (registry, _) = registry();
    let ids: Vec<ConnectionId> = (0..4)
        .map(|_| registry.open(Arc::new(RecordingTransport::new())).unwrap())
        .collect();
    registry.close(ids[1]).await.unwrap();

    let seen: Vec<ConnectionId> = registry.snapshot().iter().map(|s| s.id()).collect();
    assert_eq!(seen, vec![ids[0], ids[2], ids[3]]);
}

#[tokio::test]
async fn test_broadcast_reaches_every_open_session() {
    let (registry, _) = registry();
    let a = RecordingTransport::new();
    let b = RecordingTransport::new();
    let dead = RecordingTransport::new();
    registry.open(Arc::new(a.clone())).unwrap();
    registry.open(Arc::new(b.clone())).unwrap();
    registry.open(Arc::new(dead.clone())).unwrap();
    dead.cut();

    let report = registry.broadcast(&Event::Log("boot".into())).await;
    assert_eq!(report.recipients.len(), 3);
    assert_eq!(report.delivered, 2);
    assert_eq!(report.failed, 1);

    for transport in [&a, &b] {
        let frames = transport.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(framing::decompress(&frames[0]).unwrap(), b"event:boot");
    }
    // a failed delivery does not close anything
    assert_eq!(registry.len(), 3);
}

#[tokio::test]
async fn test_dispatcher_replies_on_origin_only() {
    let (registry, _) = registry();
    let dispatcher = Dispatcher::new(registry);
    let origin = RecordingTransport::new();
    let other = RecordingTransport::new();
    let id = dispatcher.on_connect(Arc::new(origin.clone())).unwrap();
    dispatcher.on_connect(Arc::new(other.clone())).unwrap();

    dispatcher.on_binary(id, b"ping").await.unwrap();

    assert_eq!(origin.count(), 1);
    assert_eq!(framing::decompress(&origin.frames()[0]).unwrap(), b"reply:ping");
    assert_eq!(other.count(), 0);
}

#[tokio::test]
async fn test_dispatcher_reports_dead_socket() {
    let (registry, _) = registry();
    let dispatcher = Dispatcher::new(registry);
    let transport = RecordingTransport::new();
    let id = dispatcher.on_connect(Arc::new(transport.clone())).unwrap();
    transport.cut();

    let err = dispatcher.on_binary(id, b"ping").await.unwrap_err();
    assert!(matches!(err, dispatch::Error::Delivery(_)));
    assert!(dispatcher.registry().get(id).is_ok());

    dispatcher.on_disconnect(id).await.unwrap();
    let err = dispatcher.on_binary(id, b"ping").await.unwrap_err();
    assert!(matches!(err, dispatch::Error::Registry(registry::Error::SessionNotFound(_))));
}

#[tokio::test]
async fn test_close_all() {
    let (registry, teardowns) = registry();
    for _ in 0..5 {
        registry.open(Arc::new(RecordingTransport::new())).unwrap();
    }
    registry.close_all().await;

    assert!(registry.is_empty());
    assert_eq!(teardowns.load(Ordering::SeqCst), 5);
}
