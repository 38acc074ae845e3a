//! Concurrency tests for the session registry: churn under broadcast,
//! teardown racing in-flight work, per-session isolation, and clients that
//! stop reading.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Notify;

use hostrun::ConnectionId;
use hostrun::ContextProvider;
use hostrun::Dispatcher;
use hostrun::Event;
use hostrun::ExecutionContext;
use hostrun::Registry;
use hostrun::framing;
use hostrun::mock_transport::RecordingTransport;
use hostrun::mock_transport::StallingTransport;
use hostrun::transport::ChannelTransport;

/// Counts requests per context and answers with `<connection>:<count>`.
#[derive(Default)]
struct CountingProvider {
    teardowns: Arc<AtomicUsize>,
}

struct CountingContext {
    id: ConnectionId,
    seen: usize,
    teardowns: Arc<AtomicUsize>,
}

impl ExecutionContext for CountingContext {
    fn handle_request(&mut self, _request: &[u8]) -> anyhow::Result<Vec<u8>> {
        self.seen += 1;
        Ok(format!("{}:{}", self.id, self.seen).into_bytes())
    }

    fn teardown(&mut self) {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
    }
}

impl ContextProvider for CountingProvider {
    fn create_context(&self, id: ConnectionId) -> anyhow::Result<Box<dyn ExecutionContext>> {
        Ok(Box::new(CountingContext { id, seen: 0, teardowns: self.teardowns.clone() }))
    }

    fn encode_event(&self, event: &Event) -> anyhow::Result<Vec<u8>> {
        let Event::Log(line) = event;
        Ok(line.clone().into_bytes())
    }

    fn encode_failure(&self, _request: &[u8], message: &str) -> Vec<u8> {
        message.as_bytes().to_vec()
    }
}

fn lines(transport: &RecordingTransport) -> Vec<String> {
    transport
        .frames()
        .iter()
        .map(|frame| String::from_utf8(framing::decompress(frame).unwrap()).unwrap())
        .collect()
}

// --- Test 1: Churn Under Broadcast ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_broadcast_reaches_exactly_its_snapshot() {
    let provider = CountingProvider::default();
    let teardowns = provider.teardowns.clone();
    let registry = Arc::new(Registry::new(Arc::new(provider)));
    let transports: Arc<Mutex<HashMap<ConnectionId, RecordingTransport>>> = Arc::default();

    let mut workers = Vec::new();
    for _ in 0..8 {
        let registry = registry.clone();
        let transports = transports.clone();
        workers.push(tokio::spawn(async move {
            for _ in 0..25 {
                let transport = RecordingTransport::new();
                let id = registry.open(Arc::new(transport.clone())).unwrap();
                transports.lock().unwrap().insert(id, transport);

                let pause = rand::thread_rng().gen_range(0..3);
                tokio::time::sleep(Duration::from_millis(pause)).await;
                registry.on_message(id, b"req").await.unwrap();
                registry.close(id).await.unwrap();
            }
        }));
    }

    let broadcaster = {
        let registry = registry.clone();
        tokio::spawn(async move {
            let mut reports = Vec::new();
            for i in 0..60 {
                reports.push((i, registry.broadcast(&Event::Log(format!("line-{i}"))).await));
                tokio::task::yield_now().await;
            }
            reports
        })
    };

    for worker in workers {
        worker.await.unwrap();
    }
    let reports = broadcaster.await.unwrap();

    assert!(registry.is_empty());
    assert_eq!(teardowns.load(Ordering::SeqCst), 200);

    let transports = transports.lock().unwrap();
    for (i, report) in &reports {
        let line = format!("line-{i}");
        assert_eq!(report.delivered + report.failed, report.recipients.len());
        for (id, transport) in transports.iter() {
            let copies = lines(transport).iter().filter(|l| **l == line).count();
            let expected = usize::from(report.recipients.contains(id));
            assert_eq!(copies, expected, "{} got {} copies of {}", id, copies, line);
        }
    }
}

// --- Test 2: Close While a Broadcast Is Parked ---

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_during_stalled_broadcast() {
    let registry = Arc::new(Registry::new(Arc::new(CountingProvider::default())));
    let stalled = StallingTransport::new();
    let idle = RecordingTransport::new();
    let a = registry.open(Arc::new(stalled.clone())).unwrap();
    let b = registry.open(Arc::new(idle.clone())).unwrap();

    let broadcast = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.broadcast(&Event::Log("held".into())).await })
    };
    stalled.entered().await;

    // teardown does not wait for the parked delivery
    registry.close(a).await.unwrap();
    assert!(registry.get(a).is_err());

    let late = RecordingTransport::new();
    registry.open(Arc::new(late.clone())).unwrap();

    stalled.release();
    let report = broadcast.await.unwrap();

    assert_eq!(report.recipients, vec![a, b]);
    assert_eq!(report.delivered, 2);
    assert_eq!(lines(&idle), vec!["held"]);
    assert_eq!(late.count(), 0);
}

// --- Test 3: Teardown Waits for In-Flight Dispatch ---

struct SlowProvider {
    entered: Arc<Notify>,
    finished: Arc<AtomicBool>,
    teardown_saw_finished: Arc<AtomicBool>,
}

struct SlowContext {
    entered: Arc<Notify>,
    finished: Arc<AtomicBool>,
    teardown_saw_finished: Arc<AtomicBool>,
}

impl ExecutionContext for SlowContext {
    fn handle_request(&mut self, _request: &[u8]) -> anyhow::Result<Vec<u8>> {
        self.entered.notify_one();
        std::thread::sleep(Duration::from_millis(100));
        self.finished.store(true, Ordering::SeqCst);
        Ok(b"done".to_vec())
    }

    fn teardown(&mut self) {
        self.teardown_saw_finished
            .store(self.finished.load(Ordering::SeqCst), Ordering::SeqCst);
    }
}

impl ContextProvider for SlowProvider {
    fn create_context(&self, _id: ConnectionId) -> anyhow::Result<Box<dyn ExecutionContext>> {
        Ok(Box::new(SlowContext {
            entered: self.entered.clone(),
            finished: self.finished.clone(),
            teardown_saw_finished: self.teardown_saw_finished.clone(),
        }))
    }

    fn encode_event(&self, _event: &Event) -> anyhow::Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn encode_failure(&self, _request: &[u8], _message: &str) -> Vec<u8> {
        Vec::new()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_waits_for_in_flight_request() {
    let entered = Arc::new(Notify::new());
    let teardown_saw_finished = Arc::new(AtomicBool::new(false));
    let provider = SlowProvider {
        entered: entered.clone(),
        finished: Arc::new(AtomicBool::new(false)),
        teardown_saw_finished: teardown_saw_finished.clone(),
    };
    let registry = Arc::new(Registry::new(Arc::new(provider)));
    let id = registry.open(Arc::new(RecordingTransport::new())).unwrap();

    let request = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.on_message(id, b"slow").await })
    };
    entered.notified().await;

    registry.close(id).await.unwrap();
    assert!(teardown_saw_finished.load(Ordering::SeqCst));
    assert_eq!(request.await.unwrap().unwrap(), b"done");
}

// --- Test 4: Isolation ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sessions_do_not_share_state() {
    let registry = Arc::new(Registry::new(Arc::new(CountingProvider::default())));
    let ids: Vec<ConnectionId> = (0..6)
        .map(|_| registry.open(Arc::new(RecordingTransport::new())).unwrap())
        .collect();

    let mut tasks = Vec::new();
    for (n, id) in ids.iter().copied().enumerate() {
        let registry = registry.clone();
        tasks.push(tokio::spawn(async move {
            let mut last = Vec::new();
            for _ in 0..=n {
                last = registry.on_message(id, b"tick").await.unwrap();
            }
            (id, n + 1, last)
        }));
    }

    for task in tasks {
        let (id, count, last) = task.await.unwrap();
        assert_eq!(String::from_utf8(last).unwrap(), format!("{}:{}", id, count));
    }
}

// --- Test 5: A Client That Stops Reading ---

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stuck_client_does_not_block_broadcast() {
    let registry = Arc::new(Registry::new(Arc::new(CountingProvider::default())));
    // the receiver stays alive but nothing ever drains it
    let (stuck, _outbound) = ChannelTransport::channel(2);
    let healthy = RecordingTransport::new();
    let a = registry.open(Arc::new(stuck)).unwrap();
    let b = registry.open(Arc::new(healthy.clone())).unwrap();

    let mut delivered = 0;
    let mut failed = 0;
    for i in 0..10 {
        let report = tokio::time::timeout(
            Duration::from_secs(2),
            registry.broadcast(&Event::Log(format!("line-{i}"))),
        )
        .await
        .expect("broadcast blocked on a full queue");
        assert_eq!(report.recipients, vec![a, b]);
        delivered += report.delivered;
        failed += report.failed;
    }

    let expected: Vec<String> = (0..10).map(|i| format!("line-{i}")).collect();
    assert_eq!(lines(&healthy), expected);
    // two frames fit the stuck queue, the rest are dropped for that client only
    assert_eq!(delivered, 10 + 2);
    assert_eq!(failed, 8);

    // replies to the stuck peer fail fast too and leave the session open
    let dispatcher = Dispatcher::new(registry.clone());
    let reply = tokio::time::timeout(Duration::from_secs(2), dispatcher.on_binary(a, b"req"))
        .await
        .expect("reply blocked on a full queue");
    assert!(matches!(reply, Err(hostrun::dispatch::Error::Delivery(_))));
    assert!(registry.get(a).is_ok());
}
