//! Async runtime tests
//!
//! Run the real `SyncRuntime` against scripted sources and connectors on a
//! paused tokio clock, so pull intervals, timeouts and reconnect backoff
//! elapse instantly and deterministically.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use tokio::sync::{mpsc, Notify};

use market_sync::control::{ControlResponse, WorkerAction, WorkerControl};
use market_sync::events::PushMessage;
use market_sync::snapshot::{SnapshotResponse, SnapshotSource};
use market_sync::websocket::{PushConnector, PushStream};
use market_sync::{Collaborators, SyncConfig, SyncHandle, SyncRuntime, SyncView};
use types::connection::ConnectionState;
use types::entry::EntryRecord;
use types::errors::{ChannelError, FetchError};
use types::sort::{SortColumn, SortDirection};

type PushSender = mpsc::UnboundedSender<Result<PushMessage, ChannelError>>;

fn record(symbol: &str, ts_ms: i64, price: i64) -> EntryRecord {
    serde_json::from_value(json!({"symbol": symbol, "timestamp": ts_ms, "price_usd": price})).unwrap()
}

// ---- scripted collaborators ----

struct ScriptedSource {
    responses: Mutex<VecDeque<Result<SnapshotResponse, FetchError>>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    fn new(responses: Vec<Result<SnapshotResponse, FetchError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SnapshotSource for ScriptedSource {
    async fn fetch(&self, _limit: usize) -> Result<SnapshotResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(response) => response,
            // Keep serving an empty-but-successful snapshot.
            None => Ok(SnapshotResponse::ok(Vec::new())),
        }
    }
}

struct HangingSource;

#[async_trait]
impl SnapshotSource for HangingSource {
    async fn fetch(&self, _limit: usize) -> Result<SnapshotResponse, FetchError> {
        std::future::pending().await
    }
}

/// Blocks every fetch until the gate opens and records fetches that were
/// dropped before finishing.
struct GatedSource {
    started: Notify,
    gate: Notify,
    calls: AtomicUsize,
    aborted: Arc<AtomicBool>,
}

struct AbortFlag {
    flag: Arc<AtomicBool>,
    armed: bool,
}

impl Drop for AbortFlag {
    fn drop(&mut self) {
        if self.armed {
            self.flag.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl SnapshotSource for GatedSource {
    async fn fetch(&self, _limit: usize) -> Result<SnapshotResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut guard = AbortFlag {
            flag: Arc::clone(&self.aborted),
            armed: true,
        };
        self.started.notify_one();
        self.gate.notified().await;
        guard.armed = false;
        Ok(SnapshotResponse::ok(vec![record("BTC", 1_000, 50_000)]))
    }
}

enum Script {
    Fail(ChannelError),
    Open(mpsc::UnboundedReceiver<Result<PushMessage, ChannelError>>),
}

struct ScriptedConnector {
    scripts: Mutex<VecDeque<Script>>,
    attempts: AtomicUsize,
}

impl ScriptedConnector {
    fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            attempts: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl PushConnector for ScriptedConnector {
    async fn connect(&self) -> Result<PushStream, ChannelError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self.scripts.lock().unwrap().pop_front();
        match next {
            Some(Script::Open(rx)) => Ok(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed()),
            Some(Script::Fail(error)) => Err(error),
            None => Err(ChannelError::ConnectFailed("no script".to_string())),
        }
    }
}

struct FakeControl {
    calls: Mutex<Vec<(String, WorkerAction)>>,
}

#[async_trait]
impl WorkerControl for FakeControl {
    async fn send(&self, worker: &str, action: WorkerAction) -> Result<ControlResponse, FetchError> {
        self.calls.lock().unwrap().push((worker.to_string(), action));
        Ok(ControlResponse {
            success: true,
            message: Some(format!("{} ok", action)),
            is_running: Some(action != WorkerAction::Stop),
            ..ControlResponse::default()
        })
    }
}

fn open_channel() -> (Script, PushSender) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Script::Open(rx), tx)
}

fn fake_control() -> Arc<FakeControl> {
    Arc::new(FakeControl {
        calls: Mutex::new(Vec::new()),
    })
}

fn spawn(
    source: Arc<dyn SnapshotSource>,
    connector: Arc<dyn PushConnector>,
    control: Arc<dyn WorkerControl>,
) -> SyncHandle {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    SyncRuntime::spawn(
        SyncConfig::default(),
        Collaborators {
            source,
            connector,
            control,
        },
    )
}

async fn wait_for(handle: &SyncHandle, pred: impl Fn(&SyncView) -> bool) -> SyncView {
    let mut rx = handle.watch();
    tokio::time::timeout(Duration::from_secs(300), async {
        loop {
            {
                let view = rx.borrow_and_update();
                if pred(&view) {
                    return view.clone();
                }
            }
            rx.changed().await.expect("runtime stopped");
        }
    })
    .await
    .expect("condition not reached")
}

// ---- tests ----

#[tokio::test(start_paused = true)]
async fn test_connect_pulls_immediately() {
    let source = ScriptedSource::new(vec![Ok(SnapshotResponse::ok(vec![
        record("BTC", 1_000, 50_000),
        record("ETH", 1_000, 3_000),
    ]))]);
    let (script, _tx) = open_channel();
    let handle = spawn(
        source.clone(),
        ScriptedConnector::new(vec![script]),
        fake_control(),
    );

    handle.connect().await.unwrap();
    let view = wait_for(&handle, |v| v.projection.len() == 2).await;

    assert!(view.pulls_active);
    assert_eq!(view.projection[0].symbol.as_str(), "BTC");
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_push_delta_reaches_view() {
    let (script, tx) = open_channel();
    let source = ScriptedSource::new(vec![Ok(SnapshotResponse::ok(vec![record("BTC", 1_000, 50_000)]))]);
    let handle = spawn(source, ScriptedConnector::new(vec![script]), fake_control());
    let mut changes = handle.changes();

    handle.connect().await.unwrap();
    // Let the initial pull land first so it cannot replace the delta.
    wait_for(&handle, |v| {
        v.connection == ConnectionState::Connected && v.projection.len() == 1
    })
    .await;

    tx.send(Ok(PushMessage::DataUpdate(vec![record("SOL", 5_000, 150)])))
        .unwrap();
    let view = wait_for(&handle, |v| v.projection.len() == 2).await;
    assert!(view.projection.iter().any(|e| e.symbol.as_str() == "SOL"));

    let mut saw_dataset_change = false;
    while let Ok(event) = changes.try_recv() {
        if matches!(event, market_sync::ChangeEvent::DatasetChanged { .. }) {
            saw_dataset_change = true;
        }
    }
    assert!(saw_dataset_change);
    assert_eq!(handle.metrics().export()["push_messages"], 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_drop() {
    let (first, first_tx) = open_channel();
    let (last, _last_tx) = open_channel();
    let connector = ScriptedConnector::new(vec![
        first,
        Script::Fail(ChannelError::ConnectFailed("refused".to_string())),
        Script::Fail(ChannelError::ConnectFailed("refused".to_string())),
        last,
    ]);
    let handle = spawn(ScriptedSource::new(Vec::new()), connector.clone(), fake_control());

    handle.connect().await.unwrap();
    wait_for(&handle, |v| v.connection == ConnectionState::Connected).await;

    // Ending the stream drops the channel.
    drop(first_tx);
    let view = wait_for(&handle, |v| {
        v.connection == ConnectionState::Connected && v.logs.iter().any(|r| r.message.contains("attempt 3/5"))
    })
    .await;

    assert_eq!(view.retry_count, 0);
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 4);
    assert_eq!(handle.metrics().export()["reconnect_attempts"], 3);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_cancels_backoff() {
    let connector = ScriptedConnector::new(vec![Script::Fail(ChannelError::ConnectFailed(
        "refused".to_string(),
    ))]);
    let handle = spawn(ScriptedSource::new(Vec::new()), connector.clone(), fake_control());

    handle.connect().await.unwrap();
    wait_for(&handle, |v| v.connection == ConnectionState::Reconnecting).await;

    handle.teardown().await.unwrap();
    let view = wait_for(&handle, |v| v.connection == ConnectionState::Idle).await;
    assert!(!view.pulls_active);

    // Well past the first backoff delay.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(handle.view().connection, ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_abandons_in_flight_pull() {
    let source = Arc::new(GatedSource {
        started: Notify::new(),
        gate: Notify::new(),
        calls: AtomicUsize::new(0),
        aborted: Arc::new(AtomicBool::new(false)),
    });
    let (first, _first_tx) = open_channel();
    let (second, _second_tx) = open_channel();
    let handle = spawn(
        source.clone(),
        ScriptedConnector::new(vec![first, second]),
        fake_control(),
    );

    handle.connect().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), source.started.notified())
        .await
        .expect("pull never started");

    handle.teardown().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(source.aborted.load(Ordering::SeqCst));

    // Releasing the gate now reaches nobody, and no interval pull follows.
    source.gate.notify_waiters();
    tokio::time::sleep(Duration::from_secs(90)).await;

    let view = handle.view();
    assert!(view.projection.is_empty());
    assert!(!view.pulls_active);
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    let metrics = handle.metrics().export();
    assert_eq!(metrics["pulls_succeeded"], 0);

    // A fresh connect pulls again and applies normally.
    handle.connect().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), source.started.notified())
        .await
        .expect("second pull never started");
    source.gate.notify_one();
    let view = wait_for(&handle, |v| v.projection.len() == 1).await;
    assert_eq!(view.projection[0].symbol.as_str(), "BTC");
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_writes_visible_on_return() {
    let (script, _tx) = open_channel();
    let handle = spawn(
        ScriptedSource::new(Vec::new()),
        ScriptedConnector::new(vec![script]),
        fake_control(),
    );

    handle.connect().await.unwrap();
    let view = handle.view();
    assert!(view.pulls_active);
    assert_ne!(view.connection, ConnectionState::Idle);

    handle.clear_logs().await.unwrap();
    assert_eq!(handle.view().logs[0].message, "log cleared");

    handle
        .set_sort(types::sort::SortSpec::new(SortColumn::Name, SortDirection::Descending))
        .await
        .unwrap();
    assert_eq!(handle.view().sort.column, SortColumn::Name);

    handle.teardown().await.unwrap();
    let view = handle.view();
    assert_eq!(view.connection, ConnectionState::Idle);
    assert!(!view.pulls_active);
}

#[tokio::test(start_paused = true)]
async fn test_pull_timeout_logged() {
    let (script, _tx) = open_channel();
    let handle = spawn(
        Arc::new(HangingSource),
        ScriptedConnector::new(vec![script]),
        fake_control(),
    );

    handle.connect().await.unwrap();
    let view = wait_for(&handle, |v| {
        v.logs.iter().any(|r| r.message.contains("timed out after 10000ms"))
    })
    .await;

    assert!(view.projection.is_empty());
    assert!(handle.metrics().export()["pulls_failed"] >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_pull_keeps_previous_dataset() {
    let source = ScriptedSource::new(vec![
        Ok(SnapshotResponse::ok(vec![record("BTC", 1_000, 50_000)])),
        Err(FetchError::Status { status: 503 }),
    ]);
    let (script, _tx) = open_channel();
    let handle = spawn(source.clone(), ScriptedConnector::new(vec![script]), fake_control());

    handle.connect().await.unwrap();
    wait_for(&handle, |v| v.projection.len() == 1).await;

    handle.refresh().await.unwrap();
    let view = wait_for(&handle, |v| v.logs.iter().any(|r| r.message.contains("503"))).await;
    assert_eq!(view.projection.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sort_and_clear_logs() {
    let (script, _tx) = open_channel();
    let handle = spawn(
        ScriptedSource::new(Vec::new()),
        ScriptedConnector::new(vec![script]),
        fake_control(),
    );

    let spec = handle.sort_by(SortColumn::MarketCap).await.unwrap();
    assert_eq!(spec.direction, SortDirection::Ascending);
    let spec = handle.sort_by(SortColumn::MarketCap).await.unwrap();
    assert_eq!(spec.direction, SortDirection::Descending);

    handle.connect().await.unwrap();
    wait_for(&handle, |v| v.logs.len() >= 2).await;

    handle.clear_logs().await.unwrap();
    let view = wait_for(&handle, |v| v.logs.len() == 1).await;
    assert_eq!(view.logs[0].message, "log cleared");
    assert_eq!(view.sort.column, SortColumn::MarketCap);
}

#[tokio::test(start_paused = true)]
async fn test_control_logs_and_refreshes_status() {
    let control = fake_control();
    let handle = spawn(
        ScriptedSource::new(Vec::new()),
        ScriptedConnector::new(Vec::new()),
        control.clone(),
    );

    let response = handle.control("scraper", WorkerAction::Start).await.unwrap();
    assert!(response.success);

    let view = wait_for(&handle, |v| v.workers.contains_key("scraper")).await;
    assert_eq!(view.workers["scraper"].is_running, Some(true));
    assert!(view.logs.iter().any(|r| r.message == "scraper start: start ok"));

    let calls = control.calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![
            ("scraper".to_string(), WorkerAction::Start),
            ("scraper".to_string(), WorkerAction::Status),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_checksum_and_shutdown() {
    let source = ScriptedSource::new(vec![Ok(SnapshotResponse::ok(vec![record("BTC", 1_000, 1)]))]);
    let (script, _tx) = open_channel();
    let handle = spawn(source, ScriptedConnector::new(vec![script]), fake_control());

    handle.connect().await.unwrap();
    wait_for(&handle, |v| v.projection.len() == 1).await;

    let snapshot = handle.snapshot().await.unwrap();
    assert!(market_sync::store::verify_projection_integrity(&snapshot));

    handle.shutdown().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(handle.refresh().await.is_err());
}
