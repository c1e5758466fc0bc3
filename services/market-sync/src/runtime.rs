//! Async runtime
//!
//! One tokio task owns the [`SyncCoordinator`] and serialises every input
//! through a single `select!` loop: handle commands, channel session events,
//! completed pulls and control calls, the pull interval and the pending
//! reconnect backoff. Because nothing else touches the coordinator, no
//! locking is needed and every mutation runs to completion before the next
//! input is looked at.
//!
//! I/O happens in spawned tasks that report back over channels:
//! - pulls run under `pull_timeout`; a timeout fails like a network error
//! - each channel session runs `drive_session` under `connect_timeout`
//! - control calls run to completion and are logged when they return
//!
//! Readers use [`SyncHandle::view`] (latest state through a `watch`) or
//! [`SyncHandle::changes`] (every `ChangeEvent` through a `broadcast`).
//! Every handle call waits for the runtime's reply, which is sent only after
//! the resulting view has been published, so a read that follows a write on
//! the same handle always observes it.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};
use types::errors::FetchError;
use types::sort::{SortColumn, SortSpec};

use crate::config::{ConfigError, SyncConfig};
use crate::control::{ControlResponse, HttpWorkerControl, WorkerAction, WorkerControl};
use crate::coordinator::{PullTicket, SyncCoordinator, SyncView};
use crate::events::ChannelEvent;
use crate::metrics::SyncMetrics;
use crate::observer::ChangeEvent;
use crate::snapshot::{HttpSnapshotSource, SnapshotResponse, SnapshotSource};
use crate::store::ProjectionSnapshot;
use crate::supervisor::{SupervisorCommand, TimerId};
use crate::websocket::{drive_session, PushConnector, WsConnector};

/// Capacity of the change event broadcast.
const CHANGE_BUFFER: usize = 256;

/// Capacity of the handle command queue.
const COMMAND_BUFFER: usize = 64;

/// Delay before the quiet status check that follows a start.
const STATUS_AFTER_START: Duration = Duration::from_secs(2);

/// Delay before the quiet status check that follows a stop.
const STATUS_AFTER_STOP: Duration = Duration::from_secs(1);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("sync runtime has shut down")]
    Closed,

    #[error("worker control failed: {0}")]
    Control(#[from] FetchError),
}

/// Reply sent once a command's effects are published.
type Ack = oneshot::Sender<()>;

enum Command {
    Connect(Ack),
    Teardown(Ack),
    SortBy(SortColumn, oneshot::Sender<SortSpec>),
    SetSort(SortSpec, Ack),
    Refresh(Ack),
    ClearLogs(Ack),
    Control {
        worker: String,
        action: WorkerAction,
        reply: oneshot::Sender<Result<ControlResponse, FetchError>>,
    },
    Snapshot(oneshot::Sender<ProjectionSnapshot>),
    Shutdown,
}

enum Completion {
    Pull {
        ticket: PullTicket,
        result: Result<SnapshotResponse, FetchError>,
    },
    Control {
        worker: String,
        action: WorkerAction,
        result: Result<ControlResponse, FetchError>,
        quiet: bool,
        reply: Option<oneshot::Sender<Result<ControlResponse, FetchError>>>,
    },
}

/// Cloneable handle to a running sync runtime.
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<SyncView>,
    changes: broadcast::Sender<ChangeEvent>,
    metrics: Arc<SyncMetrics>,
}

impl SyncHandle {
    /// Start pulling and open the push channel.
    pub async fn connect(&self) -> Result<(), RuntimeError> {
        self.request(Command::Connect).await
    }

    /// Stop pulling, abandon the in-flight pull and close the push channel.
    pub async fn teardown(&self) -> Result<(), RuntimeError> {
        self.request(Command::Teardown).await
    }

    /// Sort by `column`; selecting the current column flips direction.
    pub async fn sort_by(&self, column: SortColumn) -> Result<SortSpec, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::SortBy(column, tx)).await?;
        rx.await.map_err(|_| RuntimeError::Closed)
    }

    pub async fn set_sort(&self, spec: SortSpec) -> Result<(), RuntimeError> {
        self.request(|ack| Command::SetSort(spec, ack)).await
    }

    /// Pull a snapshot now (ignored while one is in flight or inactive).
    pub async fn refresh(&self) -> Result<(), RuntimeError> {
        self.request(Command::Refresh).await
    }

    pub async fn clear_logs(&self) -> Result<(), RuntimeError> {
        self.request(Command::ClearLogs).await
    }

    /// Send a control action to a worker and wait for its response.
    pub async fn control(
        &self,
        worker: impl Into<String>,
        action: WorkerAction,
    ) -> Result<ControlResponse, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Control {
            worker: worker.into(),
            action,
            reply,
        })
        .await?;
        let result = rx.await.map_err(|_| RuntimeError::Closed)?;
        Ok(result?)
    }

    /// Checksummed copy of the current projection.
    pub async fn snapshot(&self) -> Result<ProjectionSnapshot, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx)).await?;
        rx.await.map_err(|_| RuntimeError::Closed)
    }

    /// Stop the runtime task. Pending I/O is aborted.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.send(Command::Shutdown).await
    }

    /// Latest published state.
    pub fn view(&self) -> SyncView {
        self.view.borrow().clone()
    }

    /// Receiver that is notified whenever a new view is published.
    pub fn watch(&self) -> watch::Receiver<SyncView> {
        self.view.clone()
    }

    /// Stream of change events from now on.
    pub fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    pub fn metrics(&self) -> &Arc<SyncMetrics> {
        &self.metrics
    }

    async fn send(&self, command: Command) -> Result<(), RuntimeError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RuntimeError::Closed)
    }

    /// Send a command and wait until its effects are published.
    async fn request(&self, command: impl FnOnce(Ack) -> Command) -> Result<(), RuntimeError> {
        let (ack, rx) = oneshot::channel();
        self.send(command(ack)).await?;
        rx.await.map_err(|_| RuntimeError::Closed)
    }
}

/// External collaborators of the runtime.
pub struct Collaborators {
    pub source: Arc<dyn SnapshotSource>,
    pub connector: Arc<dyn PushConnector>,
    pub control: Arc<dyn WorkerControl>,
}

impl Collaborators {
    /// HTTP snapshot source, WebSocket connector and HTTP worker control.
    pub fn http(config: &SyncConfig) -> Self {
        Self {
            source: Arc::new(HttpSnapshotSource::new(config.snapshot_url.clone())),
            connector: Arc::new(WsConnector::new(config.push_url.clone())),
            control: Arc::new(HttpWorkerControl::new(config.control_url.clone())),
        }
    }
}

/// The task that owns the coordinator.
pub struct SyncRuntime {
    config: SyncConfig,
    coordinator: SyncCoordinator,
    collaborators: Collaborators,

    commands: mpsc::Receiver<Command>,
    channel_tx: mpsc::UnboundedSender<ChannelEvent>,
    channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,

    view_tx: watch::Sender<SyncView>,
    dirty: Arc<AtomicBool>,

    /// Running only while pulls are active.
    pull_interval: Option<Interval>,
    pull_task: Option<JoinHandle<()>>,
    channel_task: Option<JoinHandle<()>>,
    backoff: Option<(TimerId, Pin<Box<Sleep>>)>,
}

impl SyncRuntime {
    /// Validate `config` and spawn a runtime talking to the real endpoints.
    pub fn spawn_http(config: SyncConfig) -> Result<SyncHandle, ConfigError> {
        config.validate()?;
        let collaborators = Collaborators::http(&config);
        Ok(Self::spawn(config, collaborators))
    }

    /// Spawn the runtime task on the current tokio runtime.
    pub fn spawn(config: SyncConfig, collaborators: Collaborators) -> SyncHandle {
        let metrics = Arc::new(SyncMetrics::new());
        let mut coordinator = SyncCoordinator::from_config(&config, Arc::clone(&metrics));

        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        let forward = changes.clone();
        coordinator.subscribe(Box::new(move |event| {
            // No receivers is fine.
            let _ = forward.send(event.clone());
        }));

        let dirty = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&dirty);
        coordinator.subscribe(Box::new(move |_| flag.store(true, Ordering::Relaxed)));

        let (view_tx, view_rx) = watch::channel(coordinator.view());
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        let runtime = SyncRuntime {
            config,
            coordinator,
            collaborators,
            commands: command_rx,
            channel_tx,
            channel_rx,
            completion_tx,
            completion_rx,
            view_tx,
            dirty,
            pull_interval: None,
            pull_task: None,
            channel_task: None,
            backoff: None,
        };
        tokio::spawn(runtime.run());

        SyncHandle {
            commands: command_tx,
            view: view_rx,
            changes,
            metrics,
        }
    }

    async fn run(mut self) {
        info!(
            pull_interval_ms = self.config.pull_interval.as_millis() as u64,
            "Sync runtime started"
        );

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Shutdown) | None => break,
                        Some(command) => self.handle_command(command),
                    }
                }
                Some(event) = self.channel_rx.recv() => {
                    let commands = self.coordinator.handle_channel_event(event, Utc::now());
                    self.execute(commands);
                }
                Some(completion) = self.completion_rx.recv() => {
                    self.handle_completion(completion);
                }
                _ = next_tick(&mut self.pull_interval) => {
                    self.start_pull();
                }
                timer = backoff_elapsed(&mut self.backoff) => {
                    self.backoff = None;
                    let commands = self.coordinator.on_timer_elapsed(timer, Utc::now());
                    self.execute(commands);
                }
            }
            self.publish();
        }

        self.abort_tasks();
        info!("Sync runtime stopped");
    }

    fn handle_command(&mut self, command: Command) {
        let now = Utc::now();
        // Not every user action emits a change event (e.g. pull activation).
        self.dirty.store(true, Ordering::Relaxed);
        let ack = match command {
            Command::Connect(ack) => {
                let commands = self.coordinator.connect(now);
                self.execute(commands);
                if self.pull_interval.is_none() {
                    // First tick completes at once: pull now, then every interval.
                    let mut interval = tokio::time::interval(self.config.pull_interval);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.pull_interval = Some(interval);
                }
                Some(ack)
            }
            Command::Teardown(ack) => {
                self.pull_interval = None;
                if let Some(task) = self.pull_task.take() {
                    task.abort();
                }
                let commands = self.coordinator.teardown(now);
                self.execute(commands);
                Some(ack)
            }
            Command::SortBy(column, reply) => {
                let spec = self.coordinator.sort_by(column);
                self.publish();
                let _ = reply.send(spec);
                None
            }
            Command::SetSort(spec, ack) => {
                self.coordinator.set_sort(spec);
                Some(ack)
            }
            Command::Refresh(ack) => {
                self.start_pull();
                Some(ack)
            }
            Command::ClearLogs(ack) => {
                self.coordinator.clear_logs(now);
                Some(ack)
            }
            Command::Control {
                worker,
                action,
                reply,
            } => {
                self.start_control(worker, action, Duration::ZERO, false, Some(reply));
                None
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.coordinator.snapshot(now));
                None
            }
            Command::Shutdown => None,
        };
        if let Some(ack) = ack {
            self.publish();
            let _ = ack.send(());
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        let now = Utc::now();
        match completion {
            Completion::Pull { ticket, result } => {
                // A superseded pull must not forget the live pull's task.
                if self.coordinator.pull_in_flight() == Some(ticket) {
                    self.pull_task = None;
                }
                let outcome = self.coordinator.complete_pull(ticket, result, now);
                debug!(request_id = %ticket.request_id, ?outcome, "Pull completed");
            }
            Completion::Control {
                worker,
                action,
                result,
                quiet,
                reply,
            } => {
                self.coordinator
                    .complete_control(&worker, action, &result, quiet, now);
                self.dirty.store(true, Ordering::Relaxed);

                let succeeded = matches!(&result, Ok(response) if response.success);
                if succeeded && !quiet {
                    match action {
                        WorkerAction::Start => {
                            self.start_control(worker, WorkerAction::Status, STATUS_AFTER_START, true, None)
                        }
                        WorkerAction::Stop => {
                            self.start_control(worker, WorkerAction::Status, STATUS_AFTER_STOP, true, None)
                        }
                        _ => {}
                    }
                }
                if let Some(reply) = reply {
                    self.publish();
                    let _ = reply.send(result);
                }
            }
        }
    }

    fn start_pull(&mut self) {
        let Some(ticket) = self.coordinator.begin_pull(Utc::now()) else {
            return;
        };

        let source = Arc::clone(&self.collaborators.source);
        let limit = self.config.snapshot_limit;
        let timeout = self.config.pull_timeout;
        let completions = self.completion_tx.clone();

        self.pull_task = Some(tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, source.fetch(limit)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout {
                    after_ms: timeout.as_millis() as u64,
                }),
            };
            let _ = completions.send(Completion::Pull { ticket, result });
        }));
    }

    fn start_control(
        &mut self,
        worker: String,
        action: WorkerAction,
        delay: Duration,
        quiet: bool,
        reply: Option<oneshot::Sender<Result<ControlResponse, FetchError>>>,
    ) {
        let control = Arc::clone(&self.collaborators.control);
        let completions = self.completion_tx.clone();

        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result = control.send(&worker, action).await;
            let _ = completions.send(Completion::Control {
                worker,
                action,
                result,
                quiet,
                reply,
            });
        });
    }

    fn execute(&mut self, commands: Vec<SupervisorCommand>) {
        for command in commands {
            match command {
                SupervisorCommand::OpenChannel { session } => {
                    if let Some(task) = self.channel_task.take() {
                        task.abort();
                    }
                    let connector = Arc::clone(&self.collaborators.connector);
                    let connect_timeout = self.config.connect_timeout;
                    let events = self.channel_tx.clone();
                    self.channel_task = Some(tokio::spawn(async move {
                        drive_session(connector.as_ref(), session, connect_timeout, events).await;
                    }));
                }
                SupervisorCommand::CloseChannel => {
                    if let Some(task) = self.channel_task.take() {
                        task.abort();
                    }
                }
                SupervisorCommand::ScheduleReconnect {
                    timer,
                    delay,
                    attempt,
                } => {
                    warn!(attempt, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
                    self.backoff = Some((timer, Box::pin(tokio::time::sleep(delay))));
                }
                SupervisorCommand::CancelReconnect { timer } => {
                    if matches!(&self.backoff, Some((pending, _)) if *pending == timer) {
                        self.backoff = None;
                    }
                }
            }
        }
    }

    fn publish(&mut self) {
        if self.dirty.swap(false, Ordering::Relaxed) {
            let view = self.coordinator.view();
            self.view_tx.send_replace(view);
        }
    }

    fn abort_tasks(&mut self) {
        self.pull_interval = None;
        if let Some(task) = self.pull_task.take() {
            task.abort();
        }
        if let Some(task) = self.channel_task.take() {
            task.abort();
        }
        self.backoff = None;
    }
}

/// Next tick of the pull interval; never resolves while pulls are off.
async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Resolves with the pending timer's id once it elapses; never resolves
/// while no timer is pending.
async fn backoff_elapsed(backoff: &mut Option<(TimerId, Pin<Box<Sleep>>)>) -> TimerId {
    match backoff {
        Some((timer, sleep)) => {
            sleep.as_mut().await;
            *timer
        }
        None => std::future::pending().await,
    }
}
