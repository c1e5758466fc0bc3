//! Sync coordinator
//!
//! Routes both update channels into one dataset and one event log:
//!
//! ```text
//!   snapshot pull ──► replace_all ─┐
//!                                  ├─► DatasetStore ──► projection ──► observers
//!   push delta ─────► merge_many ──┘
//!   push log event ─► LogBuffer ─────────────────────────────────────► observers
//!   channel events ─► ConnectionSupervisor ──► commands (returned to the caller)
//! ```
//!
//! The coordinator is synchronous: every handler takes `&mut self` and an
//! explicit `now`, runs to completion and returns. Timers, sockets and HTTP
//! belong to the runtime, which feeds results back in here. Pull results are
//! matched against the ticket that started them, so a response that arrives
//! after a teardown (or for a superseded pull) is discarded rather than
//! applied.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use types::connection::ConnectionState;
use types::entry::{Entry, EntryRecord};
use types::errors::{FetchError, SyncError};
use types::log::LogRecord;
use types::sort::{SortColumn, SortSpec};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::control::{ControlResponse, WorkerAction};
use crate::events::{ChannelEvent, PushMessage};
use crate::log_buffer::LogBuffer;
use crate::metrics::SyncMetrics;
use crate::observer::{ChangeEvent, Observer, Observers, SubscriptionId};
use crate::snapshot::SnapshotResponse;
use crate::store::{ApplySummary, DatasetStore, ProjectionSnapshot};
use crate::supervisor::{ConnectionSupervisor, ReconnectPolicy, SupervisorCommand, SupervisorOutcome, TimerId};

/// Identifies one snapshot pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullTicket {
    /// Pull generation at issue time; teardown starts a new generation.
    pub generation: u64,
    /// Correlation id for logs.
    pub request_id: Uuid,
    pub issued_at: DateTime<Utc>,
}

/// What became of a pull result.
#[derive(Debug, Clone, PartialEq)]
pub enum PullOutcome {
    Applied(ApplySummary),
    Failed(FetchError),
    /// The pull was abandoned before its result arrived.
    Discarded,
}

/// Read-side copy of everything a renderer needs.
#[derive(Debug, Clone)]
pub struct SyncView {
    pub revision: u64,
    pub projection: Arc<[Entry]>,
    pub sort: SortSpec,
    pub connection: ConnectionState,
    pub retry_count: u32,
    pub pulls_active: bool,
    pub logs: Vec<LogRecord>,
    /// Last known status per worker.
    pub workers: BTreeMap<String, ControlResponse>,
}

/// Owns the store, the log and the supervisor, and routes events to them.
pub struct SyncCoordinator {
    store: DatasetStore,
    logs: LogBuffer,
    supervisor: ConnectionSupervisor,
    observers: Observers,
    metrics: Arc<SyncMetrics>,
    workers: BTreeMap<String, ControlResponse>,
    pulls_active: bool,
    generation: u64,
    in_flight: Option<PullTicket>,
}

impl SyncCoordinator {
    pub fn new(policy: ReconnectPolicy, log_capacity: usize, metrics: Arc<SyncMetrics>) -> Self {
        Self {
            store: DatasetStore::new(),
            logs: LogBuffer::new(log_capacity),
            supervisor: ConnectionSupervisor::new(policy),
            observers: Observers::new(),
            metrics,
            workers: BTreeMap::new(),
            pulls_active: false,
            generation: 0,
            in_flight: None,
        }
    }

    pub fn from_config(config: &SyncConfig, metrics: Arc<SyncMetrics>) -> Self {
        Self::new(config.reconnect_policy(), config.log_capacity, metrics)
    }

    // ---- observers ----

    pub fn subscribe(&mut self, observer: Observer) -> SubscriptionId {
        self.observers.subscribe(observer)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    // ---- lifecycle ----

    /// Start pulling and request the push channel.
    pub fn connect(&mut self, now: DateTime<Utc>) -> Vec<SupervisorCommand> {
        self.pulls_active = true;
        let outcome = self.supervisor.connect(now);
        self.apply_outcome(outcome)
    }

    /// Stop pulling, abandon the in-flight pull and tear the channel down.
    pub fn teardown(&mut self, now: DateTime<Utc>) -> Vec<SupervisorCommand> {
        self.pulls_active = false;
        self.generation += 1;
        if let Some(ticket) = self.in_flight.take() {
            debug!(request_id = %ticket.request_id, "Abandoning in-flight pull");
        }
        let outcome = self.supervisor.teardown(now);
        self.apply_outcome(outcome)
    }

    pub fn pulls_active(&self) -> bool {
        self.pulls_active
    }

    // ---- pull path ----

    /// Issue a ticket for a new pull. `None` while inactive or while another
    /// pull is in flight.
    pub fn begin_pull(&mut self, now: DateTime<Utc>) -> Option<PullTicket> {
        if !self.pulls_active || self.in_flight.is_some() {
            return None;
        }
        let ticket = PullTicket {
            generation: self.generation,
            request_id: Uuid::now_v7(),
            issued_at: now,
        };
        self.in_flight = Some(ticket);
        self.metrics.record_pull_started();
        debug!(request_id = %ticket.request_id, generation = ticket.generation, "Pull started");
        Some(ticket)
    }

    pub fn pull_in_flight(&self) -> Option<PullTicket> {
        self.in_flight
    }

    /// Feed back the result of the pull started with `ticket`.
    pub fn complete_pull(
        &mut self,
        ticket: PullTicket,
        result: Result<SnapshotResponse, FetchError>,
        now: DateTime<Utc>,
    ) -> PullOutcome {
        if self.in_flight != Some(ticket) || ticket.generation != self.generation {
            debug!(request_id = %ticket.request_id, "Discarding late pull result");
            self.metrics.record_pull_discarded();
            return PullOutcome::Discarded;
        }
        self.in_flight = None;

        match result.and_then(SnapshotResponse::into_records) {
            Ok(records) => {
                let latency_ms = (now - ticket.issued_at).num_milliseconds().max(0) as u64;
                self.metrics.record_pull_succeeded(latency_ms);

                let entries = self.decode(records, now);
                let summary = self.store.replace_all(entries);
                self.metrics.record_applied(summary.accepted(), summary.stale);
                info!(
                    request_id = %ticket.request_id,
                    entries = self.store.len(),
                    latency_ms,
                    "Snapshot applied"
                );
                self.notify_dataset(summary);
                PullOutcome::Applied(summary)
            }
            Err(err) => {
                self.metrics.record_pull_failed();
                warn!(request_id = %ticket.request_id, %err, "Snapshot pull failed");
                let message = SyncError::from(err.clone()).to_string();
                self.append_log(LogRecord::error(now, message));
                PullOutcome::Failed(err)
            }
        }
    }

    // ---- push path ----

    /// Route one event of a channel session.
    pub fn handle_channel_event(
        &mut self,
        event: ChannelEvent,
        now: DateTime<Utc>,
    ) -> Vec<SupervisorCommand> {
        match event {
            ChannelEvent::Connected { session } => {
                let outcome = self.supervisor.on_connected(session, now);
                self.apply_outcome(outcome)
            }
            ChannelEvent::Message { session, message } => {
                let live = self.supervisor.active_session() == Some(session)
                    && self.supervisor.state() == ConnectionState::Connected;
                if !live {
                    debug!(session = session.0, "Dropping message from inactive session");
                    return Vec::new();
                }
                self.metrics.record_push_message();
                self.apply_push(message, now);
                Vec::new()
            }
            ChannelEvent::Disconnected { session, error } => {
                let outcome = self.supervisor.on_disconnected(session, &error.to_string(), now);
                self.apply_outcome(outcome)
            }
        }
    }

    /// A backoff timer elapsed.
    pub fn on_timer_elapsed(&mut self, timer: TimerId, now: DateTime<Utc>) -> Vec<SupervisorCommand> {
        let outcome = self.supervisor.on_timer_elapsed(timer, now);
        self.apply_outcome(outcome)
    }

    /// Merge pushed entries under the freshness rule.
    pub fn merge_records(&mut self, records: Vec<EntryRecord>, now: DateTime<Utc>) -> ApplySummary {
        let entries = self.decode(records, now);
        let summary = self.store.merge_many(entries);
        self.metrics.record_applied(summary.accepted(), summary.stale);
        self.notify_dataset(summary);
        summary
    }

    fn apply_push(&mut self, message: PushMessage, now: DateTime<Utc>) {
        match message {
            PushMessage::DataUpdate(records) => {
                let summary = self.merge_records(records, now);
                debug!(
                    accepted = summary.accepted(),
                    stale = summary.stale,
                    "Push delta merged"
                );
            }
            PushMessage::LogEvent(payload) => {
                self.append_log(payload.into_record(now));
            }
        }
    }

    // ---- user actions ----

    /// Sort by `column`, flipping direction when it is already selected.
    pub fn sort_by(&mut self, column: SortColumn) -> SortSpec {
        let before = self.store.sort_spec();
        let spec = self.store.set_sort(column, true);
        if spec != before {
            self.observers.notify(&ChangeEvent::SortChanged(spec));
        }
        spec
    }

    /// Replace the sort spec outright.
    pub fn set_sort(&mut self, spec: SortSpec) {
        if self.store.set_sort_spec(spec) {
            self.observers.notify(&ChangeEvent::SortChanged(spec));
        }
    }

    pub fn clear_logs(&mut self, now: DateTime<Utc>) {
        self.logs.clear(now);
        self.observers.notify(&ChangeEvent::LogCleared);
    }

    /// Append a record to the event log and notify observers.
    pub fn append_log(&mut self, record: LogRecord) {
        if self.logs.append(record.clone()).is_some() {
            self.metrics.record_log_evicted();
        }
        self.observers.notify(&ChangeEvent::LogAppended(record));
    }

    /// Record the result of a worker control call.
    ///
    /// Quiet status refreshes only update the stored worker status.
    pub fn complete_control(
        &mut self,
        worker: &str,
        action: WorkerAction,
        result: &Result<ControlResponse, FetchError>,
        quiet: bool,
        now: DateTime<Utc>,
    ) {
        let record = match result {
            Ok(response) => {
                if action == WorkerAction::Status && response.success {
                    self.workers.insert(worker.to_string(), response.clone());
                }
                let line = response.describe(worker, action);
                if response.success {
                    LogRecord::success(now, line)
                } else {
                    LogRecord::error(now, line)
                }
            }
            Err(err) => LogRecord::error(now, format!("{} {} failed: {}", worker, action, err)),
        };
        if !quiet {
            self.append_log(record);
        }
    }

    // ---- read side ----

    pub fn projection(&self) -> Arc<[Entry]> {
        self.store.projection()
    }

    pub fn log_snapshot(&self) -> Vec<LogRecord> {
        self.logs.snapshot()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    pub fn sort_spec(&self) -> SortSpec {
        self.store.sort_spec()
    }

    pub fn revision(&self) -> u64 {
        self.store.revision()
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }

    pub fn logs(&self) -> &LogBuffer {
        &self.logs
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor {
        &self.supervisor
    }

    pub fn metrics(&self) -> &Arc<SyncMetrics> {
        &self.metrics
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> ProjectionSnapshot {
        self.store.snapshot(now)
    }

    pub fn view(&self) -> SyncView {
        SyncView {
            revision: self.store.revision(),
            projection: self.store.projection(),
            sort: self.store.sort_spec(),
            connection: self.supervisor.state(),
            retry_count: self.supervisor.retry_count(),
            pulls_active: self.pulls_active,
            logs: self.logs.snapshot(),
            workers: self.workers.clone(),
        }
    }

    // ---- internals ----

    fn decode(&self, records: Vec<EntryRecord>, now: DateTime<Utc>) -> Vec<Entry> {
        let mut rejected = 0;
        let entries = records
            .into_iter()
            .filter_map(|record| match record.into_entry(now) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!(%err, "Rejected feed record");
                    rejected += 1;
                    None
                }
            })
            .collect();
        if rejected > 0 {
            self.metrics.record_rejected(rejected);
        }
        entries
    }

    fn notify_dataset(&mut self, summary: ApplySummary) {
        if summary.changed {
            let event = ChangeEvent::DatasetChanged {
                revision: self.store.revision(),
                summary,
            };
            self.observers.notify(&event);
        }
    }

    fn apply_outcome(&mut self, outcome: SupervisorOutcome) -> Vec<SupervisorCommand> {
        let SupervisorOutcome {
            transitions,
            commands,
            records,
        } = outcome;

        for transition in transitions {
            self.observers.notify(&ChangeEvent::ConnectionChanged {
                from: transition.from,
                to: transition.to,
            });
        }
        for record in records {
            self.append_log(record);
        }
        for command in &commands {
            if matches!(command, SupervisorCommand::ScheduleReconnect { .. }) {
                self.metrics.record_reconnect_attempt();
            }
        }
        commands
    }
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("entries", &self.store.len())
            .field("revision", &self.store.revision())
            .field("connection", &self.supervisor.state())
            .field("pulls_active", &self.pulls_active)
            .field("observers", &self.observers)
            .finish()
    }
}
