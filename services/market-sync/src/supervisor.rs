//! Push channel connection supervisor
//!
//! A pure state machine: it performs no I/O and reads no clock. Every input
//! returns a [`SupervisorOutcome`] listing the state transitions taken, the
//! commands the runtime must execute (open/close the channel, schedule or
//! cancel a backoff timer) and the log records to append.
//!
//! ```text
//!  idle ──connect──► connecting ──handshake──► connected
//!   ▲                 ▲      │                    │
//!   │            timer│      │error          drop │
//!   │                 │      ▼                    ▼
//!   │            reconnecting ◄──(retries left)── disconnected
//!   │                                             │
//!   └──teardown (from any state)     (no retries) ▼
//!                                              exhausted
//! ```
//!
//! Sessions and timers carry ids. Events from an older session, and timers
//! other than the pending one, are ignored: a cancelled timer can never
//! fire a reconnect, and a late error from an abandoned channel can never
//! disturb the current one.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use types::connection::ConnectionState;
use types::errors::SyncError;
use types::log::LogRecord;

/// Identifies one channel attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

/// Identifies one scheduled backoff timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimerId(pub u64);

/// Linear reconnect backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Automatic attempts before giving up.
    pub max_attempts: u32,
    /// Delay unit; attempt `n` waits `base_delay * n`.
    pub base_delay: Duration,
    /// Optional ceiling on the delay. Uncapped by default.
    pub max_delay: Option<Duration>,
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.saturating_mul(attempt);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: None,
        }
    }
}

/// Work the runtime must carry out on the supervisor's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorCommand {
    /// Start a channel attempt tagged with `session`.
    OpenChannel { session: SessionId },
    /// Abort the current channel, if any.
    CloseChannel,
    /// Report `timer` elapsed after `delay`.
    ScheduleReconnect {
        timer: TimerId,
        delay: Duration,
        attempt: u32,
    },
    /// Drop `timer` without firing it.
    CancelReconnect { timer: TimerId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// Everything that follows from one supervisor input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupervisorOutcome {
    pub transitions: Vec<Transition>,
    pub commands: Vec<SupervisorCommand>,
    pub records: Vec<LogRecord>,
}

impl SupervisorOutcome {
    /// True when the input was ignored.
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty() && self.commands.is_empty() && self.records.is_empty()
    }
}

/// Owns the push channel's `ConnectionState`.
#[derive(Debug)]
pub struct ConnectionSupervisor {
    state: ConnectionState,
    policy: ReconnectPolicy,
    /// Consecutive failed attempts since the last successful handshake.
    retry_count: u32,
    next_session: u64,
    active_session: Option<SessionId>,
    next_timer: u64,
    pending_timer: Option<TimerId>,
}

impl ConnectionSupervisor {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Idle,
            policy,
            retry_count: 0,
            next_session: 0,
            active_session: None,
            next_timer: 0,
            pending_timer: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn active_session(&self) -> Option<SessionId> {
        self.active_session
    }

    pub fn pending_timer(&self) -> Option<TimerId> {
        self.pending_timer
    }

    /// Explicit connect request. Honoured from `idle` and `exhausted` only.
    pub fn connect(&mut self, now: DateTime<Utc>) -> SupervisorOutcome {
        let mut outcome = SupervisorOutcome::default();
        if !self.state.accepts_connect() {
            debug!(state = %self.state, "Connect request ignored");
            return outcome;
        }

        self.retry_count = 0;
        outcome
            .records
            .push(LogRecord::info(now, "Connecting to live updates"));
        self.open(&mut outcome);
        outcome
    }

    /// The handshake of `session` completed.
    pub fn on_connected(&mut self, session: SessionId, now: DateTime<Utc>) -> SupervisorOutcome {
        let mut outcome = SupervisorOutcome::default();
        if !self.is_current(session) || self.state != ConnectionState::Connecting {
            debug!(session = session.0, state = %self.state, "Ignoring handshake from stale session");
            return outcome;
        }

        self.retry_count = 0;
        self.transition(&mut outcome, ConnectionState::Connected);
        info!(session = session.0, "Push channel connected");
        outcome
            .records
            .push(LogRecord::success(now, "Connected to live updates"));
        outcome
    }

    /// `session` failed: connect error, handshake timeout, drop or
    /// protocol error. Failing while connecting counts the same as a drop.
    pub fn on_disconnected(
        &mut self,
        session: SessionId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> SupervisorOutcome {
        let mut outcome = SupervisorOutcome::default();
        let live = matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        );
        if !self.is_current(session) || !live {
            debug!(session = session.0, state = %self.state, "Ignoring disconnect from stale session");
            return outcome;
        }

        self.active_session = None;
        outcome.commands.push(SupervisorCommand::CloseChannel);
        self.transition(&mut outcome, ConnectionState::Disconnected);
        warn!(session = session.0, reason, "Push channel lost");
        outcome
            .records
            .push(LogRecord::error(now, format!("Disconnected from live updates: {}", reason)));

        if self.retry_count < self.policy.max_attempts {
            self.retry_count += 1;
            let attempt = self.retry_count;
            let delay = self.policy.delay_for(attempt);
            let timer = TimerId(self.next_timer);
            self.next_timer += 1;
            self.pending_timer = Some(timer);

            self.transition(&mut outcome, ConnectionState::Reconnecting);
            outcome.commands.push(SupervisorCommand::ScheduleReconnect {
                timer,
                delay,
                attempt,
            });
            outcome.records.push(LogRecord::info(
                now,
                format!(
                    "Reconnecting (attempt {}/{}) in {}ms",
                    attempt,
                    self.policy.max_attempts,
                    delay.as_millis()
                ),
            ));
        } else {
            let err = SyncError::ExhaustedRetries {
                attempts: self.retry_count,
            };
            self.transition(&mut outcome, ConnectionState::Exhausted);
            warn!(attempts = self.retry_count, "Giving up on push channel");
            outcome.records.push(LogRecord::error(
                now,
                format!("{}; connect manually to retry", err),
            ));
        }
        outcome
    }

    /// A backoff timer elapsed. Only the pending timer triggers an attempt.
    pub fn on_timer_elapsed(&mut self, timer: TimerId, _now: DateTime<Utc>) -> SupervisorOutcome {
        let mut outcome = SupervisorOutcome::default();
        if self.pending_timer != Some(timer) || self.state != ConnectionState::Reconnecting {
            debug!(timer = timer.0, "Ignoring stale reconnect timer");
            return outcome;
        }

        self.pending_timer = None;
        self.open(&mut outcome);
        outcome
    }

    /// Explicit teardown from any state: cancel the pending timer, close
    /// the channel and return to `idle`.
    pub fn teardown(&mut self, now: DateTime<Utc>) -> SupervisorOutcome {
        let mut outcome = SupervisorOutcome::default();

        if let Some(timer) = self.pending_timer.take() {
            outcome
                .commands
                .push(SupervisorCommand::CancelReconnect { timer });
        }
        if self.active_session.take().is_some() {
            outcome.commands.push(SupervisorCommand::CloseChannel);
        }
        self.retry_count = 0;

        if self.state != ConnectionState::Idle {
            self.transition(&mut outcome, ConnectionState::Idle);
            info!("Push channel torn down");
            outcome
                .records
                .push(LogRecord::info(now, "Live updates stopped"));
        }
        outcome
    }

    fn open(&mut self, outcome: &mut SupervisorOutcome) {
        let session = SessionId(self.next_session);
        self.next_session += 1;
        self.active_session = Some(session);
        self.transition(outcome, ConnectionState::Connecting);
        outcome
            .commands
            .push(SupervisorCommand::OpenChannel { session });
    }

    fn is_current(&self, session: SessionId) -> bool {
        self.active_session == Some(session)
    }

    fn transition(&mut self, outcome: &mut SupervisorOutcome, to: ConnectionState) {
        let from = self.state;
        self.state = to;
        outcome.transitions.push(Transition { from, to });
    }
}

impl Default for ConnectionSupervisor {
    fn default() -> Self {
        Self::new(ReconnectPolicy::default())
    }
}
