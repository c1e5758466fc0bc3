//! Dual-channel scenarios for the sync coordinator
//!
//! Drives the synchronous core by hand: snapshot pulls and push deltas for
//! the same symbol in both orders, and a flapping push channel that
//! recovers after several failed attempts.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::json;

use market_sync::coordinator::{PullOutcome, SyncCoordinator};
use market_sync::events::{ChannelEvent, PushMessage};
use market_sync::metrics::SyncMetrics;
use market_sync::observer::ChangeEvent;
use market_sync::snapshot::SnapshotResponse;
use market_sync::supervisor::{ReconnectPolicy, SessionId, SupervisorCommand, TimerId};
use types::connection::ConnectionState;
use types::entry::EntryRecord;
use types::errors::ChannelError;
use types::ids::Symbol;
use types::log::Severity;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn btc(observed_ms: i64, price: i64) -> EntryRecord {
    serde_json::from_value(json!({
        "symbol": "BTC",
        "name": "Bitcoin",
        "rank": 1,
        "price_usd": price,
        "timestamp": observed_ms,
    }))
    .unwrap()
}

fn coordinator() -> SyncCoordinator {
    SyncCoordinator::new(ReconnectPolicy::default(), 1000, Arc::new(SyncMetrics::new()))
}

fn open_session(commands: &[SupervisorCommand]) -> SessionId {
    commands
        .iter()
        .find_map(|c| match c {
            SupervisorCommand::OpenChannel { session } => Some(*session),
            _ => None,
        })
        .expect("expected OpenChannel")
}

fn reconnect_timer(commands: &[SupervisorCommand]) -> (TimerId, Duration, u32) {
    commands
        .iter()
        .find_map(|c| match c {
            SupervisorCommand::ScheduleReconnect { timer, delay, attempt } => {
                Some((*timer, *delay, *attempt))
            }
            _ => None,
        })
        .expect("expected ScheduleReconnect")
}

fn connected_coordinator() -> (SyncCoordinator, SessionId) {
    let mut coord = coordinator();
    let session = open_session(&coord.connect(now()));
    coord.handle_channel_event(ChannelEvent::Connected { session }, now());
    (coord, session)
}

fn pull(coord: &mut SyncCoordinator, records: Vec<EntryRecord>) -> PullOutcome {
    let ticket = coord.begin_pull(now()).expect("pull should be allowed");
    coord.complete_pull(ticket, Ok(SnapshotResponse::ok(records)), now())
}

fn push(coord: &mut SyncCoordinator, session: SessionId, records: Vec<EntryRecord>) {
    coord.handle_channel_event(
        ChannelEvent::Message {
            session,
            message: PushMessage::DataUpdate(records),
        },
        now(),
    );
}

fn btc_price(coord: &SyncCoordinator) -> Option<Decimal> {
    coord.store().get(&Symbol::parse("BTC").unwrap()).and_then(|e| e.price)
}

#[test]
fn test_older_push_after_pull_is_dropped() {
    let (mut coord, session) = connected_coordinator();

    pull(&mut coord, vec![btc(100, 50_000)]);
    push(&mut coord, session, vec![btc(90, 40_000)]);

    assert_eq!(btc_price(&coord), Some(Decimal::from(50_000)));
    assert_eq!(coord.metrics().export()["stale_dropped"], 1);
    // Stale drops never reach the event log as errors.
    assert!(coord
        .log_snapshot()
        .iter()
        .all(|r| r.severity != Severity::Error));
}

#[test]
fn test_newer_push_after_pull_is_applied() {
    let (mut coord, session) = connected_coordinator();

    pull(&mut coord, vec![btc(100, 50_000)]);
    push(&mut coord, session, vec![btc(110, 51_000)]);

    assert_eq!(btc_price(&coord), Some(Decimal::from(51_000)));
}

#[test]
fn test_older_pull_after_push_does_not_roll_back() {
    let (mut coord, session) = connected_coordinator();

    push(&mut coord, session, vec![btc(110, 51_000)]);
    let outcome = pull(&mut coord, vec![btc(100, 50_000)]);

    assert!(matches!(outcome, PullOutcome::Applied(summary) if summary.stale == 1));
    assert_eq!(btc_price(&coord), Some(Decimal::from(51_000)));
}

#[test]
fn test_three_failures_then_recovery() {
    let (mut coord, mut session) = connected_coordinator();

    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    coord.subscribe(Box::new(move |event| {
        if let ChangeEvent::ConnectionChanged { to, .. } = event {
            sink.lock().unwrap().push(*to);
        }
    }));

    let drop = ChannelError::Dropped("transport close".to_string());
    let mut commands = coord.handle_channel_event(
        ChannelEvent::Disconnected {
            session,
            error: drop.clone(),
        },
        now(),
    );

    for expected_attempt in 1..=4u32 {
        let (timer, delay, attempt) = reconnect_timer(&commands);
        assert_eq!(attempt, expected_attempt);
        assert_eq!(delay, Duration::from_secs(expected_attempt as u64));

        session = open_session(&coord.on_timer_elapsed(timer, now()));
        if expected_attempt < 4 {
            commands = coord.handle_channel_event(
                ChannelEvent::Disconnected {
                    session,
                    error: ChannelError::ConnectFailed("refused".to_string()),
                },
                now(),
            );
        } else {
            coord.handle_channel_event(ChannelEvent::Connected { session }, now());
        }
    }

    use ConnectionState::*;
    let mut expected = vec![Disconnected, Reconnecting];
    for _ in 0..3 {
        expected.extend([Connecting, Disconnected, Reconnecting]);
    }
    expected.extend([Connecting, Connected]);

    assert_eq!(*states.lock().unwrap(), expected);
    assert_eq!(coord.connection_state(), Connected);
    assert_eq!(coord.supervisor().retry_count(), 0);
    assert_eq!(coord.metrics().export()["reconnect_attempts"], 4);
}

#[test]
fn test_exhaustion_logged_once() {
    let mut coord = SyncCoordinator::new(
        ReconnectPolicy {
            max_attempts: 1,
            ..ReconnectPolicy::default()
        },
        1000,
        Arc::new(SyncMetrics::new()),
    );
    let session = open_session(&coord.connect(now()));
    let commands = coord.handle_channel_event(
        ChannelEvent::Disconnected {
            session,
            error: ChannelError::ConnectFailed("refused".to_string()),
        },
        now(),
    );
    let (timer, _, _) = reconnect_timer(&commands);
    let session = open_session(&coord.on_timer_elapsed(timer, now()));
    let commands = coord.handle_channel_event(
        ChannelEvent::Disconnected {
            session,
            error: ChannelError::HandshakeTimeout { after_ms: 10_000 },
        },
        now(),
    );

    assert_eq!(coord.connection_state(), ConnectionState::Exhausted);
    assert!(!commands
        .iter()
        .any(|c| matches!(c, SupervisorCommand::ScheduleReconnect { .. })));
    let exhausted = coord
        .log_snapshot()
        .iter()
        .filter(|r| r.message.contains("exhausted"))
        .count();
    assert_eq!(exhausted, 1);

    // Pulls keep running while the push channel is exhausted.
    assert!(coord.begin_pull(now()).is_some());
}

#[test]
fn test_teardown_mid_backoff() {
    let (mut coord, session) = connected_coordinator();
    let commands = coord.handle_channel_event(
        ChannelEvent::Disconnected {
            session,
            error: ChannelError::Dropped("reset".to_string()),
        },
        now(),
    );
    let (timer, _, _) = reconnect_timer(&commands);

    let commands = coord.teardown(now());
    assert!(commands.contains(&SupervisorCommand::CancelReconnect { timer }));
    assert_eq!(coord.connection_state(), ConnectionState::Idle);

    assert!(coord.on_timer_elapsed(timer, now()).is_empty());
    assert_eq!(coord.connection_state(), ConnectionState::Idle);
    assert!(coord.begin_pull(now()).is_none());
}
