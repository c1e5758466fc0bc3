//! Push channel message definitions
//!
//! Frames on the push channel are JSON envelopes `{"event": name, "data":
//! payload}`. Two events carry meaning for the sync engine:
//!
//! - `data_update`: a batch of entry records to merge
//! - `log_event`: a log line produced by a worker process
//!
//! Every other event name is ignored. A frame that is not a valid envelope
//! is a protocol error and costs the channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use types::entry::EntryRecord;
use types::errors::ChannelError;
use types::log::{LogRecord, Severity};
use types::time::parse_timestamp;

use crate::supervisor::SessionId;

/// Decoded push channel message.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    /// Entry records to merge into the dataset.
    DataUpdate(Vec<EntryRecord>),
    /// A log line forwarded by the transport.
    LogEvent(LogEventPayload),
}

/// Payload of a `log_event`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogEventPayload {
    #[serde(default)]
    pub message: String,
    /// Severity label; workers name it `type`.
    #[serde(default, alias = "type")]
    pub severity: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Value>,
}

impl LogEventPayload {
    /// Convert to a log record. An unknown severity becomes `info`; a
    /// missing or unreadable timestamp becomes `received_at`.
    pub fn into_record(self, received_at: DateTime<Utc>) -> LogRecord {
        let severity = self
            .severity
            .as_deref()
            .map(Severity::from_label)
            .unwrap_or(Severity::Info);
        let timestamp = parse_timestamp(self.timestamp.as_ref())
            .ok()
            .flatten()
            .unwrap_or(received_at);
        LogRecord::new(timestamp, severity, self.message)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DataUpdatePayload {
    Wrapped { data: Vec<EntryRecord> },
    Bare(Vec<EntryRecord>),
}

/// Decode one text frame.
///
/// Returns `Ok(None)` for well-formed frames of events the engine does not
/// consume.
pub fn decode_frame(text: &str) -> Result<Option<PushMessage>, ChannelError> {
    let envelope: Envelope = serde_json::from_str(text)
        .map_err(|e| ChannelError::Protocol(format!("invalid frame: {}", e)))?;

    match envelope.event.as_str() {
        "data_update" | "crypto_update" => {
            let payload: DataUpdatePayload = serde_json::from_value(envelope.data)
                .map_err(|e| ChannelError::Protocol(format!("invalid data_update payload: {}", e)))?;
            let records = match payload {
                DataUpdatePayload::Wrapped { data } => data,
                DataUpdatePayload::Bare(data) => data,
            };
            Ok(Some(PushMessage::DataUpdate(records)))
        }
        "log_event" | "scraper_log" => {
            let payload: LogEventPayload = serde_json::from_value(envelope.data)
                .map_err(|e| ChannelError::Protocol(format!("invalid log_event payload: {}", e)))?;
            Ok(Some(PushMessage::LogEvent(payload)))
        }
        _ => Ok(None),
    }
}

/// Event emitted by a channel session task.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Handshake completed.
    Connected { session: SessionId },
    /// A decoded message arrived.
    Message {
        session: SessionId,
        message: PushMessage,
    },
    /// The session ended: connect error, handshake timeout, protocol
    /// error, close frame or end of stream.
    Disconnected {
        session: SessionId,
        error: ChannelError,
    },
}

impl ChannelEvent {
    pub fn session(&self) -> SessionId {
        match self {
            ChannelEvent::Connected { session }
            | ChannelEvent::Message { session, .. }
            | ChannelEvent::Disconnected { session, .. } => *session,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_decode_data_update() {
        let frame = r#"{"event":"data_update","data":{"data":[{"symbol":"btc","price_usd":50000}]}}"#;
        match decode_frame(frame).unwrap() {
            Some(PushMessage::DataUpdate(records)) => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].symbol.as_deref(), Some("btc"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_bare_list() {
        let frame = r#"{"event":"crypto_update","data":[{"symbol":"ETH"},{"symbol":"SOL"}]}"#;
        assert!(matches!(
            decode_frame(frame).unwrap(),
            Some(PushMessage::DataUpdate(records)) if records.len() == 2
        ));
    }

    #[test]
    fn test_decode_log_event_with_type_field() {
        let frame = r#"{"event":"log_event","data":{"message":"scrape done","type":"success"}}"#;
        let Some(PushMessage::LogEvent(payload)) = decode_frame(frame).unwrap() else {
            panic!("expected log event");
        };
        let received = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let record = payload.into_record(received);
        assert_eq!(record.severity, Severity::Success);
        assert_eq!(record.message, "scrape done");
        assert_eq!(record.timestamp, received);
    }

    #[test]
    fn test_unknown_severity_falls_back_to_info() {
        let payload = LogEventPayload {
            message: "careful".to_string(),
            severity: Some("warning".to_string()),
            timestamp: Some(Value::String("2024-01-01T10:00:00Z".to_string())),
        };
        let record = payload.into_record(Utc::now());
        assert_eq!(record.severity, Severity::Info);
        assert_eq!(record.timestamp, Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_unknown_event_ignored() {
        assert_eq!(decode_frame(r#"{"event":"heartbeat","data":{}}"#).unwrap(), None);
    }

    #[test]
    fn test_malformed_frame_is_protocol_error() {
        assert!(matches!(decode_frame("not json"), Err(ChannelError::Protocol(_))));
        assert!(matches!(
            decode_frame(r#"{"event":"data_update","data":42}"#),
            Err(ChannelError::Protocol(_))
        ));
    }
}
