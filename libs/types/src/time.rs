//! Timestamp decoding for feed values
//!
//! `observed_at` is the time of the datum, not of arrival. Producers write it
//! as RFC 3339, as a naive ISO-8601 string without offset (taken as UTC), or
//! as integer epoch milliseconds.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use crate::errors::RecordError;

/// Naive layouts accepted after RFC 3339 fails, tried in order.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Decode a timestamp feed value.
///
/// Returns `Ok(None)` when the value is absent or `null`, so the caller can
/// substitute the arrival time.
pub fn parse_timestamp(value: Option<&Value>) -> Result<Option<DateTime<Utc>>, RecordError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => parse_timestamp_str(s).map(Some),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
            .map(Some)
            .ok_or_else(|| RecordError::InvalidTimestamp(n.to_string())),
        Some(other) => Err(RecordError::InvalidTimestamp(other.to_string())),
    }
}

/// Decode a timestamp string.
pub fn parse_timestamp_str(raw: &str) -> Result<DateTime<Utc>, RecordError> {
    let trimmed = raw.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| RecordError::InvalidTimestamp(raw.to_string()))
}
