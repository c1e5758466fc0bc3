//! Error types for market data synchronization
//!
//! None of these are fatal: the worst outcome of any of them is a stale or
//! paused view. Each variant of `SyncError` maps to one handling policy:
//!
//! - `Fetch`: snapshot pull failed; logged, retried on the next cycle
//! - `Stale`: freshness check failed; dropped silently
//! - `Channel`: push transport failed; drives the connection supervisor
//! - `ExhaustedRetries`: automatic reconnects used up; waits for the user
//! - `Record`: a single feed record was unusable; skipped

use thiserror::Error;

/// Top-level synchronization error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("Snapshot fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Push channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Invalid record: {0}")]
    Record(#[from] RecordError),

    #[error("Stale update for {symbol}: observed {incoming}, stored {stored}")]
    Stale {
        symbol: String,
        incoming: String,
        stored: String,
    },

    #[error("Reconnect attempts exhausted after {attempts} tries")]
    ExhaustedRetries { attempts: u32 },
}

/// Snapshot pull errors (transient: the next cycle retries)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("Request timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Unexpected HTTP status {status}")]
    Status { status: u16 },

    #[error("Source rejected request: {0}")]
    Rejected(String),

    #[error("Malformed response: {0}")]
    Decode(String),
}

/// Push channel errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChannelError {
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Handshake timed out after {after_ms}ms")]
    HandshakeTimeout { after_ms: u64 },

    #[error("Channel dropped: {0}")]
    Dropped(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Per-record decoding errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("Record has no symbol")]
    MissingSymbol,

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_display() {
        let err = FetchError::Timeout { after_ms: 10_000 };
        assert_eq!(err.to_string(), "Request timed out after 10000ms");
    }

    #[test]
    fn test_sync_error_from_channel_error() {
        let channel_err = ChannelError::Dropped("transport close".to_string());
        let sync_err: SyncError = channel_err.into();
        assert!(matches!(sync_err, SyncError::Channel(_)));
        assert!(sync_err.to_string().contains("transport close"));
    }

    #[test]
    fn test_exhausted_display() {
        let err = SyncError::ExhaustedRetries { attempts: 5 };
        assert_eq!(err.to_string(), "Reconnect attempts exhausted after 5 tries");
    }
}
