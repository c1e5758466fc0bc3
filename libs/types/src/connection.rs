//! Push channel connection states
//!
//! Owned by the connection supervisor; everything else only observes it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of the push channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not started, or torn down on request
    #[default]
    Idle,
    /// Handshake in progress
    Connecting,
    /// Channel open and delivering
    Connected,
    /// Channel lost; about to decide between retry and giving up
    Disconnected,
    /// Waiting out the backoff delay before the next attempt
    Reconnecting,
    /// Automatic retries used up; needs an explicit connect
    Exhausted,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Exhausted => "exhausted",
        }
    }

    /// Whether a channel is open or being worked on.
    pub fn is_active(self) -> bool {
        !matches!(self, ConnectionState::Idle | ConnectionState::Exhausted)
    }

    /// Whether an explicit connect request is honoured in this state.
    pub fn accepts_connect(self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
