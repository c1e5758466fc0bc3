//! Sync engine configuration
//!
//! `SyncConfig::default()` carries the stock intervals and limits; deployments
//! override them through `MARKET_SYNC_*` environment variables.

use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::supervisor::ReconnectPolicy;

/// Configuration for the sync runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Base URL of the snapshot endpoint (`{base}/api/entries`).
    pub snapshot_url: String,
    /// Number of entries requested per pull.
    pub snapshot_limit: usize,
    /// Interval between snapshot pulls.
    pub pull_interval: Duration,
    /// A pull that takes longer fails with a timeout.
    pub pull_timeout: Duration,
    /// WebSocket URL of the push channel.
    pub push_url: String,
    /// A handshake that takes longer counts as a connect error.
    pub connect_timeout: Duration,
    /// Automatic reconnect attempts before the supervisor gives up.
    pub max_reconnect_attempts: u32,
    /// Attempt `n` waits `reconnect_base_delay * n`.
    pub reconnect_base_delay: Duration,
    /// Optional ceiling on the reconnect delay.
    pub reconnect_max_delay: Option<Duration>,
    /// Records kept by the event log.
    pub log_capacity: usize,
    /// Base URL of the worker control endpoints.
    pub control_url: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            snapshot_url: "http://127.0.0.1:5000".to_string(),
            snapshot_limit: 100,
            pull_interval: Duration::from_secs(30),
            pull_timeout: Duration::from_secs(10),
            push_url: "ws://127.0.0.1:5000/ws".to_string(),
            connect_timeout: Duration::from_secs(10),
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: None,
            log_capacity: 1000,
            control_url: "http://127.0.0.1:5000".to_string(),
        }
    }
}

/// Configuration validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} has unsupported scheme: {value}")]
    Scheme { field: &'static str, value: String },
}

impl SyncConfig {
    /// Build from `MARKET_SYNC_*` environment variables, falling back to the
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);
        let defaults = Self::default();

        let reconnect_max_delay = vars
            .u64("MARKET_SYNC_RECONNECT_MAX_DELAY_MS")
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        Self {
            snapshot_url: vars.string("MARKET_SYNC_SNAPSHOT_URL", &defaults.snapshot_url),
            snapshot_limit: vars
                .u64("MARKET_SYNC_SNAPSHOT_LIMIT")
                .map(|n| n as usize)
                .unwrap_or(defaults.snapshot_limit),
            pull_interval: vars.millis("MARKET_SYNC_PULL_INTERVAL_MS", defaults.pull_interval),
            pull_timeout: vars.millis("MARKET_SYNC_PULL_TIMEOUT_MS", defaults.pull_timeout),
            push_url: vars.string("MARKET_SYNC_PUSH_URL", &defaults.push_url),
            connect_timeout: vars.millis("MARKET_SYNC_CONNECT_TIMEOUT_MS", defaults.connect_timeout),
            max_reconnect_attempts: vars
                .u64("MARKET_SYNC_MAX_RECONNECT_ATTEMPTS")
                .map(|n| n.min(u32::MAX as u64) as u32)
                .unwrap_or(defaults.max_reconnect_attempts),
            reconnect_base_delay: vars.millis(
                "MARKET_SYNC_RECONNECT_BASE_DELAY_MS",
                defaults.reconnect_base_delay,
            ),
            reconnect_max_delay,
            log_capacity: vars
                .u64("MARKET_SYNC_LOG_CAPACITY")
                .map(|n| n as usize)
                .unwrap_or(defaults.log_capacity),
            control_url: vars.string("MARKET_SYNC_CONTROL_URL", &defaults.control_url),
        }
    }

    /// Check the values a runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url("snapshot_url", &self.snapshot_url, &["http://", "https://"])?;
        check_url("control_url", &self.control_url, &["http://", "https://"])?;
        check_url("push_url", &self.push_url, &["ws://", "wss://"])?;

        let nonzero = [
            ("snapshot_limit", self.snapshot_limit == 0),
            ("pull_interval", self.pull_interval.is_zero()),
            ("pull_timeout", self.pull_timeout.is_zero()),
            ("connect_timeout", self.connect_timeout.is_zero()),
            ("log_capacity", self.log_capacity == 0),
        ];
        for (field, is_zero) in nonzero {
            if is_zero {
                return Err(ConfigError::Zero { field });
            }
        }
        Ok(())
    }

    /// Reconnect policy derived from this configuration.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.max_reconnect_attempts,
            base_delay: self.reconnect_base_delay,
            max_delay: self.reconnect_max_delay,
        }
    }
}

fn check_url(field: &'static str, value: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Empty { field });
    }
    if !schemes.iter().any(|scheme| value.starts_with(scheme)) {
        return Err(ConfigError::Scheme {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn string(&self, name: &str, default: &str) -> String {
        self.raw(name).unwrap_or_else(|| default.to_string())
    }

    fn u64(&self, name: &str) -> Option<u64> {
        self.raw(name).and_then(|s| s.parse().ok())
    }

    fn millis(&self, name: &str, default: Duration) -> Duration {
        self.u64(name).map(Duration::from_millis).unwrap_or(default)
    }
}
