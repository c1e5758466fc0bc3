//! Market entry types
//!
//! `Entry` is the normalized, validated form of one tracked asset.
//! `EntryRecord` is the loosely-typed form it arrives in from either the
//! snapshot endpoint or the push channel; `EntryRecord::into_entry` is the
//! single place where feed data is validated.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::RecordError;
use crate::ids::Symbol;
use crate::numeric::{parse_decimal, parse_rank};
use crate::time::parse_timestamp;

/// One tracked asset as held by the dataset store.
///
/// Serializes with the field names used on the wire so that exports and
/// API responses read the same as the feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Unique key, normalized upper-case.
    pub symbol: Symbol,
    /// Display name (may be empty).
    #[serde(default)]
    pub name: String,
    /// Market-cap rank, 1-based.
    pub rank: Option<u32>,
    /// Price in USD.
    #[serde(rename = "price_usd", with = "rust_decimal::serde::float_option", default)]
    pub price: Option<Decimal>,
    /// 24h price change in percent.
    #[serde(
        rename = "price_change_percentage_24h",
        with = "rust_decimal::serde::float_option",
        default
    )]
    pub price_change_pct_24h: Option<Decimal>,
    /// 24h price change in USD.
    #[serde(rename = "price_change_24h", with = "rust_decimal::serde::float_option", default)]
    pub price_change_abs_24h: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option", default)]
    pub market_cap: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option", default)]
    pub volume_24h: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option", default)]
    pub circulating_supply: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option", default)]
    pub total_supply: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option", default)]
    pub max_supply: Option<Decimal>,
    /// All-time high price.
    #[serde(with = "rust_decimal::serde::float_option", default)]
    pub ath: Option<Decimal>,
    /// All-time low price.
    #[serde(with = "rust_decimal::serde::float_option", default)]
    pub atl: Option<Decimal>,
    /// Tag of the feed that produced the datum.
    #[serde(default)]
    pub source: String,
    /// Time of the datum (not of its arrival).
    #[serde(rename = "timestamp")]
    pub observed_at: DateTime<Utc>,
}

impl Entry {
    /// Minimal entry with only identity and time set.
    pub fn new(symbol: Symbol, observed_at: DateTime<Utc>) -> Self {
        Self {
            symbol,
            name: String::new(),
            rank: None,
            price: None,
            price_change_pct_24h: None,
            price_change_abs_24h: None,
            market_cap: None,
            volume_24h: None,
            circulating_supply: None,
            total_supply: None,
            max_supply: None,
            ath: None,
            atl: None,
            source: String::new(),
            observed_at,
        }
    }

    /// Whether this datum may replace `stored` under the freshness rule.
    ///
    /// Equal timestamps are accepted so that a re-delivered datum with
    /// corrected fields still lands.
    pub fn is_fresher_or_equal(&self, stored: &Entry) -> bool {
        self.observed_at >= stored.observed_at
    }
}

/// An entry-like record as delivered by a feed.
///
/// Every field is kept as raw JSON; decoding is lenient per field and strict
/// only for identity (`symbol`) and time (`timestamp`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryRecord {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub rank: Option<Value>,
    #[serde(default)]
    pub price_usd: Option<Value>,
    #[serde(default)]
    pub price_change_percentage_24h: Option<Value>,
    #[serde(default)]
    pub price_change_24h: Option<Value>,
    #[serde(default)]
    pub market_cap: Option<Value>,
    #[serde(default)]
    pub volume_24h: Option<Value>,
    #[serde(default)]
    pub circulating_supply: Option<Value>,
    #[serde(default)]
    pub total_supply: Option<Value>,
    #[serde(default)]
    pub max_supply: Option<Value>,
    #[serde(default)]
    pub ath: Option<Value>,
    #[serde(default)]
    pub atl: Option<Value>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Value>,
}

impl EntryRecord {
    /// Validate and normalize into an `Entry`.
    ///
    /// `received_at` stands in for a missing timestamp.
    pub fn into_entry(self, received_at: DateTime<Utc>) -> Result<Entry, RecordError> {
        let symbol = Symbol::parse(self.symbol.as_deref().unwrap_or_default())?;
        let observed_at = parse_timestamp(self.timestamp.as_ref())?.unwrap_or(received_at);

        Ok(Entry {
            symbol,
            name: self.name.map(|n| n.trim().to_string()).unwrap_or_default(),
            rank: parse_rank(self.rank.as_ref()),
            price: parse_decimal(self.price_usd.as_ref()),
            price_change_pct_24h: parse_decimal(self.price_change_percentage_24h.as_ref()),
            price_change_abs_24h: parse_decimal(self.price_change_24h.as_ref()),
            market_cap: parse_decimal(self.market_cap.as_ref()),
            volume_24h: parse_decimal(self.volume_24h.as_ref()),
            circulating_supply: parse_decimal(self.circulating_supply.as_ref()),
            total_supply: parse_decimal(self.total_supply.as_ref()),
            max_supply: parse_decimal(self.max_supply.as_ref()),
            ath: parse_decimal(self.ath.as_ref()),
            atl: parse_decimal(self.atl.as_ref()),
            source: self.source.map(|s| s.trim().to_string()).unwrap_or_default(),
            observed_at,
        })
    }
}

impl From<&Entry> for EntryRecord {
    fn from(entry: &Entry) -> Self {
        let number = |d: Option<Decimal>| d.map(|d| Value::String(d.to_string()));
        Self {
            symbol: Some(entry.symbol.to_string()),
            name: Some(entry.name.clone()),
            rank: entry.rank.map(Value::from),
            price_usd: number(entry.price),
            price_change_percentage_24h: number(entry.price_change_pct_24h),
            price_change_24h: number(entry.price_change_abs_24h),
            market_cap: number(entry.market_cap),
            volume_24h: number(entry.volume_24h),
            circulating_supply: number(entry.circulating_supply),
            total_supply: number(entry.total_supply),
            max_supply: number(entry.max_supply),
            ath: number(entry.ath),
            atl: number(entry.atl),
            source: Some(entry.source.clone()),
            timestamp: Some(Value::String(entry.observed_at.to_rfc3339())),
        }
    }
}
