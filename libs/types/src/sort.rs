//! Sort specification for the dataset projection
//!
//! The sort spec is only ever changed by an explicit user action. Choosing
//! the current column again flips the direction; choosing another column
//! starts over in ascending order.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::entry::Entry;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[serde(alias = "asc")]
    Ascending,
    #[serde(alias = "desc")]
    Descending,
}

impl SortDirection {
    /// The other direction
    pub fn flipped(self) -> Self {
        match self {
            SortDirection::Ascending => SortDirection::Descending,
            SortDirection::Descending => SortDirection::Ascending,
        }
    }

    /// Orient an ascending comparison result.
    pub fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    }
}

/// How a column's values compare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Numeric,
    Text,
    Time,
}

/// A sortable column of the projection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SortColumn {
    Rank,
    Symbol,
    Name,
    Price,
    PriceChangePct24h,
    PriceChangeAbs24h,
    MarketCap,
    Volume24h,
    CirculatingSupply,
    TotalSupply,
    MaxSupply,
    Ath,
    Atl,
    Source,
    ObservedAt,
}

impl SortColumn {
    /// Every column, in display order
    pub const ALL: [SortColumn; 15] = [
        SortColumn::Rank,
        SortColumn::Symbol,
        SortColumn::Name,
        SortColumn::Price,
        SortColumn::PriceChangePct24h,
        SortColumn::PriceChangeAbs24h,
        SortColumn::MarketCap,
        SortColumn::Volume24h,
        SortColumn::CirculatingSupply,
        SortColumn::TotalSupply,
        SortColumn::MaxSupply,
        SortColumn::Ath,
        SortColumn::Atl,
        SortColumn::Source,
        SortColumn::ObservedAt,
    ];

    /// Wire key of the column (matches the entry field name on the wire)
    pub fn key(self) -> &'static str {
        match self {
            SortColumn::Rank => "rank",
            SortColumn::Symbol => "symbol",
            SortColumn::Name => "name",
            SortColumn::Price => "price_usd",
            SortColumn::PriceChangePct24h => "price_change_percentage_24h",
            SortColumn::PriceChangeAbs24h => "price_change_24h",
            SortColumn::MarketCap => "market_cap",
            SortColumn::Volume24h => "volume_24h",
            SortColumn::CirculatingSupply => "circulating_supply",
            SortColumn::TotalSupply => "total_supply",
            SortColumn::MaxSupply => "max_supply",
            SortColumn::Ath => "ath",
            SortColumn::Atl => "atl",
            SortColumn::Source => "source",
            SortColumn::ObservedAt => "timestamp",
        }
    }

    pub fn kind(self) -> ColumnKind {
        match self {
            SortColumn::Symbol | SortColumn::Name | SortColumn::Source => ColumnKind::Text,
            SortColumn::ObservedAt => ColumnKind::Time,
            _ => ColumnKind::Numeric,
        }
    }

    /// Extract this column's sort key from an entry.
    pub fn value(self, entry: &Entry) -> SortKey<'_> {
        match self {
            SortColumn::Rank => SortKey::Number(entry.rank.map(Decimal::from)),
            SortColumn::Symbol => SortKey::Text(Some(entry.symbol.as_str())),
            SortColumn::Name => SortKey::Text(non_empty(&entry.name)),
            SortColumn::Price => SortKey::Number(entry.price),
            SortColumn::PriceChangePct24h => SortKey::Number(entry.price_change_pct_24h),
            SortColumn::PriceChangeAbs24h => SortKey::Number(entry.price_change_abs_24h),
            SortColumn::MarketCap => SortKey::Number(entry.market_cap),
            SortColumn::Volume24h => SortKey::Number(entry.volume_24h),
            SortColumn::CirculatingSupply => SortKey::Number(entry.circulating_supply),
            SortColumn::TotalSupply => SortKey::Number(entry.total_supply),
            SortColumn::MaxSupply => SortKey::Number(entry.max_supply),
            SortColumn::Ath => SortKey::Number(entry.ath),
            SortColumn::Atl => SortKey::Number(entry.atl),
            SortColumn::Source => SortKey::Text(non_empty(&entry.source)),
            SortColumn::ObservedAt => SortKey::Time(entry.observed_at),
        }
    }
}

impl FromStr for SortColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        SortColumn::ALL
            .iter()
            .copied()
            .find(|c| c.key() == wanted)
            .or(match wanted.as_str() {
                "price" => Some(SortColumn::Price),
                "observed_at" => Some(SortColumn::ObservedAt),
                _ => None,
            })
            .ok_or_else(|| format!("unknown sort column: {}", s))
    }
}

impl TryFrom<String> for SortColumn {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SortColumn> for String {
    fn from(column: SortColumn) -> Self {
        column.key().to_string()
    }
}

impl fmt::Display for SortColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// A column's value in an entry, ready for comparison
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SortKey<'a> {
    Number(Option<Decimal>),
    Text(Option<&'a str>),
    Time(DateTime<Utc>),
}

/// Collation for text columns: case-insensitive first, raw string as tiebreak.
pub fn collate(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// Compare two keys under a direction. Missing values sort after all
/// present values in both directions.
fn compare_keys(a: SortKey<'_>, b: SortKey<'_>, direction: SortDirection) -> Ordering {
    fn nulls_last<T>(a: Option<T>, b: Option<T>, direction: SortDirection, cmp: impl Fn(&T, &T) -> Ordering) -> Ordering {
        match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(x), Some(y)) => direction.apply(cmp(&x, &y)),
        }
    }

    match (a, b) {
        (SortKey::Number(x), SortKey::Number(y)) => nulls_last(x, y, direction, |x, y| x.cmp(y)),
        (SortKey::Text(x), SortKey::Text(y)) => nulls_last(x, y, direction, |x, y| collate(x, y)),
        (SortKey::Time(x), SortKey::Time(y)) => direction.apply(x.cmp(&y)),
        // Keys of one column always share a variant.
        _ => Ordering::Equal,
    }
}

/// Column and direction of the projection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub column: SortColumn,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn new(column: SortColumn, direction: SortDirection) -> Self {
        Self { column, direction }
    }

    /// Select a column.
    ///
    /// A different column always starts ascending. The same column flips
    /// direction when `toggle` is set and is left unchanged otherwise.
    pub fn select(&mut self, column: SortColumn, toggle: bool) {
        if self.column == column {
            if toggle {
                self.direction = self.direction.flipped();
            }
        } else {
            self.column = column;
            self.direction = SortDirection::Ascending;
        }
    }

    /// Compare two entries on this spec's column (no tiebreak).
    pub fn compare(&self, a: &Entry, b: &Entry) -> Ordering {
        compare_keys(self.column.value(a), self.column.value(b), self.direction)
    }
}

impl Default for SortSpec {
    fn default() -> Self {
        Self::new(SortColumn::Rank, SortDirection::Ascending)
    }
}
