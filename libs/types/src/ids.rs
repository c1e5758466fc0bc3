//! Identity types for tracked assets
//!
//! An asset is identified by its ticker symbol. Feeds disagree on casing and
//! sometimes pad symbols with whitespace, so every symbol is normalized once
//! at construction and compared by its normalized form afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::RecordError;

/// Ticker symbol of a tracked asset (e.g. "BTC", "ETH")
///
/// Always trimmed and upper-cased, never empty. Ordering is lexicographic on
/// the normalized form, which keeps `BTreeMap<Symbol, _>` iteration stable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Normalize and validate a raw symbol
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, RecordError> {
        let normalized = raw.as_ref().trim().to_uppercase();
        if normalized.is_empty() {
            return Err(RecordError::MissingSymbol);
        }
        Ok(Self(normalized))
    }

    /// Get the normalized symbol string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Symbol {
    type Error = RecordError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_symbol_normalization() {
        let symbol = Symbol::parse("  btc ").unwrap();
        assert_eq!(symbol.as_str(), "BTC");
        assert_eq!(symbol, Symbol::parse("Btc").unwrap());
    }

    #[test]
    fn test_empty_symbol_rejected() {
        assert_eq!(Symbol::parse("   "), Err(RecordError::MissingSymbol));
        assert_eq!(Symbol::parse(""), Err(RecordError::MissingSymbol));
    }

    #[test]
    fn test_symbol_deserialize_rejects_empty() {
        let err = Symbol::try_from("  ".to_string()).unwrap_err();
        assert_eq!(err, RecordError::MissingSymbol);
    }

    #[test]
    fn test_symbol_serde() {
        let symbol: Symbol = serde_json::from_str("\"eth\"").unwrap();
        assert_eq!(symbol.as_str(), "ETH");
        assert_eq!(serde_json::to_string(&symbol).unwrap(), "\"ETH\"");
        assert!(serde_json::from_str::<Symbol>("\"  \"").is_err());
    }

    proptest! {
        #[test]
        fn prop_normalization_is_case_insensitive(raw in "[a-zA-Z0-9]{1,8}") {
            let lower = Symbol::parse(raw.to_lowercase()).unwrap();
            let upper = Symbol::parse(raw.to_uppercase()).unwrap();
            prop_assert_eq!(lower, upper);
        }
    }
}
