//! Lenient numeric decoding for feed values
//!
//! Feeds deliver the same quantity as a JSON number, a formatted string
//! ("1,234.56", "$12"), scientific notation ("1e-8") or `null`. Everything is
//! decoded into `rust_decimal::Decimal`, which is always finite and totally
//! ordered. Anything that cannot be represented becomes `None` (missing);
//! a bad field never rejects a whole record.

use std::str::FromStr;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde_json::Value;

/// Smallest magnitude Decimal can hold (scale 28).
const DECIMAL_EPSILON: f64 = 1e-28;

/// Decode an optional numeric feed value.
pub fn parse_decimal(value: Option<&Value>) -> Option<Decimal> {
    match value? {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Decimal::from(i))
            } else if let Some(u) = n.as_u64() {
                Some(Decimal::from(u))
            } else {
                parse_decimal_str(&n.to_string())
            }
        }
        Value::String(s) => parse_decimal_str(s),
        _ => None,
    }
}

/// Decode a numeric string, tolerating thousands separators and a
/// leading currency sign.
pub fn parse_decimal_str(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != ',' && *c != '$')
        .collect();

    if cleaned.is_empty() || cleaned == "-" {
        return None;
    }

    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .ok()
        .or_else(|| from_float_text(&cleaned))
}

/// Last resort for values outside Decimal's scale: underflow rounds to
/// zero, overflow and non-finite values are missing.
fn from_float_text(cleaned: &str) -> Option<Decimal> {
    let value: f64 = cleaned.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    if value.abs() < DECIMAL_EPSILON {
        return Some(Decimal::ZERO);
    }
    Decimal::from_f64(value)
}

/// Decode a rank: a positive integer, possibly written as "#12" or "12.0".
pub fn parse_rank(value: Option<&Value>) -> Option<u32> {
    let decimal = match value? {
        Value::String(s) => parse_decimal_str(s.trim().trim_start_matches('#'))?,
        other => parse_decimal(Some(other))?,
    };

    if decimal.fract() != Decimal::ZERO || decimal <= Decimal::ZERO {
        return None;
    }
    decimal.to_u32()
}
