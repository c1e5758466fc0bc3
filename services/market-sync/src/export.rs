//! Projection export
//!
//! Serializes a projection to CSV or JSON text for download.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use types::entry::Entry;

pub const CSV_HEADER: [&str; 15] = [
    "Rank",
    "Name",
    "Symbol",
    "Price (USD)",
    "24h Change (%)",
    "24h Change (USD)",
    "Market Cap",
    "24h Volume",
    "Circulating Supply",
    "Total Supply",
    "Max Supply",
    "ATH",
    "ATL",
    "Source",
    "Updated",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Json => "application/json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(ExportError::UnknownFormat(other.to_string())),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Nothing to export")]
    Empty,

    #[error("Unknown export format: {0}")]
    UnknownFormat(String),

    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Render entries as CSV, one row per entry in the given order.
pub fn to_csv(entries: &[Entry]) -> Result<String, ExportError> {
    if entries.is_empty() {
        return Err(ExportError::Empty);
    }

    let mut rows = Vec::with_capacity(entries.len() + 1);
    rows.push(CSV_HEADER.join(","));
    for entry in entries {
        let fields = [
            entry.rank.map(|r| r.to_string()).unwrap_or_default(),
            quote(&entry.name),
            escape(entry.symbol.as_str()),
            number(entry.price),
            number(entry.price_change_pct_24h),
            number(entry.price_change_abs_24h),
            number(entry.market_cap),
            number(entry.volume_24h),
            number(entry.circulating_supply),
            number(entry.total_supply),
            number(entry.max_supply),
            number(entry.ath),
            number(entry.atl),
            escape(&entry.source),
            entry.observed_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        ];
        rows.push(fields.join(","));
    }
    Ok(rows.join("\n"))
}

/// Render entries as a pretty-printed JSON array in wire form.
pub fn to_json(entries: &[Entry]) -> Result<String, ExportError> {
    if entries.is_empty() {
        return Err(ExportError::Empty);
    }
    Ok(serde_json::to_string_pretty(entries)?)
}

/// Render entries in `format`.
pub fn render(entries: &[Entry], format: ExportFormat) -> Result<String, ExportError> {
    match format {
        ExportFormat::Csv => to_csv(entries),
        ExportFormat::Json => to_json(entries),
    }
}

/// `market_data_YYYY-MM-DDTHH-MM-SS.{ext}`
pub fn export_filename(format: ExportFormat, now: DateTime<Utc>) -> String {
    format!(
        "market_data_{}.{}",
        now.format("%Y-%m-%dT%H-%M-%S"),
        format.extension()
    )
}

/// Render and write into `dir`, returning the written path.
pub fn write_to_dir(
    entries: &[Entry],
    format: ExportFormat,
    dir: &Path,
    now: DateTime<Utc>,
) -> Result<PathBuf, ExportError> {
    let body = render(entries, format)?;
    let path = dir.join(export_filename(format, now));
    std::fs::write(&path, body)?;
    Ok(path)
}

fn number(value: Option<Decimal>) -> String {
    value.map(|d| d.normalize().to_string()).unwrap_or_else(|| "0".to_string())
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        quote(field)
    } else {
        field.to_string()
    }
}
