//! Types library for market data synchronization
//!
//! Core type definitions shared by the sync engine and the gateway: entries
//! and their wire records, sort specification, log records, connection
//! states and the error taxonomy.
//!
//! # Modules
//! - `ids`: Asset identity (`Symbol`)
//! - `numeric`: Lenient decimal decoding for feed values
//! - `time`: Timestamp decoding for feed values
//! - `entry`: `Entry` and its wire form `EntryRecord`
//! - `sort`: Sort columns, directions and comparator
//! - `log`: Event log records
//! - `connection`: Push channel connection states
//! - `errors`: Error taxonomy

pub mod connection;
pub mod entry;
pub mod errors;
pub mod ids;
pub mod log;
pub mod numeric;
pub mod sort;
pub mod time;
