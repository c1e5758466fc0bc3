pub mod changes;
pub mod connection;
pub mod dataset;
pub mod logs;
pub mod workers;
