//! Market Sync Service
//!
//! Maintains a live, sorted view of a ranked market dataset fed by two
//! independent channels:
//! - Periodic snapshot pulls that replace the dataset wholesale
//! - Push deltas that upsert individual entries
//!
//! Both paths obey one freshness rule (an accepted datum is never reverted
//! by an older one), feed a bounded event log, and are driven by a single
//! task so that no mutation ever interleaves with another.
//!
//! # Architecture
//!
//! ```text
//!   HTTP snapshot        WebSocket push
//!        │                     │
//!   ┌────▼─────┐        ┌──────▼──────┐
//!   │ Snapshot │        │ Supervisor  │ ← reconnect backoff
//!   │ Source   │        │ + Connector │
//!   └────┬─────┘        └──────┬──────┘
//!        │                     │
//!   ┌────▼─────────────────────▼────┐
//!   │        SyncCoordinator        │
//!   └────┬─────────────────────┬────┘
//!        │                     │
//!   ┌────▼─────┐         ┌─────▼─────┐
//!   │ Dataset  │         │ LogBuffer │
//!   │ Store    │         └─────┬─────┘
//!   └────┬─────┘               │
//!        │                     │
//!   ┌────▼─────────────────────▼────┐
//!   │   SyncHandle (view/changes)   │
//!   └───────────────────────────────┘
//! ```

pub mod config;
pub mod control;
pub mod coordinator;
pub mod events;
pub mod export;
pub mod log_buffer;
pub mod metrics;
pub mod observer;
pub mod runtime;
pub mod snapshot;
pub mod store;
pub mod supervisor;
pub mod websocket;

pub use config::{ConfigError, SyncConfig};
pub use coordinator::{PullOutcome, PullTicket, SyncCoordinator, SyncView};
pub use observer::{ChangeEvent, SubscriptionId};
pub use runtime::{Collaborators, RuntimeError, SyncHandle, SyncRuntime};
pub use store::{ApplySummary, DatasetStore, ProjectionSnapshot};
pub use supervisor::{ConnectionSupervisor, ReconnectPolicy};

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
