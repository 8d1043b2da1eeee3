//! Durable sync state.
//!
//! One JSON document under a fixed key records which photos were uploaded
//! and their remote URLs. A small ledger of sync runs backs the `status`
//! command. Both live in a single SQLite database.

pub mod db;
pub mod error;
pub mod schema;
pub mod types;

pub use db::{SqliteSyncStore, SyncStateStore, RECORD_KEY};
pub use error::StateError;
pub use types::{StoredRecord, SyncRecord, SyncRunStats, SyncSummary};
