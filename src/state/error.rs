//! Error types for the sync state store.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    /// Failed to open or create the database file.
    #[error("Failed to open state database at {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    #[error("State database migration failed: {0}")]
    Migration(#[from] rusqlite::Error),

    #[error("State database query failed: {0}")]
    Query(String),

    #[error("Failed to create state directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode sync record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to spawn blocking task: {0}")]
    Spawn(#[from] tokio::task::JoinError),

    #[error("State database schema version {found} is newer than supported version {expected}")]
    UnsupportedSchemaVersion { found: i32, expected: i32 },
}

impl StateError {
    pub fn query(source: rusqlite::Error) -> Self {
        Self::Query(source.to_string())
    }
}
