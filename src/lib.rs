//! photosync: mirror a local photo library to a remote upload endpoint.
//!
//! The [`sync::SyncEngine`] decides which photos still need uploading,
//! turns each into a bounded JPEG, uploads it with progress reporting, and
//! records the resulting URL in a SQLite-backed sync record so later runs
//! skip it.

#![warn(clippy::all)]

pub mod cli;
pub mod config;
pub mod library;
pub mod retry;
pub mod shutdown;
pub mod state;
pub mod sync;
pub mod transform;
pub mod types;
pub mod upload;
