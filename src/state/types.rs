//! Types for the state tracking module.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The durable record of which photos have been uploaded, and where to.
///
/// Holds an identifier → remote URL map plus the insertion-ordered list of
/// synced identifiers. The two halves always describe the same set of
/// identifiers: the only mutator inserts both together, and records rebuilt
/// from storage drop identifiers present in just one half.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRecord {
    photos: Vec<String>,
    urls: HashMap<String, String>,
}

impl SyncRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful upload. Re-inserting an identifier replaces its
    /// URL and keeps its original position.
    pub fn insert(&mut self, id: &str, url: &str) {
        if self
            .urls
            .insert(id.to_string(), url.to_string())
            .is_none()
        {
            self.photos.push(id.to_string());
        }
    }

    /// Whether `id` is in the synced set.
    pub fn is_synced(&self, id: &str) -> bool {
        self.urls.contains_key(id)
    }

    pub fn url(&self, id: &str) -> Option<&str> {
        self.urls.get(id).map(String::as_str)
    }

    /// Synced identifiers in the order they were uploaded.
    pub fn synced_ids(&self) -> &[String] {
        &self.photos
    }

    pub fn urls(&self) -> &HashMap<String, String> {
        &self.urls
    }

    pub fn len(&self) -> usize {
        self.photos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.photos.is_empty()
    }

    /// Rebuild a record from its stored form, dropping identifiers that
    /// appear in only one half of the document.
    pub fn from_stored(stored: StoredRecord) -> Self {
        let StoredRecord { photos, mut urls } = stored;
        let mut record = Self::new();
        let mut seen = HashSet::new();
        let mut missing_url = 0usize;

        for id in photos {
            if !seen.insert(id.clone()) {
                continue;
            }
            match urls.remove(&id) {
                Some(url) => record.insert(&id, &url),
                None => missing_url += 1,
            }
        }

        if missing_url > 0 || !urls.is_empty() {
            tracing::warn!(
                missing_url,
                missing_id = urls.len(),
                "Stored sync record was inconsistent, dropped unpaired entries"
            );
        }

        record
    }

    pub fn to_stored(&self) -> StoredRecord {
        StoredRecord {
            photos: self.photos.clone(),
            urls: self
                .urls
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

/// Serialized form: `{ "photos": [...], "urls": { id: url } }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    #[serde(default)]
    pub photos: Vec<String>,
    #[serde(default)]
    pub urls: BTreeMap<String, String>,
}

/// Statistics for a single sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRunStats {
    /// Photos in the listing handed to the engine.
    pub photos_seen: u64,
    /// Photos uploaded during this run.
    pub photos_uploaded: u64,
    /// Photos skipped because they were already synced.
    pub photos_skipped: u64,
    /// Photos still failed at the end of the run.
    pub photos_failed: u64,
    /// Whether the run was cut short by a shutdown signal.
    pub interrupted: bool,
}

/// Summary of the state database.
#[derive(Debug, Clone)]
pub struct SyncSummary {
    /// Number of photos in the stored record.
    pub synced: u64,
    pub last_sync_started: Option<DateTime<Utc>>,
    pub last_sync_completed: Option<DateTime<Utc>>,
    /// Statistics of the most recent completed run.
    pub last_run: Option<SyncRunStats>,
}
