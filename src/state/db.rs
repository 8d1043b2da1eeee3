//! Sync state store trait and SQLite implementation.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};

use super::error::StateError;
use super::schema;
use super::types::{StoredRecord, SyncRecord, SyncRunStats, SyncSummary};

/// Fixed namespace of the one stored sync record.
pub const RECORD_KEY: &str = "uploaded_photos";

/// Durable home of the [`SyncRecord`].
///
/// Object safe so the engine can hold an `Arc<dyn SyncStateStore>`.
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    /// Read the stored record. A missing or unreadable record yields an
    /// empty one; the failure is logged, never returned.
    async fn load(&self) -> SyncRecord;

    /// Replace the stored record as a single unit. On failure the previous
    /// value is left untouched.
    async fn save(&self, record: &SyncRecord) -> Result<(), StateError>;
}

/// SQLite implementation of the sync state store.
pub struct SqliteSyncStore {
    /// rusqlite::Connection is not Sync.
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteSyncStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSyncStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteSyncStore {
    /// Open or create a database at the given path.
    pub async fn open(path: &Path) -> Result<Self, StateError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path_clone).map_err(|e| StateError::Open {
                path: path_clone.clone(),
                source: e,
            })?;

            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(StateError::Migration)?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(StateError::Migration)?;

            schema::migrate(&conn)?;

            Ok::<_, StateError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Open an in-memory database (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory().map_err(|e| StateError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StateError> {
        self.conn
            .lock()
            .map_err(|e| StateError::Query(e.to_string()))
    }

    fn read_document(&self) -> Result<Option<String>, StateError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT value FROM kv_store WHERE key = ?1",
            [RECORD_KEY],
            |row| row.get(0),
        )
        .optional()
        .map_err(StateError::query)
    }

    /// Delete the stored record. Returns whether one existed.
    pub async fn clear(&self) -> Result<bool, StateError> {
        let conn = self.lock()?;
        let deleted = conn
            .execute("DELETE FROM kv_store WHERE key = ?1", [RECORD_KEY])
            .map_err(StateError::query)?;
        Ok(deleted > 0)
    }

    /// Start a new sync run and return its ID.
    pub async fn start_sync_run(&self) -> Result<i64, StateError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sync_runs (started_at) VALUES (?1)",
            [Utc::now().timestamp()],
        )
        .map_err(StateError::query)?;
        Ok(conn.last_insert_rowid())
    }

    /// Complete a sync run with statistics.
    pub async fn complete_sync_run(
        &self,
        run_id: i64,
        stats: &SyncRunStats,
    ) -> Result<(), StateError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            UPDATE sync_runs SET
                completed_at = ?1,
                photos_seen = ?2,
                photos_uploaded = ?3,
                photos_skipped = ?4,
                photos_failed = ?5,
                interrupted = ?6
            WHERE id = ?7
            "#,
            rusqlite::params![
                Utc::now().timestamp(),
                stats.photos_seen as i64,
                stats.photos_uploaded as i64,
                stats.photos_skipped as i64,
                stats.photos_failed as i64,
                stats.interrupted,
                run_id,
            ],
        )
        .map_err(StateError::query)?;
        Ok(())
    }

    pub async fn summary(&self) -> Result<SyncSummary, StateError> {
        let synced = self.load().await.len() as u64;

        let conn = self.lock()?;
        let last_sync_started: Option<i64> = conn
            .query_row("SELECT MAX(started_at) FROM sync_runs", [], |row| row.get(0))
            .map_err(StateError::query)?;

        let last_run: Option<(i64, SyncRunStats)> = conn
            .query_row(
                r#"
                SELECT completed_at, photos_seen, photos_uploaded, photos_skipped, photos_failed, interrupted
                FROM sync_runs WHERE completed_at IS NOT NULL
                ORDER BY id DESC LIMIT 1
                "#,
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        SyncRunStats {
                            photos_seen: row.get::<_, i64>(1)? as u64,
                            photos_uploaded: row.get::<_, i64>(2)? as u64,
                            photos_skipped: row.get::<_, i64>(3)? as u64,
                            photos_failed: row.get::<_, i64>(4)? as u64,
                            interrupted: row.get(5)?,
                        },
                    ))
                },
            )
            .optional()
            .map_err(StateError::query)?;

        let (last_sync_completed, last_run) = match last_run {
            Some((completed, stats)) => (timestamp(completed), Some(stats)),
            None => (None, None),
        };

        Ok(SyncSummary {
            synced,
            last_sync_started: last_sync_started.and_then(timestamp),
            last_sync_completed,
            last_run,
        })
    }
}

#[async_trait]
impl SyncStateStore for SqliteSyncStore {
    async fn load(&self) -> SyncRecord {
        let document = match self.read_document() {
            Ok(Some(document)) => document,
            Ok(None) => {
                tracing::debug!("No stored sync record, starting empty");
                return SyncRecord::new();
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read sync record, starting empty");
                return SyncRecord::new();
            }
        };

        match serde_json::from_str::<StoredRecord>(&document) {
            Ok(stored) => SyncRecord::from_stored(stored),
            Err(e) => {
                tracing::warn!(error = %e, "Stored sync record is malformed, starting empty");
                SyncRecord::new()
            }
        }
    }

    async fn save(&self, record: &SyncRecord) -> Result<(), StateError> {
        let document = serde_json::to_string(&record.to_stored())?;

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(StateError::query)?;
        tx.execute(
            r#"
            INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            rusqlite::params![RECORD_KEY, document, Utc::now().timestamp()],
        )
        .map_err(StateError::query)?;
        tx.commit().map_err(StateError::query)?;

        tracing::debug!(synced = record.len(), "Saved sync record");
        Ok(())
    }
}

fn timestamp(ts: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(entries: &[(&str, &str)]) -> SyncRecord {
        let mut record = SyncRecord::new();
        for (id, url) in entries {
            record.insert(id, url);
        }
        record
    }

    fn write_raw(store: &SqliteSyncStore, value: &str) {
        let conn = store.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?1, ?2, 0)",
            [RECORD_KEY, value],
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_open_creates_db_and_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        let store = SqliteSyncStore::open(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), path);
    }

    #[tokio::test]
    async fn test_load_missing_is_empty() {
        let store = SqliteSyncStore::open_in_memory().unwrap();
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_load_malformed_is_empty() {
        let store = SqliteSyncStore::open_in_memory().unwrap();
        write_raw(&store, "{not json");
        assert!(store.load().await.is_empty());

        write_raw(&store, r#"{"photos": 7}"#);
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let store = SqliteSyncStore::open_in_memory().unwrap();
        let saved = record(&[("a", "https://x/a"), ("b", "https://x/b")]);
        store.save(&saved).await.unwrap();
        assert_eq!(store.load().await, saved);
    }

    #[tokio::test]
    async fn test_save_overwrites_previous_record() {
        let store = SqliteSyncStore::open_in_memory().unwrap();
        store.save(&record(&[("a", "https://x/a")])).await.unwrap();
        let newer = record(&[("a", "https://x/a"), ("c", "https://x/c")]);
        store.save(&newer).await.unwrap();
        assert_eq!(store.load().await, newer);

        let conn = store.conn.lock().unwrap();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM kv_store", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn test_record_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        let saved = record(&[("IMG_1", "https://x/1")]);
        {
            let store = SqliteSyncStore::open(&path).await.unwrap();
            store.save(&saved).await.unwrap();
        }
        let store = SqliteSyncStore::open(&path).await.unwrap();
        assert_eq!(store.load().await, saved);
    }

    #[tokio::test]
    async fn test_load_reconciles_divergent_document() {
        let store = SqliteSyncStore::open_in_memory().unwrap();
        write_raw(
            &store,
            r#"{"photos": ["a", "b"], "urls": {"a": "https://x/a", "z": "https://x/z"}}"#,
        );
        let loaded = store.load().await;
        assert_eq!(loaded.synced_ids(), ["a".to_string()]);
        assert_eq!(loaded.urls().len(), 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = SqliteSyncStore::open_in_memory().unwrap();
        assert!(!store.clear().await.unwrap());
        store.save(&record(&[("a", "https://x/a")])).await.unwrap();
        assert!(store.clear().await.unwrap());
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_sync_run_lifecycle() {
        let store = SqliteSyncStore::open_in_memory().unwrap();
        store.save(&record(&[("a", "https://x/a")])).await.unwrap();

        let summary = store.summary().await.unwrap();
        assert_eq!(summary.synced, 1);
        assert!(summary.last_sync_started.is_none());
        assert!(summary.last_run.is_none());

        let run_id = store.start_sync_run().await.unwrap();
        let summary = store.summary().await.unwrap();
        assert!(summary.last_sync_started.is_some());
        assert!(summary.last_sync_completed.is_none());

        let stats = SyncRunStats {
            photos_seen: 10,
            photos_uploaded: 7,
            photos_skipped: 2,
            photos_failed: 1,
            interrupted: false,
        };
        store.complete_sync_run(run_id, &stats).await.unwrap();
        let summary = store.summary().await.unwrap();
        assert!(summary.last_sync_completed.is_some());
        assert_eq!(summary.last_run, Some(stats));
    }
}
