//! Upload orchestration.
//!
//! [`SyncEngine`] takes an ordered batch of photos, skips the ones already
//! recorded as uploaded, and runs the rest through the transformer and the
//! upload client in contiguous groups of `max_concurrent`. Groups run one
//! after another; photos inside a group run together. Every success is
//! folded into the [`SyncRecord`] and persisted, every failure becomes a
//! per-photo error message, and one photo never stops the others.

pub mod error;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::join_all;
use futures_util::StreamExt;
use tokio::sync::broadcast;

use crate::config::SyncConfig;
use crate::retry::{retry_with_backoff, RetryAction, RetryConfig};
use crate::state::{SyncRecord, SyncStateStore};
use crate::transform::ImageTransformer;
use crate::types::PhotoDescriptor;
use crate::upload::{RemoteUploadClient, UploadError, UploadEvent, UploadTarget};

pub use error::{PhotoFailure, SyncError};

/// Buffered events per subscriber before the slowest one starts lagging.
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Pending,
    Transforming,
    Uploading,
    Succeeded,
    Failed,
}

/// One photo's in-flight pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadTask {
    pub photo_id: String,
    pub phase: TaskPhase,
    /// Fraction sent, meaningful while `phase` is `Uploading`.
    pub progress: f64,
}

/// Change notifications for presentation code.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Already uploaded; nothing was done.
    Skipped { id: String },
    Phase { id: String, phase: TaskPhase },
    Progress { id: String, fraction: f64 },
    Succeeded { id: String, url: String },
    Failed { id: String, message: String },
}

#[derive(Debug, Default)]
struct EngineState {
    record: SyncRecord,
    progress: HashMap<String, f64>,
    errors: HashMap<String, PhotoFailure>,
    tasks: HashMap<String, UploadTask>,
}

/// Drives photos from the local library to the remote endpoint.
pub struct SyncEngine {
    store: Arc<dyn SyncStateStore>,
    transformer: Arc<dyn ImageTransformer>,
    client: Arc<dyn RemoteUploadClient>,
    target: UploadTarget,
    config: SyncConfig,
    /// Never held across an `.await`.
    state: Mutex<EngineState>,
    /// Serializes saves so they reach the store in order.
    save_lock: tokio::sync::Mutex<()>,
    /// One gate per identifier with a pipeline run in progress or waiting.
    gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    events: broadcast::Sender<SyncEvent>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("target", &self.target)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Build an engine, loading the stored record before returning.
    pub async fn open(
        store: Arc<dyn SyncStateStore>,
        transformer: Arc<dyn ImageTransformer>,
        client: Arc<dyn RemoteUploadClient>,
        target: UploadTarget,
        config: SyncConfig,
    ) -> Self {
        let record = store.load().await;
        tracing::debug!(synced = record.len(), "Loaded sync record");
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            transformer,
            client,
            target,
            config,
            state: Mutex::new(EngineState {
                record,
                ..EngineState::default()
            }),
            save_lock: tokio::sync::Mutex::new(()),
            gates: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Upload every photo in `photos` that is not synced yet.
    ///
    /// Photos are taken in order, `max_concurrent` at a time; a group fully
    /// settles before the next one starts. Failures are recorded per photo
    /// and never abort the batch.
    pub async fn sync_photos(&self, photos: &[PhotoDescriptor]) {
        let group_size = self.config.max_concurrent.max(1);
        for (index, group) in photos.chunks(group_size).enumerate() {
            tracing::debug!(group = index, size = group.len(), "Starting upload group");
            join_all(group.iter().map(|photo| self.run(photo))).await;
        }
    }

    /// Run the pipeline for a single photo. Used for manual retries.
    pub async fn upload_photo(&self, photo: &PhotoDescriptor) {
        self.run(photo).await;
    }

    /// Run the pipeline for `photo` with backoff between attempts.
    ///
    /// Stops at the first success or at the first failure that another run
    /// cannot fix (a rejected request, an unreadable source).
    pub async fn upload_with_retry(
        &self,
        photo: &PhotoDescriptor,
        retry: &RetryConfig,
    ) -> Result<(), PhotoFailure> {
        let label = format!("Upload of {}", photo.id);
        let classify = |failure: &PhotoFailure| {
            if failure.retryable {
                RetryAction::Retry
            } else {
                RetryAction::Abort
            }
        };
        retry_with_backoff(retry, &label, classify, |_| async move {
            self.run(photo).await;
            match self.failure_for(&photo.id) {
                Some(failure) => Err(failure),
                None => Ok(()),
            }
        })
        .await
    }

    pub fn progress(&self) -> HashMap<String, f64> {
        self.lock_state().progress.clone()
    }

    pub fn errors(&self) -> HashMap<String, String> {
        self.lock_state()
            .errors
            .iter()
            .map(|(id, failure)| (id.clone(), failure.message.clone()))
            .collect()
    }

    /// Synced identifiers in upload order.
    pub fn synced_ids(&self) -> Vec<String> {
        self.lock_state().record.synced_ids().to_vec()
    }

    pub fn urls(&self) -> HashMap<String, String> {
        self.lock_state().record.urls().clone()
    }

    pub fn url_for(&self, id: &str) -> Option<String> {
        self.lock_state().record.url(id).map(str::to_string)
    }

    pub fn error_for(&self, id: &str) -> Option<String> {
        self.lock_state().errors.get(id).map(|f| f.message.clone())
    }

    /// The last failure for `id`, with whether running it again may help.
    pub fn failure_for(&self, id: &str) -> Option<PhotoFailure> {
        self.lock_state().errors.get(id).cloned()
    }

    /// Pipeline runs currently in flight, ordered by identifier.
    pub fn tasks(&self) -> Vec<UploadTask> {
        let mut tasks: Vec<UploadTask> = self.lock_state().tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.photo_id.cmp(&b.photo_id));
        tasks
    }

    pub fn is_photo_uploaded(&self, id: &str) -> bool {
        let state = self.lock_state();
        state.record.is_synced(id) && state.record.url(id).is_some()
    }

    pub fn clear_error(&self, id: &str) {
        self.lock_state().errors.remove(id);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Run one photo while holding its identifier's gate.
    async fn run(&self, photo: &PhotoDescriptor) {
        let gate = self.acquire_gate(&photo.id);
        {
            let _held = gate.lock().await;
            self.process(photo).await;
        }
        drop(gate);
        self.release_gate(&photo.id);
    }

    fn acquire_gate(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(gates.entry(id.to_string()).or_default())
    }

    fn release_gate(&self, id: &str) {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        if gates.get(id).is_some_and(|g| Arc::strong_count(g) == 1) {
            gates.remove(id);
        }
    }

    async fn process(&self, photo: &PhotoDescriptor) {
        let id = photo.id.as_str();
        self.clear_error(id);
        if self.is_photo_uploaded(id) {
            tracing::debug!(id = %id, "Already uploaded, skipping");
            self.emit(SyncEvent::Skipped { id: id.to_string() });
            return;
        }

        self.set_phase(id, TaskPhase::Pending);
        self.set_phase(id, TaskPhase::Transforming);
        let image = match self.transformer.transform(photo).await {
            Ok(image) => image,
            Err(e) => {
                self.fail(id, SyncError::from(e));
                return;
            }
        };

        self.begin_upload(id);
        let mut stream = self.client.upload(&image, &self.target);
        let mut outcome = None;
        while let Some(event) = stream.next().await {
            match event {
                UploadEvent::Progress(fraction) => self.report_progress(id, fraction),
                UploadEvent::Finished(result) => {
                    outcome = Some(result);
                    break;
                }
            }
        }
        drop(stream);
        self.transformer.discard(&image).await;

        let result = outcome.unwrap_or_else(|| {
            Err(UploadError::Other(
                "Upload stream ended without a result".to_string(),
            ))
        });
        match result {
            Ok(response) => self.succeed(id, &response.secure_url).await,
            Err(e) => self.fail(id, SyncError::from(e)),
        }
    }

    fn set_phase(&self, id: &str, phase: TaskPhase) {
        {
            let mut state = self.lock_state();
            let task = state
                .tasks
                .entry(id.to_string())
                .or_insert_with(|| UploadTask {
                    photo_id: id.to_string(),
                    phase,
                    progress: 0.0,
                });
            task.phase = phase;
        }
        self.emit(SyncEvent::Phase {
            id: id.to_string(),
            phase,
        });
    }

    fn begin_upload(&self, id: &str) {
        self.set_phase(id, TaskPhase::Uploading);
        self.lock_state().progress.insert(id.to_string(), 0.0);
        self.emit(SyncEvent::Progress {
            id: id.to_string(),
            fraction: 0.0,
        });
    }

    /// Raise the recorded fraction; values below the current one are ignored.
    fn report_progress(&self, id: &str, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0);
        let raised = {
            let mut state = self.lock_state();
            let current = state.progress.entry(id.to_string()).or_insert(0.0);
            if fraction > *current {
                *current = fraction;
                if let Some(task) = state.tasks.get_mut(id) {
                    task.progress = fraction;
                }
                true
            } else {
                false
            }
        };
        if raised {
            self.emit(SyncEvent::Progress {
                id: id.to_string(),
                fraction,
            });
        }
    }

    async fn succeed(&self, id: &str, url: &str) {
        {
            let mut state = self.lock_state();
            state.progress.remove(id);
            state.errors.remove(id);
            state.record.insert(id, url);
            state.tasks.remove(id);
        }
        tracing::info!(id = %id, url = %url, "Uploaded photo");
        self.emit(SyncEvent::Phase {
            id: id.to_string(),
            phase: TaskPhase::Succeeded,
        });
        self.emit(SyncEvent::Succeeded {
            id: id.to_string(),
            url: url.to_string(),
        });
        self.persist().await;
    }

    fn fail(&self, id: &str, error: SyncError) {
        let failure = PhotoFailure::from(&error);
        let message = failure.message.clone();
        {
            let mut state = self.lock_state();
            state.progress.remove(id);
            state.errors.insert(id.to_string(), failure);
            state.tasks.remove(id);
        }
        tracing::warn!(id = %id, error = %error, "Photo upload failed");
        self.emit(SyncEvent::Phase {
            id: id.to_string(),
            phase: TaskPhase::Failed,
        });
        self.emit(SyncEvent::Failed {
            id: id.to_string(),
            message,
        });
    }

    /// Save the current record. The snapshot is taken under the save lock so
    /// the last save always carries every success known so far.
    async fn persist(&self) {
        let _guard = self.save_lock.lock().await;
        let snapshot = self.lock_state().record.clone();
        if let Err(e) = self.store.save(&snapshot).await {
            tracing::warn!(error = %e, "Failed to persist sync record");
        }
    }
}
