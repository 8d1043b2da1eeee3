//! photosync-rs: mirror a local photo library to a remote upload endpoint.
//!
//! Scans a library directory, uploads every photo not yet recorded in the
//! state database as a bounded JPEG, and keeps the identifier → URL record
//! so re-runs only upload what is new. Photos that fail during the main
//! pass get a cleanup pass with exponential-backoff retries.

#![warn(clippy::all)]

use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use photosync::cli::{self, Command};
use photosync::config::{self, Config, EngineSettings};
use photosync::library;
use photosync::shutdown;
use photosync::state::{SqliteSyncStore, SyncRunStats, SyncStateStore};
use photosync::sync::{SyncEngine, SyncEvent};
use photosync::transform::JpegTransformer;
use photosync::types::PhotoDescriptor;
use photosync::upload::HttpUploadClient;

/// Wire the SQLite store, JPEG transformer and HTTP client into an engine.
async fn build_engine(
    store: Arc<dyn SyncStateStore>,
    settings: &EngineSettings,
) -> anyhow::Result<SyncEngine> {
    let transformer = Arc::new(JpegTransformer::new(&settings.work_dir, &settings.sync));
    let client = Arc::new(HttpUploadClient::new()?);
    Ok(SyncEngine::open(
        store,
        transformer,
        client,
        settings.target.clone(),
        settings.sync,
    )
    .await)
}

async fn scan(root: &Path) -> anyhow::Result<Vec<PhotoDescriptor>> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || library::scan_library(&root)).await?
}

/// Create a progress bar with a consistent template.
///
/// Returns `ProgressBar::hidden()` when the user passed `--no-progress-bar` or
/// stdout is not a TTY.
fn create_progress_bar(no_progress_bar: bool, total: u64) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    match ProgressStyle::with_template(
        "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        Ok(style) => pb.set_style(style.progress_chars("=> ")),
        Err(e) => tracing::debug!("Falling back to default progress style: {}", e),
    }
    pb
}

/// Feed engine events into the progress bar until aborted.
fn spawn_progress_reporter(
    mut events: broadcast::Receiver<SyncEvent>,
    pb: ProgressBar,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SyncEvent::Skipped { .. }) | Ok(SyncEvent::Succeeded { .. }) => pb.inc(1),
                Ok(SyncEvent::Failed { id, message }) => {
                    pb.inc(1);
                    pb.suspend(|| tracing::warn!("{}: {}", id, message));
                }
                Ok(SyncEvent::Progress { id, fraction }) => {
                    pb.set_message(format!("{} {:>3.0}%", id, fraction * 100.0));
                }
                Ok(SyncEvent::Phase { .. }) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "Progress reporter lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

/// One scan + upload pass. Returns the number of photos still failed.
async fn sync_pass(
    engine: &SyncEngine,
    store: &SqliteSyncStore,
    config: &Config,
    shutdown_token: &CancellationToken,
) -> anyhow::Result<usize> {
    let started = Instant::now();
    let photos = library::most_recent(scan(&config.library).await?, config.recent);
    let pending = photos
        .iter()
        .filter(|p| !engine.is_photo_uploaded(&p.id))
        .count();
    let skipped = photos.len() - pending;

    if pending == 0 {
        tracing::info!("No new photos to upload ({} already synced)", skipped);
        return Ok(0);
    }

    let run_id = match store.start_sync_run().await {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::warn!("Failed to record sync run: {}", e);
            None
        }
    };

    tracing::info!(
        "Uploading {} new photos ({} already synced, {} in library)",
        pending,
        skipped,
        photos.len()
    );
    let pb = create_progress_bar(config.no_progress_bar, photos.len() as u64);
    let reporter = spawn_progress_reporter(engine.subscribe(), pb.clone());
    engine.sync_photos(&photos).await;
    reporter.abort();
    pb.finish_and_clear();

    let failed: Vec<&PhotoDescriptor> = photos
        .iter()
        .filter(|p| engine.error_for(&p.id).is_some())
        .collect();
    let retryable: Vec<&PhotoDescriptor> = failed
        .iter()
        .copied()
        .filter(|p| engine.failure_for(&p.id).is_some_and(|f| f.retryable))
        .collect();

    if !retryable.is_empty() && !shutdown_token.is_cancelled() {
        tracing::info!(
            "── Cleanup pass: retrying {} failed uploads ──",
            retryable.len()
        );
        for &photo in &retryable {
            if shutdown_token.is_cancelled() {
                tracing::info!("Shutdown requested, skipping remaining retries");
                break;
            }
            if engine.upload_with_retry(photo, &config.retry).await.is_ok() {
                tracing::info!("  {} uploaded on retry", photo.id);
            }
        }
    }

    let remaining: Vec<(&PhotoDescriptor, String)> = failed
        .into_iter()
        .filter_map(|p| engine.error_for(&p.id).map(|message| (p, message)))
        .collect();
    let uploaded = pending - remaining.len();

    tracing::info!("── Summary ──");
    tracing::info!(
        "  {} uploaded, {} failed, {} skipped, {} total",
        uploaded,
        remaining.len(),
        skipped,
        photos.len()
    );
    tracing::info!("  elapsed: {}", format_duration(started.elapsed()));
    for (photo, message) in &remaining {
        tracing::error!("Upload failed: {}: {}", photo.id, message);
    }

    if let Some(run_id) = run_id {
        let stats = SyncRunStats {
            photos_seen: photos.len() as u64,
            photos_uploaded: uploaded as u64,
            photos_skipped: skipped as u64,
            photos_failed: remaining.len() as u64,
            interrupted: shutdown_token.is_cancelled(),
        };
        if let Err(e) = store.complete_sync_run(run_id, &stats).await {
            tracing::warn!("Failed to record sync run: {}", e);
        }
    }

    Ok(remaining.len())
}

/// Run the sync command.
async fn run_sync(args: cli::SyncArgs) -> anyhow::Result<()> {
    let config = Config::from_cli(args)?;
    tracing::info!(
        concurrency = config.engine.sync.max_concurrent,
        "Starting photosync-rs"
    );

    let store = Arc::new(SqliteSyncStore::open(&config.state_db).await?);
    tracing::debug!("State database opened at {}", store.path().display());
    let engine = build_engine(store.clone(), &config.engine).await?;
    tracing::info!("{} photos already synced", engine.synced_ids().len());

    let shutdown_token = shutdown::install_signal_handler()?;

    loop {
        if shutdown_token.is_cancelled() {
            tracing::info!("Shutdown requested, exiting...");
            break;
        }

        let failed = sync_pass(&engine, &store, &config, &shutdown_token).await?;

        let Some(interval) = config.watch_with_interval else {
            if failed > 0 {
                anyhow::bail!("{} uploads failed", failed);
            }
            break;
        };

        if failed > 0 {
            tracing::warn!("{} uploads failed, retrying on the next cycle", failed);
        }
        if shutdown_token.is_cancelled() {
            tracing::info!("Shutdown requested, exiting...");
            break;
        }
        tracing::info!("Waiting {} seconds...", interval);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(interval)) => {}
            _ = shutdown_token.cancelled() => {
                tracing::info!("Shutdown during wait, exiting...");
                break;
            }
        }
    }

    Ok(())
}

/// Run the retry command.
async fn run_retry(args: cli::RetryArgs) -> anyhow::Result<()> {
    let settings = EngineSettings::from_args(&args.upload)?;
    let library_root = config::expand_tilde(&args.library);
    let photo = scan(&library_root)
        .await?
        .into_iter()
        .find(|p| p.id == args.id)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Photo '{}' not found in {}",
                args.id,
                library_root.display()
            )
        })?;

    tracing::debug!(
        id = %photo.id,
        created = %photo.created(),
        "Found photo ({}x{})",
        photo.width,
        photo.height
    );

    let store = Arc::new(SqliteSyncStore::open(&config::state_db_path(&args.state)).await?);
    let engine = build_engine(store, &settings).await?;

    if engine.is_photo_uploaded(&photo.id) {
        tracing::info!("{} is already uploaded", photo.id);
    } else {
        engine.upload_photo(&photo).await;
    }

    if let Some(message) = engine.error_for(&photo.id) {
        anyhow::bail!("{}: {}", photo.id, message);
    }
    if let Some(url) = engine.url_for(&photo.id) {
        println!("{}", url);
    }
    Ok(())
}

/// Run the url command.
async fn run_url(args: cli::UrlArgs) -> anyhow::Result<()> {
    let db_path = config::state_db_path(&args.state);
    if !db_path.exists() {
        anyhow::bail!("No state database found at {}", db_path.display());
    }

    let store = SqliteSyncStore::open(&db_path).await?;
    let record = store.load().await;
    match record.url(&args.id) {
        Some(url) => {
            println!("{}", url);
            Ok(())
        }
        None => anyhow::bail!("{} has not been uploaded yet", args.id),
    }
}

/// Run the status command.
async fn run_status(args: cli::StatusArgs) -> anyhow::Result<()> {
    let db_path = config::state_db_path(&args.state);

    if !db_path.exists() {
        println!("No state database found at {}", db_path.display());
        println!("Run a sync first to create the database.");
        return Ok(());
    }

    let store = SqliteSyncStore::open(&db_path).await?;
    let summary = store.summary().await?;

    println!("State Database: {}", db_path.display());
    println!();
    println!("Photos synced: {}", summary.synced);
    println!();

    if let Some(started) = &summary.last_sync_started {
        println!(
            "Last sync started:   {}",
            started.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    if let Some(completed) = &summary.last_sync_completed {
        println!(
            "Last sync completed: {}",
            completed.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    if let Some(run) = &summary.last_run {
        println!();
        println!("Last run:");
        println!("  Seen:     {}", run.photos_seen);
        println!("  Uploaded: {}", run.photos_uploaded);
        println!("  Skipped:  {}", run.photos_skipped);
        println!("  Failed:   {}", run.photos_failed);
        if run.interrupted {
            println!("  (interrupted)");
        }
    }

    Ok(())
}

/// Run the reset-state command.
async fn run_reset_state(args: cli::ResetStateArgs) -> anyhow::Result<()> {
    let db_path = config::state_db_path(&args.state);

    if !db_path.exists() {
        println!("No state database found at {}", db_path.display());
        return Ok(());
    }

    if !args.yes {
        println!("This will forget every uploaded photo recorded in:");
        println!("  {}", db_path.display());
        println!("The next sync will upload the whole library again.");
        println!();
        print!("Are you sure? [y/N] ");
        use std::io::Write;
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let store = SqliteSyncStore::open(&db_path).await?;
    if store.clear().await? {
        println!("Sync record deleted.");
    } else {
        println!("Sync record was already empty.");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    match cli.command {
        Command::Sync(args) => run_sync(args).await,
        Command::Retry(args) => run_retry(args).await,
        Command::Url(args) => run_url(args).await,
        Command::Status(args) => run_status(args).await,
        Command::ResetState(args) => run_reset_state(args).await,
    }
}
