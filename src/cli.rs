use clap::{Args, Parser, Subcommand};

use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "photosync-rs",
    about = "Mirror a local photo library to a remote upload endpoint",
    version
)]
pub struct Cli {
    /// Log level
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Upload every photo in the library that is not synced yet
    Sync(SyncArgs),
    /// Re-run the upload pipeline for a single photo
    Retry(RetryArgs),
    /// Print the remote URL of a synced photo
    Url(UrlArgs),
    /// Show sync state
    Status(StatusArgs),
    /// Forget which photos have been uploaded
    ResetState(ResetStateArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StateArgs {
    /// Path to the sync state database
    #[arg(long, default_value = "~/.photosync-rs/state.db")]
    pub state_db: String,
}

#[derive(Args, Debug, Clone)]
pub struct UploadArgs {
    /// Multipart upload endpoint
    #[arg(long, env = "PHOTOSYNC_UPLOAD_URL")]
    pub upload_url: String,

    /// Upload preset sent with every file
    #[arg(long, env = "PHOTOSYNC_UPLOAD_PRESET", default_value = "image-sharing")]
    pub upload_preset: String,

    /// Scratch directory for transformed images (default: system temp dir)
    #[arg(long)]
    pub work_dir: Option<String>,

    /// Number of photos processed concurrently
    #[arg(long, default_value_t = 3)]
    pub max_concurrent: usize,

    /// Longest edge of an uploaded image, in pixels
    #[arg(long, default_value_t = 2000)]
    pub max_edge_pixels: u32,

    /// JPEG quality of uploaded images (0.0 - 1.0]
    #[arg(long, default_value_t = 0.8)]
    pub quality: f32,
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    #[command(flatten)]
    pub state: StateArgs,

    #[command(flatten)]
    pub upload: UploadArgs,

    /// Local photo library directory
    #[arg(short = 'l', long)]
    pub library: String,

    /// Only sync the N most recent photos
    #[arg(long)]
    pub recent: Option<usize>,

    /// Run continuously, waiting N seconds between runs
    #[arg(long)]
    pub watch_with_interval: Option<u64>,

    /// Retries for photos that failed during the main pass
    #[arg(long, default_value_t = 2)]
    pub max_retries: u32,

    /// Base delay in seconds between retries
    #[arg(long, default_value_t = 5)]
    pub retry_delay: u64,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RetryArgs {
    #[command(flatten)]
    pub state: StateArgs,

    #[command(flatten)]
    pub upload: UploadArgs,

    /// Local photo library directory
    #[arg(short = 'l', long)]
    pub library: String,

    /// Photo identifier (path relative to the library)
    pub id: String,
}

#[derive(Args, Debug, Clone)]
pub struct UrlArgs {
    #[command(flatten)]
    pub state: StateArgs,

    /// Photo identifier (path relative to the library)
    pub id: String,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub state: StateArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ResetStateArgs {
    #[command(flatten)]
    pub state: StateArgs,

    /// Skip the confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,
}
