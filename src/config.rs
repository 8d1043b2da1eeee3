use std::path::PathBuf;

use thiserror::Error;

use crate::cli::{StateArgs, SyncArgs, UploadArgs};
use crate::retry::RetryConfig;
use crate::upload::UploadTarget;

pub const DEFAULT_MAX_CONCURRENT: usize = 3;
pub const DEFAULT_MAX_EDGE_PIXELS: u32 = 2000;
pub const DEFAULT_QUALITY: f32 = 0.8;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max_concurrent must be at least 1")]
    ZeroConcurrency,

    #[error("max_edge_pixels must be at least 1")]
    ZeroEdge,

    #[error("quality must be in (0.0, 1.0], got {0}")]
    Quality(f32),
}

/// Tunables for the sync engine and the image transformer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncConfig {
    /// Group size: photos in flight at once.
    pub max_concurrent: usize,
    /// Longest edge of a transformed image.
    pub max_edge_pixels: u32,
    /// Lossy encode quality in (0, 1].
    pub quality: f32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_edge_pixels: DEFAULT_MAX_EDGE_PIXELS,
            quality: DEFAULT_QUALITY,
        }
    }
}

impl SyncConfig {
    pub fn new(
        max_concurrent: usize,
        max_edge_pixels: u32,
        quality: f32,
    ) -> Result<Self, ConfigError> {
        if max_concurrent == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if max_edge_pixels == 0 {
            return Err(ConfigError::ZeroEdge);
        }
        if !(quality > 0.0 && quality <= 1.0) {
            return Err(ConfigError::Quality(quality));
        }
        Ok(Self {
            max_concurrent,
            max_edge_pixels,
            quality,
        })
    }

    /// Quality on the JPEG encoder's 1-100 scale.
    pub fn jpeg_quality(&self) -> u8 {
        (self.quality * 100.0).round().clamp(1.0, 100.0) as u8
    }
}

/// Everything needed to build a [`crate::sync::SyncEngine`] from CLI flags.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub target: UploadTarget,
    pub work_dir: PathBuf,
    pub sync: SyncConfig,
}

impl EngineSettings {
    pub fn from_args(args: &UploadArgs) -> anyhow::Result<Self> {
        reqwest::Url::parse(&args.upload_url)
            .map_err(|e| anyhow::anyhow!("Invalid --upload-url '{}': {}", args.upload_url, e))?;
        if args.upload_preset.trim().is_empty() {
            anyhow::bail!("--upload-preset must not be empty");
        }

        let work_dir = args
            .work_dir
            .as_deref()
            .map(expand_tilde)
            .unwrap_or_else(|| std::env::temp_dir().join("photosync-rs"));

        Ok(Self {
            target: UploadTarget::new(args.upload_url.clone(), args.upload_preset.clone()),
            work_dir,
            sync: SyncConfig::new(args.max_concurrent, args.max_edge_pixels, args.quality)?,
        })
    }
}

/// Configuration of the `sync` command.
#[derive(Debug)]
pub struct Config {
    pub library: PathBuf,
    pub state_db: PathBuf,
    pub engine: EngineSettings,
    pub recent: Option<usize>,
    pub watch_with_interval: Option<u64>,
    pub retry: RetryConfig,
    pub no_progress_bar: bool,
}

impl Config {
    pub fn from_cli(args: SyncArgs) -> anyhow::Result<Self> {
        let library = expand_tilde(&args.library);
        if !library.is_dir() {
            anyhow::bail!("Library directory does not exist: {}", library.display());
        }

        Ok(Self {
            library,
            state_db: state_db_path(&args.state),
            engine: EngineSettings::from_args(&args.upload)?,
            recent: args.recent,
            watch_with_interval: args.watch_with_interval,
            retry: RetryConfig {
                max_retries: args.max_retries,
                base_delay_secs: args.retry_delay,
                max_delay_secs: 60,
            },
            no_progress_bar: args.no_progress_bar,
        })
    }
}

pub fn state_db_path(args: &StateArgs) -> PathBuf {
    expand_tilde(&args.state_db)
}

/// Expand ~ to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
