use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One photo from the local library, as handed to the sync engine.
///
/// Owned by whatever enumerates the library; the engine only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoDescriptor {
    /// Unique within the local library.
    pub id: String,
    /// Opaque locator resolved by the transformer (`file://` URI or a path).
    pub uri: String,
    /// Capture time, epoch seconds.
    pub creation_time: i64,
    /// Last modification time, epoch seconds.
    pub modification_time: i64,
    pub width: u32,
    pub height: u32,
    pub filename: String,
}

impl PhotoDescriptor {
    /// Resolve the source URI to a filesystem path.
    pub fn source_path(&self) -> PathBuf {
        match self.uri.strip_prefix("file://") {
            Some(stripped) => PathBuf::from(stripped),
            None => Path::new(&self.uri).to_path_buf(),
        }
    }

    pub fn created(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.creation_time, 0).unwrap_or(DateTime::UNIX_EPOCH)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(uri: &str) -> PhotoDescriptor {
        PhotoDescriptor {
            id: "IMG_0001".into(),
            uri: uri.into(),
            creation_time: 1_736_899_200,
            modification_time: 1_736_899_200,
            width: 4032,
            height: 3024,
            filename: "IMG_0001.HEIC".into(),
        }
    }

    #[test]
    fn test_source_path_strips_file_scheme() {
        let d = descriptor("file:///var/mobile/IMG_0001.jpg");
        assert_eq!(d.source_path(), PathBuf::from("/var/mobile/IMG_0001.jpg"));
    }

    #[test]
    fn test_source_path_plain_path() {
        let d = descriptor("photos/IMG_0001.jpg");
        assert_eq!(d.source_path(), PathBuf::from("photos/IMG_0001.jpg"));
    }

    #[test]
    fn test_created_from_epoch_seconds() {
        let d = descriptor("x.jpg");
        assert_eq!(d.created().timestamp(), 1_736_899_200);
    }

    #[test]
    fn test_log_level_filter() {
        assert_eq!(LogLevel::Warn.as_filter(), "warn");
        assert_eq!(LogLevel::Debug.as_filter(), "debug");
    }
}
