use thiserror::Error;

use crate::transform::TransformError;
use crate::upload::{UploadError, UploadFailureKind};

pub const PREPARE_FAILED: &str = "Failed to prepare photo for upload";
pub const NETWORK_FAILED: &str = "Upload failed. Please check your internet connection.";
pub const UPLOAD_FAILED: &str = "Upload failed. Please try again.";

/// Why one photo's pipeline run ended without a remote URL.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Transform failed: {0}")]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Upload(#[from] UploadError),
}

impl SyncError {
    /// Message shown to the user for this failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            SyncError::Transform(_) => PREPARE_FAILED,
            SyncError::Upload(e) => match e.kind() {
                UploadFailureKind::NetworkUnreachable => NETWORK_FAILED,
                UploadFailureKind::ServerRejected | UploadFailureKind::Unknown => UPLOAD_FAILED,
            },
        }
    }

    /// Whether running the same photo again could plausibly succeed. A source
    /// the transformer cannot read stays unreadable.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transform(_) => false,
            SyncError::Upload(e) => e.is_retryable(),
        }
    }
}

/// The recorded outcome of a photo's most recent failed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoFailure {
    pub message: String,
    pub retryable: bool,
}

impl From<&SyncError> for PhotoFailure {
    fn from(error: &SyncError) -> Self {
        Self {
            message: error.user_message().to_string(),
            retryable: error.is_retryable(),
        }
    }
}

impl std::fmt::Display for PhotoFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_transform_message() {
        let e = SyncError::from(TransformError::Io {
            path: PathBuf::from("/tmp/x.jpg"),
            source: std::io::Error::other("disk full"),
        });
        assert_eq!(e.user_message(), "Failed to prepare photo for upload");
    }

    #[test]
    fn test_rejected_message() {
        let e = SyncError::from(UploadError::Rejected {
            filename: "x.jpg".into(),
            status: 400,
            body: String::new(),
        });
        assert_eq!(e.user_message(), "Upload failed. Please try again.");
    }

    #[test]
    fn test_retryable_classification() {
        let transform = SyncError::from(TransformError::Io {
            path: PathBuf::from("/tmp/x.jpg"),
            source: std::io::Error::other("unsupported"),
        });
        assert!(!transform.is_retryable());

        let rejected = |status| {
            SyncError::from(UploadError::Rejected {
                filename: "x.jpg".into(),
                status,
                body: String::new(),
            })
        };
        assert!(!rejected(400).is_retryable());
        assert!(rejected(503).is_retryable());

        let failure = PhotoFailure::from(&rejected(400));
        assert_eq!(failure.message, UPLOAD_FAILED);
        assert!(!failure.retryable);
        assert_eq!(failure.to_string(), UPLOAD_FAILED);
    }

    #[test]
    fn test_unknown_message() {
        let e = SyncError::from(UploadError::Other("worker vanished".into()));
        assert_eq!(e.user_message(), UPLOAD_FAILED);
    }
}
