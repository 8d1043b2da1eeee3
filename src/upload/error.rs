use std::path::PathBuf;

use thiserror::Error;

/// Coarse classification surfaced to users and callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFailureKind {
    NetworkUnreachable,
    ServerRejected,
    Unknown,
}

impl UploadFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkUnreachable => "network-unreachable",
            Self::ServerRejected => "server-rejected",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for UploadFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a single upload did not produce a remote URL.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Network error uploading {filename}: {source}")]
    Network {
        filename: String,
        source: reqwest::Error,
    },

    #[error("Upload of {filename} rejected with HTTP {status}: {body}")]
    Rejected {
        filename: String,
        status: u16,
        body: String,
    },

    #[error("Unexpected response uploading {filename}: {source}")]
    MalformedResponse {
        filename: String,
        source: serde_json::Error,
    },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl UploadError {
    pub fn kind(&self) -> UploadFailureKind {
        match self {
            UploadError::Network { .. } => UploadFailureKind::NetworkUnreachable,
            UploadError::Rejected { .. } | UploadError::MalformedResponse { .. } => {
                UploadFailureKind::ServerRejected
            }
            UploadError::Io { .. } | UploadError::Other(_) => UploadFailureKind::Unknown,
        }
    }

    /// Whether trying the same upload again could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::Network { .. } => true,
            UploadError::Rejected { status, .. } => *status == 429 || *status >= 500,
            UploadError::MalformedResponse { .. } => false,
            UploadError::Io { .. } => false,
            UploadError::Other(_) => false,
        }
    }
}
