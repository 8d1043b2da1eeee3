//! Remote upload client.
//!
//! One call performs one multipart POST and reports back as a stream:
//! zero or more [`UploadEvent::Progress`] values followed by exactly one
//! [`UploadEvent::Finished`]. Nothing is retried here.

pub mod client;
pub mod error;

use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::transform::TransformedImage;

pub use client::HttpUploadClient;
pub use error::{UploadError, UploadFailureKind};

/// Endpoint and preset identifying where and how uploads are accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    url: String,
    preset: String,
}

impl UploadTarget {
    pub fn new(url: impl Into<String>, preset: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            preset: preset.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn preset(&self) -> &str {
        &self.preset
    }
}

/// Success body returned by the upload endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub secure_url: String,
    pub public_id: String,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub bytes: u64,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug)]
pub enum UploadEvent {
    /// Fraction of the file handed to the transport, in [0, 1].
    Progress(f64),
    Finished(Result<UploadResponse, UploadError>),
}

impl UploadEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadEvent::Finished(_))
    }
}

pub type UploadStream = BoxStream<'static, UploadEvent>;

pub trait RemoteUploadClient: Send + Sync {
    fn upload(&self, image: &TransformedImage, target: &UploadTarget) -> UploadStream;
}
