//! Upload-ready copies of library photos.
//!
//! Every photo is decoded, shrunk so its longest edge fits the configured
//! bound, and re-encoded as JPEG into a scratch directory. Output names are
//! derived from the photo identifier, so transforming the same photo twice
//! overwrites the same file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::SyncConfig;
use crate::types::PhotoDescriptor;

pub const OUTPUT_CONTENT_TYPE: &str = "image/jpeg";

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Cannot read source image {path}: {source}")]
    SourceUnreadable {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("Failed to encode {id}: {source}")]
    Encode {
        id: String,
        source: image::ImageError,
    },

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Transform task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A transformed photo waiting to be uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedImage {
    pub photo_id: String,
    /// Where the encoded bytes live.
    pub path: PathBuf,
    /// Name sent with the upload: `<identifier>.jpg`.
    pub filename: String,
    pub content_type: String,
    pub width: u32,
    pub height: u32,
    pub bytes: u64,
}

#[async_trait]
pub trait ImageTransformer: Send + Sync {
    async fn transform(&self, photo: &PhotoDescriptor)
        -> Result<TransformedImage, TransformError>;

    /// Remove a transformed file once it is no longer needed.
    async fn discard(&self, image: &TransformedImage) {
        if let Err(e) = tokio::fs::remove_file(&image.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(path = %image.path.display(), error = %e, "Could not remove transformed image");
            }
        }
    }
}

/// Decode with the `image` crate, resize, and re-encode as JPEG.
#[derive(Debug, Clone)]
pub struct JpegTransformer {
    work_dir: PathBuf,
    max_edge_pixels: u32,
    quality: u8,
}

impl JpegTransformer {
    pub fn new(work_dir: impl Into<PathBuf>, config: &SyncConfig) -> Self {
        Self {
            work_dir: work_dir.into(),
            max_edge_pixels: config.max_edge_pixels,
            quality: config.jpeg_quality(),
        }
    }

    pub fn output_path(&self, photo_id: &str) -> PathBuf {
        self.work_dir.join(scratch_file_name(photo_id))
    }
}

#[async_trait]
impl ImageTransformer for JpegTransformer {
    async fn transform(
        &self,
        photo: &PhotoDescriptor,
    ) -> Result<TransformedImage, TransformError> {
        let source = photo.source_path();
        let dest = self.output_path(&photo.id);
        let id = photo.id.clone();
        let max_edge = self.max_edge_pixels;
        let quality = self.quality;

        let (width, height, bytes) = {
            let dest = dest.clone();
            tokio::task::spawn_blocking(move || {
                transform_file(&id, &source, &dest, max_edge, quality)
            })
            .await??
        };

        tracing::debug!(
            id = %photo.id,
            width,
            height,
            bytes,
            "Transformed photo"
        );

        Ok(TransformedImage {
            photo_id: photo.id.clone(),
            path: dest,
            filename: upload_filename(&photo.id),
            content_type: OUTPUT_CONTENT_TYPE.to_string(),
            width,
            height,
            bytes,
        })
    }
}

/// Filename sent to the remote endpoint.
pub fn upload_filename(photo_id: &str) -> String {
    format!("{photo_id}.jpg")
}

/// Dimensions after shrinking so the longest edge is at most `max_edge`.
/// Aspect ratio is kept; images already within bounds are left alone.
pub fn fit_within(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_edge || longest == 0 {
        return (width, height);
    }
    let scale = f64::from(max_edge) / f64::from(longest);
    let scaled = |edge: u32| ((f64::from(edge) * scale).round() as u32).clamp(1, max_edge);
    (scaled(width), scaled(height))
}

/// Identifiers may contain `/` and other characters that are not safe in a
/// file name. Keep a readable prefix and disambiguate with a digest.
fn scratch_file_name(photo_id: &str) -> String {
    let readable: String = photo_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect();
    let digest = Sha256::digest(photo_id.as_bytes());
    let tag: String = digest[..6].iter().map(|b| format!("{:02x}", b)).collect();
    format!("{readable}-{tag}.jpg")
}

/// Decode `source`, sniffing the format from its bytes, and rotate or flip
/// it as its EXIF orientation asks.
fn decode_upright(source: &Path) -> image::ImageResult<DynamicImage> {
    let mut decoder = ImageReader::open(source)?
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);
    Ok(img)
}

fn transform_file(
    id: &str,
    source: &Path,
    dest: &Path,
    max_edge: u32,
    quality: u8,
) -> Result<(u32, u32, u64), TransformError> {
    let img = decode_upright(source).map_err(|e| TransformError::SourceUnreadable {
        path: source.to_path_buf(),
        source: e,
    })?;

    let (width, height) = fit_within(img.width(), img.height(), max_edge);
    let img = if (width, height) == (img.width(), img.height()) {
        img
    } else {
        img.resize_exact(width, height, FilterType::CatmullRom)
    };

    // Encode fully in memory so a failure never leaves bytes on disk.
    let rgb = img.to_rgb8();
    let mut encoded = Vec::new();
    JpegEncoder::new_with_quality(&mut encoded, quality)
        .encode_image(&rgb)
        .map_err(|e| TransformError::Encode {
            id: id.to_string(),
            source: e,
        })?;

    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| TransformError::Io { path, source }
    };

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let part = dest.with_extension("jpg.part");
    std::fs::write(&part, &encoded).map_err(io_err(&part))?;
    if let Err(e) = std::fs::rename(&part, dest) {
        let _ = std::fs::remove_file(&part);
        return Err(TransformError::Io {
            path: dest.to_path_buf(),
            source: e,
        });
    }

    Ok((width, height, encoded.len() as u64))
}
