//! Local photo library scanner.
//!
//! Walks a directory tree and describes every image it can read a header
//! from. Identifiers are paths relative to the library root with `/`
//! separators, so they stay stable across machines and restarts.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::types::PhotoDescriptor;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "bmp", "tif", "tiff"];

/// List the photos under `root`, newest capture time first.
///
/// Files whose header cannot be read are skipped with a warning.
pub fn scan_library(root: &Path) -> Result<Vec<PhotoDescriptor>> {
    if !root.is_dir() {
        anyhow::bail!("Library directory does not exist: {}", root.display());
    }

    let mut photos = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable library entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() || !has_image_extension(entry.path()) {
            continue;
        }
        match describe(root, entry.path()) {
            Ok(photo) => photos.push(photo),
            Err(e) => tracing::warn!(path = %entry.path().display(), "Skipping photo: {:#}", e),
        }
    }

    photos.sort_by(|a, b| {
        b.creation_time
            .cmp(&a.creation_time)
            .then_with(|| a.id.cmp(&b.id))
    });
    tracing::debug!(count = photos.len(), root = %root.display(), "Scanned library");
    Ok(photos)
}

/// Keep only the `n` newest photos of a listing sorted by [`scan_library`].
pub fn most_recent(mut photos: Vec<PhotoDescriptor>, n: Option<usize>) -> Vec<PhotoDescriptor> {
    if let Some(n) = n {
        photos.truncate(n);
    }
    photos
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

fn describe(root: &Path, path: &Path) -> Result<PhotoDescriptor> {
    let (width, height) = image::ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(image::ImageError::from)
        .and_then(|reader| reader.into_dimensions())
        .with_context(|| format!("Reading image header of {}", path.display()))?;
    let metadata =
        std::fs::metadata(path).with_context(|| format!("Reading metadata of {}", path.display()))?;
    let modification_time = metadata.modified().map(epoch_secs).unwrap_or(0);
    let creation_time = capture_time(path).unwrap_or(modification_time);

    let relative = path.strip_prefix(root).unwrap_or(path);
    let id = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| id.clone());

    Ok(PhotoDescriptor {
        id,
        uri: format!("file://{}", path.display()),
        creation_time,
        modification_time,
        width,
        height,
        filename,
    })
}

fn epoch_secs(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

/// `DateTimeOriginal` from the EXIF block, read as UTC.
fn capture_time(path: &Path) -> Option<i64> {
    let file = std::fs::File::open(path).ok()?;
    let mut reader = std::io::BufReader::new(file);
    let exif = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif,
        Err(e) => {
            tracing::trace!("No EXIF data in {}: {}", path.display(), e);
            return None;
        }
    };
    let field = exif.get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)?;
    let exif::Value::Ascii(ref values) = field.value else {
        return None;
    };
    let dt = exif::DateTime::from_ascii(values.first()?).ok()?;
    chrono::NaiveDate::from_ymd_opt(dt.year.into(), dt.month.into(), dt.day.into())?
        .and_hms_opt(dt.hour.into(), dt.minute.into(), dt.second.into())
        .map(|naive| naive.and_utc().timestamp())
}
