//! Extraction of the payload raster from a downloaded tile archive.
//!
//! Each ZIP archive is expected to contain exactly one payload entry with
//! the product's file extension; the first match wins. Extraction is
//! idempotent: an existing file at the destination is removed first so the
//! output always reflects the freshest archive contents. The source archive
//! is only scheduled for removal after the extracted payload is confirmed on
//! disk.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use zip::ZipArchive;

use crate::cleanup::CleanupRegistry;

/// A local raster file ready for import, with its derived layer name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedTile {
    pub path: PathBuf,
    /// File stem, used as the imported layer's name.
    pub layer_name: String,
}

impl ExtractedTile {
    /// Builds a tile from a raster file already on disk (reusable cache
    /// entries and non-archive products).
    #[must_use]
    pub fn from_raster_path(path: PathBuf) -> Option<Self> {
        let layer_name = path.file_stem()?.to_str()?.to_string();
        Some(Self { path, layer_name })
    }
}

/// Errors from archive extraction. All are fatal for the run.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The archive could not be opened or read as a ZIP container.
    #[error("unable to read archive {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    /// No entry with the product extension exists in the archive. Indicates
    /// a catalog/extension mismatch, not a transient failure.
    #[error("no .{extension} payload found in archive {archive}")]
    PayloadNotFound {
        archive: PathBuf,
        extension: String,
    },

    /// An entry name would escape the working directory.
    #[error("unsafe entry name {entry} in archive {archive}")]
    UnsafeEntryName { archive: PathBuf, entry: String },

    /// Filesystem error while writing the payload.
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ExtractError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Extracts the first entry ending in `.{extension}` into `work_dir`.
///
/// On success the archive is registered with the cleanup registry unless
/// `keep_sources` is set.
///
/// # Errors
///
/// Returns [`ExtractError::PayloadNotFound`] after a full scan without a
/// match, and [`ExtractError`] variants for unreadable archives, unsafe
/// entry names, and filesystem failures.
pub fn extract_payload(
    archive_path: &Path,
    work_dir: &Path,
    extension: &str,
    cleanup: &CleanupRegistry,
    keep_sources: bool,
) -> Result<ExtractedTile, ExtractError> {
    let file = fs::File::open(archive_path).map_err(|e| ExtractError::io(archive_path, e))?;
    let mut archive = ZipArchive::new(file).map_err(|source| ExtractError::Archive {
        path: archive_path.to_path_buf(),
        source,
    })?;

    let suffix = format!(".{extension}");
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|source| ExtractError::Archive {
                path: archive_path.to_path_buf(),
                source,
            })?;
        if entry.is_dir() || !entry.name().ends_with(&suffix) {
            continue;
        }

        let Some(relative) = entry.enclosed_name() else {
            return Err(ExtractError::UnsafeEntryName {
                archive: archive_path.to_path_buf(),
                entry: entry.name().to_string(),
            });
        };
        let dest = work_dir.join(relative);

        if dest.exists() {
            debug!(path = %dest.display(), "removing stale extracted payload");
            fs::remove_file(&dest).map_err(|e| ExtractError::io(&dest, e))?;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| ExtractError::io(parent, e))?;
        }

        let mut out = fs::File::create(&dest).map_err(|e| ExtractError::io(&dest, e))?;
        io::copy(&mut entry, &mut out).map_err(|e| ExtractError::io(&dest, e))?;

        // Verify before the archive becomes eligible for removal.
        fs::metadata(&dest).map_err(|e| ExtractError::io(&dest, e))?;
        if !keep_sources {
            cleanup.register(archive_path);
        }

        let tile =
            ExtractedTile::from_raster_path(dest.clone()).ok_or_else(|| ExtractError::Io {
                path: dest.clone(),
                source: std::io::Error::other("extracted payload has no usable file stem"),
            })?;
        info!(
            archive = %archive_path.display(),
            payload = %tile.path.display(),
            "payload extracted"
        );
        return Ok(tile);
    }

    Err(ExtractError::PayloadNotFound {
        archive: archive_path.to_path_buf(),
        extension: extension.to_string(),
    })
}
