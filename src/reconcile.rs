//! Reconciliation of remote catalog entries against the local working
//! directory.
//!
//! Each descriptor is classified as reusable, stale, or missing by comparing
//! the on-disk size against the catalog's declared size. The comparison uses
//! a fixed non-zero tolerance because remote-reported and on-disk sizes may
//! legitimately differ by a few bytes of transfer metadata. A stale file is
//! never silently reused: it is deleted and the tile re-fetched, with a
//! warning so the operator knows a cached artifact was discarded.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::catalog::RemoteTileDescriptor;
use crate::cleanup::CleanupRegistry;
use crate::product::UrlNaming;

/// Maximum allowed difference between declared and on-disk size, in bytes.
pub const SIZE_TOLERANCE_BYTES: u64 = 5;

/// Classification of one remote tile against the local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileState {
    /// Local file present and within the size tolerance; no fetch needed.
    Reusable,
    /// Local file present but outside the tolerance; deleted and re-fetched.
    Stale,
    /// No local file; fetched.
    Missing,
}

/// One descriptor with its classification and derived local path.
#[derive(Debug, Clone)]
pub struct ReconciledTile {
    pub descriptor: RemoteTileDescriptor,
    pub state: TileState,
    pub local_path: PathBuf,
}

impl ReconciledTile {
    /// Stale tiles are treated identically to missing ones downstream.
    #[must_use]
    pub fn needs_fetch(&self) -> bool {
        matches!(self.state, TileState::Stale | TileState::Missing)
    }
}

/// Result of reconciling a full descriptor batch, in catalog order.
///
/// Invariant: `reusable + stale + missing == tiles.len()`, and every
/// descriptor appears exactly once.
#[derive(Debug, Default)]
pub struct ReconciliationReport {
    pub tiles: Vec<ReconciledTile>,
    pub reusable: usize,
    pub stale: usize,
    pub missing: usize,
}

impl ReconciliationReport {
    /// Number of tiles that must be downloaded.
    #[must_use]
    pub fn needs_fetch_count(&self) -> usize {
        self.stale + self.missing
    }

    /// Total bytes still to download, from the catalog's declared sizes.
    #[must_use]
    pub fn pending_download_bytes(&self) -> u64 {
        self.tiles
            .iter()
            .filter(|tile| tile.needs_fetch())
            .map(|tile| tile.descriptor.size_in_bytes)
            .sum()
    }

    /// Expected tile count for the whole run (every classified descriptor).
    #[must_use]
    pub fn expected_tile_count(&self) -> usize {
        self.tiles.len()
    }
}

/// Errors from reconciliation.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// No usable file name could be derived from a download URL.
    #[error("cannot derive a local file name from URL: {url}")]
    InvalidName { url: String },

    /// Filesystem error while probing or deleting a cached file.
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Derives the tile's local file name from its download URL.
///
/// NED/NAIP use the URL's final path segment; NLCD carries the name behind
/// an `&FNAME=` marker. The rule comes from the product configuration.
pub fn local_file_name(url: &str, naming: UrlNaming) -> Result<String, ReconcileError> {
    let name = match naming {
        UrlNaming::PathSegment => Url::parse(url)
            .ok()
            .and_then(|parsed| {
                parsed
                    .path_segments()
                    .and_then(|mut segments| segments.next_back().map(ToOwned::to_owned))
            })
            .map(|segment| urlencoding::decode(&segment).map_or(segment.clone(), |s| s.into_owned())),
        UrlNaming::QueryParam(marker) => url
            .rsplit_once(marker)
            .map(|(_, name)| name.to_string()),
    };

    name.filter(|name| !name.is_empty() && !name.contains('/') && !name.contains('\\'))
        .ok_or_else(|| ReconcileError::InvalidName {
            url: url.to_string(),
        })
}

/// Classifies every descriptor against `work_dir`.
///
/// Stale files are registered with the cleanup registry and then deleted
/// immediately, so old and new bytes can never mix and a repeated run is
/// idempotent.
///
/// # Errors
///
/// Returns [`ReconcileError`] when a file name cannot be derived or a stale
/// file cannot be deleted.
pub fn reconcile(
    work_dir: &Path,
    descriptors: &[RemoteTileDescriptor],
    naming: UrlNaming,
    cleanup: &CleanupRegistry,
) -> Result<ReconciliationReport, ReconcileError> {
    let mut report = ReconciliationReport::default();

    for descriptor in descriptors {
        let name = local_file_name(&descriptor.download_url, naming)?;
        let local_path = work_dir.join(&name);

        let state = match std::fs::metadata(&local_path) {
            Ok(metadata) => {
                let on_disk = metadata.len();
                if on_disk.abs_diff(descriptor.size_in_bytes) <= SIZE_TOLERANCE_BYTES {
                    debug!(file = %name, bytes = on_disk, "local file reusable");
                    TileState::Reusable
                } else {
                    warn!(
                        file = %name,
                        on_disk,
                        declared = descriptor.size_in_bytes,
                        "stale local file; deleting and re-fetching"
                    );
                    cleanup.register(&local_path);
                    std::fs::remove_file(&local_path).map_err(|source| ReconcileError::Io {
                        path: local_path.clone(),
                        source,
                    })?;
                    TileState::Stale
                }
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => TileState::Missing,
            Err(source) => {
                return Err(ReconcileError::Io {
                    path: local_path,
                    source,
                });
            }
        };

        match state {
            TileState::Reusable => report.reusable += 1,
            TileState::Stale => report.stale += 1,
            TileState::Missing => report.missing += 1,
        }
        report.tiles.push(ReconciledTile {
            descriptor: descriptor.clone(),
            state,
            local_path,
        });
    }

    if report.reusable > 0 {
        info!(
            count = report.reusable,
            "complete local files/archives exist and will be reused"
        );
    }

    Ok(report)
}
