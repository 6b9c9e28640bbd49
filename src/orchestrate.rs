//! Import and composite-merge of extracted tiles.
//!
//! Drives the host import collaborator once per tile, then either renames
//! the single imported layer to the requested output name or patches all
//! layers into one composite. Tiles are processed in catalog order, which the
//! patch step relies on for seam-free mosaicking; this module never reorders
//! them.

use thiserror::Error;
use tracing::{info, instrument};

use crate::cleanup::CleanupRegistry;
use crate::extract::ExtractedTile;
use crate::gis::{GisError, RasterStore};
use crate::product::ResamplingMethod;

/// Errors from the import/merge stage. All are fatal: a partial composite is
/// never exposed to the caller.
#[derive(Debug, Error)]
pub enum OrchestrateError {
    /// The pipeline reached the import stage with nothing to import.
    #[error("no tiles available to import")]
    NoTilesToImport,

    /// An import, patch, rename, or removal failed in the host GIS.
    #[error(transparent)]
    Gis(#[from] GisError),

    /// Imported-tile count does not match the expected post-reconciliation
    /// count; the run failed even if individual steps succeeded.
    #[error("{imported} of {expected} tiles imported; composite would be incomplete")]
    ImportCountMismatch { imported: usize, expected: usize },
}

/// Drives per-tile import and the final merge/rename handoff.
pub struct ImportOrchestrator<'a> {
    store: &'a dyn RasterStore,
    cleanup: &'a CleanupRegistry,
    keep_sources: bool,
}

impl<'a> ImportOrchestrator<'a> {
    #[must_use]
    pub fn new(
        store: &'a dyn RasterStore,
        cleanup: &'a CleanupRegistry,
        keep_sources: bool,
    ) -> Self {
        Self {
            store,
            cleanup,
            keep_sources,
        }
    }

    /// Imports every tile and produces the output layer.
    ///
    /// - 0 tiles: [`OrchestrateError::NoTilesToImport`]
    /// - 1 tile: the imported layer is renamed to `output_layer`, no merge
    /// - >1 tiles: a temporary region brackets the patch call (torn down on
    ///   success and failure alike); intermediate layers are removed after a
    ///   successful patch unless source retention was requested
    ///
    /// Returns the imported-tile count, which must equal `expected`.
    ///
    /// # Errors
    ///
    /// Any import or patch failure aborts the whole run.
    #[instrument(skip(self, tiles), fields(tiles = tiles.len(), output = output_layer))]
    pub async fn import_and_merge(
        &self,
        tiles: &[ExtractedTile],
        output_layer: &str,
        resampling: ResamplingMethod,
        resolution: Option<f64>,
        expected: usize,
    ) -> Result<usize, OrchestrateError> {
        if tiles.is_empty() {
            return Err(OrchestrateError::NoTilesToImport);
        }

        let mut layer_names = Vec::with_capacity(tiles.len());
        for tile in tiles {
            info!(file = %tile.path.display(), layer = %tile.layer_name, "importing and reprojecting");
            self.store
                .import(&tile.path, &tile.layer_name, resolution, resampling)
                .await?;
            if !self.keep_sources {
                self.cleanup.register(&tile.path);
            }
            layer_names.push(tile.layer_name.clone());
        }

        let imported = layer_names.len();
        if imported != expected {
            return Err(OrchestrateError::ImportCountMismatch { imported, expected });
        }

        if imported == 1 {
            self.store.rename(&layer_names[0], output_layer).await?;
        } else {
            self.store.push_temp_region(resolution).await?;
            let patch_result = self.store.patch(&layer_names, output_layer).await;
            let pop_result = self.store.pop_temp_region().await;
            patch_result?;
            pop_result?;
            info!(layer = output_layer, "patched composite layer added");
            if !self.keep_sources {
                self.store.remove(&layer_names).await?;
            }
        }

        info!(imported, expected, "tiles successfully imported");
        Ok(imported)
    }
}
