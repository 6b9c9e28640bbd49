//! Boundary to the host GIS environment.
//!
//! The pipeline never decodes rasters or does projection math itself; it
//! delegates to the host's import, patch, and coordinate-transform tools
//! behind these traits. `async_trait` keeps the traits object-safe so the
//! pipeline can hold `dyn` collaborators (real GRASS-backed sessions in the
//! binary, recording mocks in tests).

pub mod grass;

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

pub use grass::GrassGis;

use crate::product::{MapUnits, ResamplingMethod};

/// Errors from host GIS collaborators. Every variant names the implicated
/// file or layer.
#[derive(Debug, Error)]
pub enum GisError {
    /// The raster import collaborator failed for one file.
    #[error("unable to import '{file}': {message}")]
    Import { file: String, message: String },

    /// The raster merge collaborator failed to build the composite.
    #[error("unable to patch tiles into '{layer}': {message}")]
    Patch { layer: String, message: String },

    /// A host tool exited unsuccessfully.
    #[error("{tool} failed: {message}")]
    Command { tool: String, message: String },

    /// A host tool could not be spawned.
    #[error("IO error running {tool}: {source}")]
    Io {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The coordinate transform produced unparseable output.
    #[error("unable to parse coordinate transform output: {output}")]
    CoordParse { output: String },
}

/// Raster import/merge collaborator of the host GIS.
#[async_trait]
pub trait RasterStore: Send + Sync {
    /// Imports and reprojects one raster file into the host's store.
    ///
    /// With a known `resolution` the import uses that explicit value;
    /// without one the collaborator infers resolution from the file.
    async fn import(
        &self,
        input: &Path,
        layer: &str,
        resolution: Option<f64>,
        resampling: ResamplingMethod,
    ) -> Result<(), GisError>;

    /// Merges the named layers, in the given order, into one composite.
    async fn patch(&self, layers: &[String], output: &str) -> Result<(), GisError>;

    /// Renames a raster layer.
    async fn rename(&self, from: &str, to: &str) -> Result<(), GisError>;

    /// Removes raster layers.
    async fn remove(&self, layers: &[String]) -> Result<(), GisError>;

    /// Establishes a temporary processing region, optionally aligned to a
    /// resolution, leaving the caller's ambient region untouched.
    async fn push_temp_region(&self, resolution: Option<f64>) -> Result<(), GisError>;

    /// Tears the temporary region down, restoring the ambient region.
    async fn pop_temp_region(&self) -> Result<(), GisError>;

    /// Applies a named color table to a layer.
    async fn apply_color_table(&self, layer: &str, table: &str) -> Result<(), GisError>;

    /// Map units of the current location, used to pick a target resolution.
    async fn map_units(&self) -> MapUnits;
}

/// Coordinate transform collaborator of the host GIS.
#[async_trait]
pub trait CoordTransform: Send + Sync {
    /// Transforms one coordinate pair into the SRS described by `proj4`.
    async fn to_srs(&self, x: f64, y: f64, proj4: &str) -> Result<(f64, f64), GisError>;

    /// Current computational region as `(west, south, east, north)` in the
    /// host's native coordinates.
    async fn current_region(&self) -> Result<(f64, f64, f64, f64), GisError>;
}
