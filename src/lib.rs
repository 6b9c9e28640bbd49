//! USGS National Map tile acquisition pipeline.
//!
//! Queries the TNM products catalog for raster tiles intersecting a bounding
//! region, reconciles the results against a local working-directory cache,
//! streams missing or stale tiles to disk, extracts ZIP payloads, and hands
//! the resulting raster files to the host GIS for import and mosaicking.
//!
//! # Architecture
//!
//! - [`product`] - closed enumeration of supported products and their config
//! - [`catalog`] - TNM catalog query client
//! - [`reconcile`] - local cache reconciliation with size tolerance
//! - [`fetch`] - streaming downloads with bounded memory
//! - [`extract`] - ZIP payload extraction
//! - [`gis`] - host GIS collaborator traits and the GRASS-backed session
//! - [`orchestrate`] - per-tile import and composite merge
//! - [`cleanup`] - run-scoped removal registry
//! - [`pipeline`] - stage sequencing and the top-level run

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod cleanup;
pub mod extract;
pub mod fetch;
pub mod gis;
pub mod orchestrate;
pub mod pipeline;
pub mod product;
pub mod reconcile;

// Re-export commonly used types
pub use catalog::{BoundingBox, CatalogClient, CatalogError, RemoteTileDescriptor};
pub use cleanup::CleanupRegistry;
pub use extract::{ExtractError, ExtractedTile};
pub use fetch::{DownloadTask, FetchError, Fetcher, NoopProgress, ProgressObserver};
pub use gis::{CoordTransform, GisError, GrassGis, RasterStore};
pub use orchestrate::{ImportOrchestrator, OrchestrateError};
pub use pipeline::{Pipeline, PipelineError, PipelineOutcome, PipelineRequest};
pub use product::{MapUnits, Product, ResamplingMethod};
pub use reconcile::{SIZE_TOLERANCE_BYTES, TileState, reconcile};
