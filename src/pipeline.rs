//! Top-level pipeline run: catalog query, reconciliation, fetch, extraction,
//! and import handoff, strictly in that order.
//!
//! Stages execute sequentially because each stage's output is the next
//! stage's complete input set; tiles flow through every stage in the exact
//! order the catalog returned them, which is assumed spatially coherent and
//! relied upon by the patch step. Only one run per working directory is
//! supported at a time; concurrent runs sharing a directory can race on the
//! same cache entries (documented limitation).

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::catalog::{BoundingBox, CatalogClient, CatalogError, QuerySpec};
use crate::cleanup::CleanupRegistry;
use crate::extract::{ExtractError, ExtractedTile, extract_payload};
use crate::fetch::{FetchError, Fetcher, ProgressObserver, task_for};
use crate::gis::{CoordTransform, GisError, RasterStore};
use crate::orchestrate::{ImportOrchestrator, OrchestrateError};
use crate::product::{Product, ResamplingMethod};
use crate::reconcile::{ReconcileError, ReconciliationReport, reconcile};

/// Everything one pipeline invocation needs to know.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub product: Product,
    /// Dataset tag; the product default when `None`.
    pub dataset_tag: Option<String>,
    /// Subset title filter for products that have subsets.
    pub subset: Option<String>,
    /// Bounding box in the product's SRS. When `None` the host region is
    /// read and transformed through the coordinate collaborator.
    pub bbox: Option<BoundingBox>,
    pub work_dir: PathBuf,
    pub output_layer: String,
    pub resampling: ResamplingMethod,
    /// Keep downloaded archives, extracted tiles, and per-tile layers.
    pub keep_sources: bool,
    /// Report what would be downloaded, then stop before any network write
    /// or collaborator call.
    pub dry_run: bool,
}

/// Final accounting of one run.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOutcome {
    pub expected_tiles: usize,
    pub imported_tiles: usize,
    pub reused: usize,
    pub downloaded: usize,
    pub dry_run: bool,
}

/// Any fatal condition of a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Orchestrate(#[from] OrchestrateError),

    #[error(transparent)]
    Gis(#[from] GisError),

    /// The requested dataset tag is not one of the product's datasets.
    #[error("unknown dataset '{tag}' for product {product:?}")]
    UnknownDataset { product: Product, tag: String },

    /// The requested subset is not one of the product's subsets.
    #[error("unknown subset '{subset}' for product {product:?}")]
    UnknownSubset { product: Product, subset: String },

    /// A cached tile path yielded no usable layer name.
    #[error("cannot derive a layer name from tile path {path}")]
    InvalidTileName { path: PathBuf },
}

/// One pipeline run over injected collaborators. The cleanup registry is
/// owned by the pipeline and runs on every exit path of [`Pipeline::execute`].
pub struct Pipeline {
    catalog: CatalogClient,
    fetcher: Fetcher,
    store: Arc<dyn RasterStore>,
    transform: Arc<dyn CoordTransform>,
    cleanup: CleanupRegistry,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        catalog: CatalogClient,
        fetcher: Fetcher,
        store: Arc<dyn RasterStore>,
        transform: Arc<dyn CoordTransform>,
    ) -> Self {
        Self {
            catalog,
            fetcher,
            store,
            transform,
            cleanup: CleanupRegistry::new(),
        }
    }

    /// Runs the full pipeline. Cleanup executes exactly once, on success and
    /// on every failure path alike, before the result is returned.
    ///
    /// # Errors
    ///
    /// Returns the first fatal condition encountered; there is no
    /// partial-success return.
    pub async fn execute(
        &self,
        request: &PipelineRequest,
        progress: &dyn ProgressObserver,
    ) -> Result<PipelineOutcome, PipelineError> {
        let result = self.run(request, progress).await;
        self.cleanup.run_all();
        result
    }

    #[instrument(skip(self, request, progress), fields(product = ?request.product, output = %request.output_layer))]
    async fn run(
        &self,
        request: &PipelineRequest,
        progress: &dyn ProgressObserver,
    ) -> Result<PipelineOutcome, PipelineError> {
        let product = request.product;
        let dataset = match &request.dataset_tag {
            Some(tag) => product
                .dataset(tag)
                .ok_or_else(|| PipelineError::UnknownDataset {
                    product,
                    tag: tag.clone(),
                })?,
            None => product.default_dataset(),
        };
        if let Some(subset) = &request.subset {
            if !product.subsets().contains(&subset.as_str()) {
                return Err(PipelineError::UnknownSubset {
                    product,
                    subset: subset.clone(),
                });
            }
        }

        let bbox = match request.bbox {
            Some(bbox) => bbox,
            None => self.region_bbox(product).await?,
        };

        let page = self
            .catalog
            .query(&QuerySpec {
                product,
                dataset,
                bbox,
                subset_filter: request.subset.as_deref(),
            })
            .await?;
        info!(
            total = page.total,
            needed = page.tiles.len(),
            "catalog query complete"
        );

        let report = reconcile(
            &request.work_dir,
            &page.tiles,
            product.url_naming(),
            &self.cleanup,
        )?;
        report_download_plan(&report);

        if request.dry_run {
            info!("information mode: no files downloaded; re-run without it to fetch");
            return Ok(PipelineOutcome {
                expected_tiles: report.expected_tile_count(),
                imported_tiles: 0,
                reused: report.reusable,
                downloaded: 0,
                dry_run: true,
            });
        }

        let downloaded = self.fetch_needed(&report, progress).await?;

        let mut extracted = Vec::with_capacity(report.tiles.len());
        for tile in &report.tiles {
            if product.is_zipped() {
                extracted.push(extract_payload(
                    &tile.local_path,
                    &request.work_dir,
                    product.extension(),
                    &self.cleanup,
                    request.keep_sources,
                )?);
            } else {
                extracted.push(
                    ExtractedTile::from_raster_path(tile.local_path.clone()).ok_or_else(|| {
                        PipelineError::InvalidTileName {
                            path: tile.local_path.clone(),
                        }
                    })?,
                );
            }
        }

        let units = self.store.map_units().await;
        let resolution = dataset.resolution.for_units(units);
        let resampling = request.resampling.resolve(product);

        let orchestrator =
            ImportOrchestrator::new(self.store.as_ref(), &self.cleanup, request.keep_sources);
        let imported = orchestrator
            .import_and_merge(
                &extracted,
                &request.output_layer,
                resampling,
                resolution,
                report.expected_tile_count(),
            )
            .await?;

        if let Some(table) = product.color_table() {
            self.store
                .apply_color_table(&request.output_layer, table)
                .await?;
        }

        if request.keep_sources {
            info!(
                dir = %request.work_dir.display(),
                "keep-sources set: source tiles remain in the working directory"
            );
        }

        Ok(PipelineOutcome {
            expected_tiles: report.expected_tile_count(),
            imported_tiles: imported,
            reused: report.reusable,
            downloaded,
            dry_run: false,
        })
    }

    /// Downloads every tile marked for fetch, sequentially in catalog order.
    async fn fetch_needed(
        &self,
        report: &ReconciliationReport,
        progress: &dyn ProgressObserver,
    ) -> Result<usize, PipelineError> {
        let total = report.needs_fetch_count();
        let mut downloaded = 0usize;
        for tile in report.tiles.iter().filter(|tile| tile.needs_fetch()) {
            let expected = tile.descriptor.size_in_bytes;
            progress.on_file_start(&tile.descriptor.title, (expected > 0).then_some(expected));
            let task = task_for(&tile.descriptor.download_url, &tile.local_path, expected);
            self.fetcher.fetch(&task, &self.cleanup, progress).await?;
            progress.on_file_complete(&tile.descriptor.title);
            downloaded += 1;
            info!(current = downloaded, total, "download complete");
        }
        Ok(downloaded)
    }

    /// Derives the catalog bbox from the host region through the coordinate
    /// transform collaborator (min corner, then max corner).
    async fn region_bbox(&self, product: Product) -> Result<BoundingBox, PipelineError> {
        let (west, south, east, north) = self.transform.current_region().await?;
        let proj4 = product.srs_proj4();
        let (min_x, min_y) = self.transform.to_srs(west, south, proj4).await?;
        let (max_x, max_y) = self.transform.to_srs(east, north, proj4).await?;
        Ok(BoundingBox {
            west: min_x,
            south: min_y,
            east: max_x,
            north: max_y,
        })
    }
}

/// Logs the download plan: pending size, tile count, and titles.
fn report_download_plan(report: &ReconciliationReport) {
    if report.needs_fetch_count() == 0 {
        info!("all tiles available locally; nothing to download");
        return;
    }
    let titles: Vec<&str> = report
        .tiles
        .iter()
        .filter(|tile| tile.needs_fetch())
        .map(|tile| tile.descriptor.title.as_str())
        .collect();
    info!(
        size = %format_download_size(report.pending_download_bytes()),
        count = report.needs_fetch_count(),
        titles = %titles.join("; "),
        "tiles to download"
    );
    if report.stale > 0 {
        warn!(
            count = report.stale,
            "incomplete local file(s) detected; they will be re-fetched"
        );
    }
}

/// Human-readable byte count for the download plan.
#[must_use]
pub fn format_download_size(bytes: u64) -> String {
    if bytes >= 1_000_000_000 {
        format!("{:.2} GB", bytes as f64 * 1e-9)
    } else if bytes >= 1_000_000 {
        format!("{:.2} MB", bytes as f64 * 1e-6)
    } else {
        format!("{bytes} bytes")
    }
}
