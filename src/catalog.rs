//! Client for the USGS TNM products catalog API.
//!
//! Issues a bounding-box/product query and parses the response into typed
//! [`RemoteTileDescriptor`]s. The query is read-only; everything that writes
//! to disk happens in later stages.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use crate::product::{DatasetSpec, Product};

/// Production endpoint of the TNM products API.
pub const CATALOG_BASE_URL: &str = "https://tnmaccess.nationalmap.gov/api/v1/products";

/// Timeout for catalog response-header acquisition, in seconds.
pub const CATALOG_TIMEOUT_SECS: u64 = 12;

/// Bounding box in the product's SRS: lon/lat pairs, min corner before max.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    /// `w,s,e,n` string as the catalog's `bbox` parameter expects.
    #[must_use]
    pub fn to_query_value(&self) -> String {
        format!("{},{},{},{}", self.west, self.south, self.east, self.north)
    }
}

/// One tile entry returned by the catalog. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTileDescriptor {
    pub title: String,
    pub download_url: String,
    /// Authoritative expected size of the tile on disk.
    pub size_in_bytes: u64,
    /// Source dataset name (first entry of the catalog's `datasets` array).
    pub dataset: String,
}

/// Parameters of one catalog query.
#[derive(Debug, Clone, Copy)]
pub struct QuerySpec<'a> {
    pub product: Product,
    pub dataset: &'a DatasetSpec,
    pub bbox: BoundingBox,
    /// Case-sensitive substring filter on tile titles, applied before the
    /// tiles are counted as needed.
    pub subset_filter: Option<&'a str>,
}

/// Catalog query result: the catalog's total plus the descriptors that
/// survived the optional subset filter, in catalog (spatially adjacent) order.
#[derive(Debug, Clone)]
pub struct CatalogPage {
    pub total: u64,
    pub tiles: Vec<RemoteTileDescriptor>,
}

/// Errors from the catalog query. All are fatal for the run; none is
/// retried in-process.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog could not be reached before the header timeout.
    #[error("catalog query timed out or could not connect: {source}")]
    Unavailable {
        #[source]
        source: reqwest::Error,
    },

    /// The catalog answered but the response was not usable.
    #[error("catalog protocol error: {message}")]
    Protocol { message: String },

    /// Zero tiles match the query. The caller must adjust bbox or product.
    #[error("zero tiles available for the given product, dataset, and bounding box")]
    NoDataInRegion,
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    total: u64,
    #[serde(default)]
    items: Vec<CatalogItem>,
}

#[derive(Debug, Deserialize)]
struct CatalogItem {
    title: String,
    #[serde(rename = "downloadURL")]
    download_url: String,
    #[serde(rename = "sizeInBytes")]
    size_in_bytes: u64,
    #[serde(default)]
    datasets: Vec<String>,
}

/// HTTP client for the TNM products catalog.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    client: Client,
    base_url: String,
}

impl CatalogClient {
    /// Client against the production catalog with the default 12 s timeout.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static configuration,
    /// which does not happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::with_base_url_and_timeout(CATALOG_BASE_URL, CATALOG_TIMEOUT_SECS)
    }

    /// Client against an explicit endpoint, for tests and mirrors.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the supplied timeout.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn with_base_url_and_timeout(base_url: impl Into<String>, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .gzip(true)
            .build()
            .expect("failed to build catalog HTTP client with static configuration");
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Queries the catalog for tiles intersecting the bbox.
    ///
    /// # Errors
    ///
    /// - [`CatalogError::Unavailable`] on timeout or connection failure
    /// - [`CatalogError::Protocol`] on a non-success status or malformed body
    /// - [`CatalogError::NoDataInRegion`] when nothing matches (also after
    ///   subset filtering)
    #[instrument(skip(self), fields(product = ?spec.product))]
    pub async fn query(&self, spec: &QuerySpec<'_>) -> Result<CatalogPage, CatalogError> {
        let url = self.build_query_url(spec)?;
        debug!(url = %url, "catalog query");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|source| CatalogError::Unavailable { source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Protocol {
                message: format!("catalog returned HTTP {status}"),
            });
        }

        let body: CatalogResponse =
            response
                .json()
                .await
                .map_err(|error| CatalogError::Protocol {
                    message: format!("unable to parse catalog response: {error}"),
                })?;

        if body.total == 0 {
            return Err(CatalogError::NoDataInRegion);
        }

        let tiles: Vec<RemoteTileDescriptor> = body
            .items
            .into_iter()
            .filter(|item| {
                spec.subset_filter
                    .is_none_or(|subset| item.title.contains(subset))
            })
            .map(|item| RemoteTileDescriptor {
                title: item.title,
                download_url: item.download_url,
                size_in_bytes: item.size_in_bytes,
                dataset: item.datasets.into_iter().next().unwrap_or_default(),
            })
            .collect();

        if tiles.is_empty() {
            return Err(CatalogError::NoDataInRegion);
        }

        debug!(total = body.total, needed = tiles.len(), "catalog parsed");
        Ok(CatalogPage {
            total: body.total,
            tiles,
        })
    }

    fn build_query_url(&self, spec: &QuerySpec<'_>) -> Result<Url, CatalogError> {
        let mut url = Url::parse(&self.base_url).map_err(|error| CatalogError::Protocol {
            message: format!("invalid catalog base URL {}: {error}", self.base_url),
        })?;
        url.query_pairs_mut()
            .append_pair(
                "datasets",
                &spec.product.dataset_query_value(spec.dataset),
            )
            .append_pair("bbox", &spec.bbox.to_query_value())
            .append_pair("prodFormats", spec.product.format());
        if let Some(extent) = spec.product.prod_extent() {
            url.query_pairs_mut().append_pair("prodExtents", extent);
        }
        Ok(url)
    }
}

impl Default for CatalogClient {
    fn default() -> Self {
        Self::new()
    }
}
