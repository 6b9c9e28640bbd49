//! USGS product catalog configuration.
//!
//! Every supported product is a variant of [`Product`] carrying its
//! configuration as data: catalog title, dataset/resolution table, payload
//! format, SRS, default resampling, and the URL naming rule used to derive
//! local file names. Adding a product means adding a variant here, not
//! threading string comparisons through the pipeline.

use clap::ValueEnum;

/// Supported USGS National Map products.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Product {
    /// National Elevation Dataset (elevation rasters, IMG payloads).
    Ned,
    /// National Land Cover Database (land cover rasters, GeoTIFF payloads).
    Nlcd,
    /// National Agriculture Imagery Program (aerial imagery, JPEG2000).
    Naip,
}

/// Resampling methods accepted by the raster import collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResamplingMethod {
    /// Product-specific default (resolved via [`Product::default_resampling`]).
    Default,
    Nearest,
    Bilinear,
    Bicubic,
    Lanczos,
    #[value(name = "bilinear_f")]
    BilinearF,
    #[value(name = "bicubic_f")]
    BicubicF,
    #[value(name = "lanczos_f")]
    LanczosF,
}

impl ResamplingMethod {
    /// Name understood by the import collaborator.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Nearest => "nearest",
            Self::Bilinear => "bilinear",
            Self::Bicubic => "bicubic",
            Self::Lanczos => "lanczos",
            Self::BilinearF => "bilinear_f",
            Self::BicubicF => "bicubic_f",
            Self::LanczosF => "lanczos_f",
        }
    }

    /// Resolves `Default` to the product's configured method.
    #[must_use]
    pub fn resolve(self, product: Product) -> Self {
        match self {
            Self::Default => product.default_resampling(),
            other => other,
        }
    }
}

/// Map units of the host GIS location, used to pick the target resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapUnits {
    LatLon,
    Meters,
    Feet,
    /// Units could not be determined; the importer infers resolution itself.
    Unknown,
}

/// Target resolution of one dataset, expressed in each supported map unit.
#[derive(Debug, Clone, Copy)]
pub struct ResolutionTable {
    pub degrees: f64,
    pub meters: f64,
    pub feet: f64,
}

impl ResolutionTable {
    /// Resolution in the host location's units, or `None` when unknown.
    #[must_use]
    pub fn for_units(&self, units: MapUnits) -> Option<f64> {
        match units {
            MapUnits::LatLon => Some(self.degrees),
            MapUnits::Meters => Some(self.meters),
            MapUnits::Feet => Some(self.feet),
            MapUnits::Unknown => None,
        }
    }
}

/// One selectable dataset of a product, keyed by the tag the catalog expects.
#[derive(Debug, Clone, Copy)]
pub struct DatasetSpec {
    /// Exact dataset tag required by the catalog API.
    pub tag: &'static str,
    pub resolution: ResolutionTable,
}

/// How a tile's local file name is derived from its download URL.
///
/// NED and NAIP publish path-style URLs (`.../n36w079.zip`); NLCD publishes
/// query-style URLs carrying the name in an `&FNAME=` parameter. The rule is
/// per-product configuration, not universal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlNaming {
    /// Final path segment of the URL.
    PathSegment,
    /// Substring after the last occurrence of the given marker.
    QueryParam(&'static str),
}

const NED_DATASETS: &[DatasetSpec] = &[
    DatasetSpec {
        tag: "1 arc-second",
        resolution: ResolutionTable {
            degrees: 1.0 / 3600.0,
            meters: 30.0,
            feet: 100.0,
        },
    },
    DatasetSpec {
        tag: "1/3 arc-second",
        resolution: ResolutionTable {
            degrees: 1.0 / 3600.0 / 3.0,
            meters: 10.0,
            feet: 30.0,
        },
    },
    DatasetSpec {
        tag: "1/9 arc-second",
        resolution: ResolutionTable {
            degrees: 1.0 / 3600.0 / 9.0,
            meters: 3.0,
            feet: 10.0,
        },
    },
];

const NLCD_RESOLUTION: ResolutionTable = ResolutionTable {
    degrees: 1.0 / 3600.0,
    meters: 30.0,
    feet: 100.0,
};

const NLCD_DATASETS: &[DatasetSpec] = &[
    DatasetSpec {
        tag: "National Land Cover Database (NLCD) - 2001",
        resolution: NLCD_RESOLUTION,
    },
    DatasetSpec {
        tag: "National Land Cover Database (NLCD) - 2006",
        resolution: NLCD_RESOLUTION,
    },
    DatasetSpec {
        tag: "National Land Cover Database (NLCD) - 2011",
        resolution: NLCD_RESOLUTION,
    },
];

const NAIP_DATASETS: &[DatasetSpec] = &[DatasetSpec {
    tag: "Imagery - 1 meter (NAIP)",
    resolution: ResolutionTable {
        degrees: 1.0 / 3600.0 / 27.0,
        meters: 1.0,
        feet: 3.0,
    },
}];

impl Product {
    /// Product title as published by the catalog.
    #[must_use]
    pub fn title(&self) -> &'static str {
        match self {
            Self::Ned => "National Elevation Dataset (NED)",
            Self::Nlcd => "National Land Cover Database (NLCD)",
            Self::Naip => "USDA National Agriculture Imagery Program (NAIP)",
        }
    }

    /// Payload format string for the catalog's `prodFormats` parameter.
    #[must_use]
    pub fn format(&self) -> &'static str {
        match self {
            Self::Ned => "IMG",
            Self::Nlcd => "GeoTIFF",
            Self::Naip => "JPEG2000",
        }
    }

    /// File extension of the payload raster inside each tile.
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Ned => "img",
            Self::Nlcd => "tif",
            Self::Naip => "jp2",
        }
    }

    /// Whether tiles are delivered as ZIP archives.
    #[must_use]
    pub fn is_zipped(&self) -> bool {
        match self {
            Self::Ned | Self::Nlcd => true,
            Self::Naip => false,
        }
    }

    /// proj4 descriptor of the SRS the catalog expects bbox coordinates in.
    #[must_use]
    pub fn srs_proj4(&self) -> &'static str {
        "+proj=longlat +ellps=GRS80 +datum=NAD83 +nodefs"
    }

    /// Resampling method used when the caller picks `default`.
    #[must_use]
    pub fn default_resampling(&self) -> ResamplingMethod {
        match self {
            Self::Ned => ResamplingMethod::Bilinear,
            Self::Nlcd | Self::Naip => ResamplingMethod::Nearest,
        }
    }

    /// Rule for deriving a tile's local file name from its download URL.
    #[must_use]
    pub fn url_naming(&self) -> UrlNaming {
        match self {
            Self::Ned | Self::Naip => UrlNaming::PathSegment,
            Self::Nlcd => UrlNaming::QueryParam("&FNAME="),
        }
    }

    /// Extent string sent as `prodExtents`, for products that require one.
    #[must_use]
    pub fn prod_extent(&self) -> Option<&'static str> {
        match self {
            Self::Nlcd => Some("3 x 3 degree"),
            Self::Ned | Self::Naip => None,
        }
    }

    /// Subset titles selectable within the product, if any.
    #[must_use]
    pub fn subsets(&self) -> &'static [&'static str] {
        match self {
            Self::Nlcd => &[
                "Percent Developed Imperviousness",
                "Percent Tree Canopy",
                "Land Cover",
            ],
            Self::Ned | Self::Naip => &[],
        }
    }

    /// Color table applied to the final output layer, if the product has one.
    #[must_use]
    pub fn color_table(&self) -> Option<&'static str> {
        match self {
            Self::Ned => Some("elevation"),
            Self::Nlcd | Self::Naip => None,
        }
    }

    /// All datasets selectable for this product.
    #[must_use]
    pub fn datasets(&self) -> &'static [DatasetSpec] {
        match self {
            Self::Ned => NED_DATASETS,
            Self::Nlcd => NLCD_DATASETS,
            Self::Naip => NAIP_DATASETS,
        }
    }

    /// Dataset used when the caller does not pick one.
    #[must_use]
    pub fn default_dataset(&self) -> &'static DatasetSpec {
        match self {
            Self::Ned => &NED_DATASETS[1],
            Self::Nlcd => &NLCD_DATASETS[2],
            Self::Naip => &NAIP_DATASETS[0],
        }
    }

    /// Looks up a dataset by its exact catalog tag.
    #[must_use]
    pub fn dataset(&self, tag: &str) -> Option<&'static DatasetSpec> {
        self.datasets().iter().find(|d| d.tag == tag)
    }

    /// Composite `datasets` query value for the catalog.
    ///
    /// The catalog requires an exact string match: NED concatenates product
    /// title and dataset tag, NLCD sends the dataset tag alone, NAIP sends
    /// the product title. Inherited from the external API, not negotiable.
    #[must_use]
    pub fn dataset_query_value(&self, dataset: &DatasetSpec) -> String {
        match self {
            Self::Ned => format!("{} {}", self.title(), dataset.tag),
            Self::Nlcd => dataset.tag.to_string(),
            Self::Naip => self.title().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ned_dataset_query_value_concatenates_title_and_tag() {
        let dataset = Product::Ned.dataset("1/3 arc-second").unwrap();
        assert_eq!(
            Product::Ned.dataset_query_value(dataset),
            "National Elevation Dataset (NED) 1/3 arc-second"
        );
    }

    #[test]
    fn test_nlcd_dataset_query_value_is_dataset_tag() {
        let dataset = Product::Nlcd.default_dataset();
        assert_eq!(
            Product::Nlcd.dataset_query_value(dataset),
            "National Land Cover Database (NLCD) - 2011"
        );
    }

    #[test]
    fn test_naip_dataset_query_value_is_product_title() {
        let dataset = Product::Naip.default_dataset();
        assert_eq!(
            Product::Naip.dataset_query_value(dataset),
            "USDA National Agriculture Imagery Program (NAIP)"
        );
    }

    #[test]
    fn test_default_datasets() {
        assert_eq!(Product::Ned.default_dataset().tag, "1/3 arc-second");
        assert_eq!(
            Product::Nlcd.default_dataset().tag,
            "National Land Cover Database (NLCD) - 2011"
        );
    }

    #[test]
    fn test_dataset_lookup_by_tag() {
        assert!(Product::Ned.dataset("1 arc-second").is_some());
        assert!(Product::Ned.dataset("2 arc-second").is_none());
    }

    #[test]
    fn test_resolution_for_units() {
        let dataset = Product::Ned.dataset("1 arc-second").unwrap();
        assert_eq!(dataset.resolution.for_units(MapUnits::Meters), Some(30.0));
        assert_eq!(dataset.resolution.for_units(MapUnits::Feet), Some(100.0));
        let degrees = dataset.resolution.for_units(MapUnits::LatLon).unwrap();
        assert!((degrees - 1.0 / 3600.0).abs() < f64::EPSILON);
        assert_eq!(dataset.resolution.for_units(MapUnits::Unknown), None);
    }

    #[test]
    fn test_url_naming_per_product() {
        assert_eq!(Product::Ned.url_naming(), UrlNaming::PathSegment);
        assert_eq!(
            Product::Nlcd.url_naming(),
            UrlNaming::QueryParam("&FNAME=")
        );
        assert_eq!(Product::Naip.url_naming(), UrlNaming::PathSegment);
    }

    #[test]
    fn test_only_nlcd_sends_prod_extent() {
        assert_eq!(Product::Ned.prod_extent(), None);
        assert_eq!(Product::Nlcd.prod_extent(), Some("3 x 3 degree"));
        assert_eq!(Product::Naip.prod_extent(), None);
    }

    #[test]
    fn test_only_naip_is_unzipped() {
        assert!(Product::Ned.is_zipped());
        assert!(Product::Nlcd.is_zipped());
        assert!(!Product::Naip.is_zipped());
    }

    #[test]
    fn test_resampling_default_resolves_per_product() {
        assert_eq!(
            ResamplingMethod::Default.resolve(Product::Ned),
            ResamplingMethod::Bilinear
        );
        assert_eq!(
            ResamplingMethod::Default.resolve(Product::Nlcd),
            ResamplingMethod::Nearest
        );
        assert_eq!(
            ResamplingMethod::Lanczos.resolve(Product::Ned),
            ResamplingMethod::Lanczos
        );
    }

    #[test]
    fn test_resampling_method_names_match_collaborator_vocabulary() {
        assert_eq!(ResamplingMethod::BilinearF.as_str(), "bilinear_f");
        assert_eq!(ResamplingMethod::Nearest.as_str(), "nearest");
    }

    #[test]
    fn test_elevation_color_table_only_for_ned() {
        assert_eq!(Product::Ned.color_table(), Some("elevation"));
        assert_eq!(Product::Nlcd.color_table(), None);
    }
}
