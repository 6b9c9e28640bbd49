//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use tilefetch::{BoundingBox, Product, ResamplingMethod};

/// Download, cache, and mosaic USGS National Map raster tiles.
///
/// Queries the TNM catalog for tiles intersecting the current region (or an
/// explicit bounding box), downloads whatever the local cache is missing,
/// and imports the result into the host GIS as a single output layer.
#[derive(Parser, Debug)]
#[command(name = "tilefetch")]
#[command(author, version, about)]
pub struct Args {
    /// USGS product to query
    #[arg(short, long, value_enum)]
    pub product: Product,

    /// Dataset tag within the product (product default when omitted),
    /// e.g. "1/3 arc-second" for NED
    #[arg(short, long)]
    pub dataset: Option<String>,

    /// Subset title filter for products with subsets (NLCD),
    /// e.g. "Land Cover"
    #[arg(short, long)]
    pub subset: Option<String>,

    /// Bounding box in the product SRS as west,south,east,north
    /// (derived from the host region when omitted)
    #[arg(short, long, value_parser = parse_bbox, allow_hyphen_values = true)]
    pub bbox: Option<BoundingBox>,

    /// Directory for tile download and processing
    #[arg(short = 'o', long)]
    pub output_directory: PathBuf,

    /// Name of the output raster layer
    #[arg(short = 'O', long)]
    pub output: String,

    /// Resampling method (product default when "default")
    #[arg(short, long, value_enum, default_value_t = ResamplingMethod::Default)]
    pub resampling_method: ResamplingMethod,

    /// Keep source tiles and per-tile layers after the composite is created
    #[arg(short = 'k', long)]
    pub keep_sources: bool,

    /// Report tile information without downloading or importing anything
    #[arg(short = 'i', long)]
    pub info_only: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Parses `west,south,east,north` with min corners before max.
fn parse_bbox(value: &str) -> Result<BoundingBox, String> {
    let fields: Vec<&str> = value.split(',').map(str::trim).collect();
    if fields.len() != 4 {
        return Err(format!(
            "expected west,south,east,north (4 values), got {}",
            fields.len()
        ));
    }
    let mut coords = [0.0f64; 4];
    for (slot, field) in coords.iter_mut().zip(&fields) {
        *slot = field
            .parse::<f64>()
            .map_err(|_| format!("'{field}' is not a number"))?;
    }
    let [west, south, east, north] = coords;
    if west >= east || south >= north {
        return Err("min corner must precede max corner (west < east, south < north)".to_string());
    }
    Ok(BoundingBox {
        west,
        south,
        east,
        north,
    })
}
