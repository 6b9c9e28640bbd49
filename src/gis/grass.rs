//! GRASS-backed implementation of the GIS collaborator traits.
//!
//! Shells out to the host's command-line tools (`r.import`, `r.patch`,
//! `g.rename`, `g.remove`, `g.region`, `g.proj`, `m.proj`, `r.colors`).
//! Requires a GRASS session environment; outside one every call fails with
//! the tool's own error.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{CoordTransform, GisError, RasterStore};
use crate::product::{MapUnits, ResamplingMethod};

/// Saved-region name used to bracket the patch step.
const TEMP_REGION_NAME: &str = "tilefetch_temp_region";

/// Collaborator session backed by GRASS command-line tools.
#[derive(Debug, Default, Clone)]
pub struct GrassGis;

impl GrassGis {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, tool: &str, args: &[&str]) -> Result<String, GisError> {
        debug!(tool, ?args, "running host GIS tool");
        let output = Command::new(tool)
            .args(args)
            .output()
            .await
            .map_err(|source| GisError::Io {
                tool: tool.to_string(),
                source,
            })?;
        if !output.status.success() {
            return Err(GisError::Command {
                tool: tool.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl RasterStore for GrassGis {
    async fn import(
        &self,
        input: &Path,
        layer: &str,
        resolution: Option<f64>,
        resampling: ResamplingMethod,
    ) -> Result<(), GisError> {
        let input_arg = format!("input={}", input.display());
        let output_arg = format!("output={layer}");
        let resample_arg = format!("resample={}", resampling.as_str());
        let mut args = vec![
            input_arg.as_str(),
            output_arg.as_str(),
            "extent=region",
            resample_arg.as_str(),
        ];
        let resolution_value;
        if let Some(value) = resolution {
            resolution_value = format!("resolution_value={value}");
            args.push("resolution=value");
            args.push(resolution_value.as_str());
        }
        self.run("r.import", &args)
            .await
            .map_err(|error| GisError::Import {
                file: input.display().to_string(),
                message: error.to_string(),
            })?;
        Ok(())
    }

    async fn patch(&self, layers: &[String], output: &str) -> Result<(), GisError> {
        let input_arg = format!("input={}", layers.join(","));
        let output_arg = format!("output={output}");
        self.run("r.patch", &[input_arg.as_str(), output_arg.as_str()])
            .await
            .map_err(|error| GisError::Patch {
                layer: output.to_string(),
                message: error.to_string(),
            })?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), GisError> {
        let raster_arg = format!("raster={from},{to}");
        self.run("g.rename", &[raster_arg.as_str()]).await?;
        Ok(())
    }

    async fn remove(&self, layers: &[String]) -> Result<(), GisError> {
        let name_arg = format!("name={}", layers.join(","));
        self.run("g.remove", &["-f", "type=raster", name_arg.as_str()])
            .await?;
        Ok(())
    }

    async fn push_temp_region(&self, resolution: Option<f64>) -> Result<(), GisError> {
        let save_arg = format!("save={TEMP_REGION_NAME}");
        self.run("g.region", &[save_arg.as_str(), "--overwrite"])
            .await?;
        if let Some(value) = resolution {
            let res_arg = format!("res={value}");
            self.run("g.region", &["-a", res_arg.as_str()]).await?;
        }
        Ok(())
    }

    async fn pop_temp_region(&self) -> Result<(), GisError> {
        let region_arg = format!("region={TEMP_REGION_NAME}");
        self.run("g.region", &[region_arg.as_str()]).await?;
        let name_arg = format!("name={TEMP_REGION_NAME}");
        self.run("g.remove", &["-f", "type=region", name_arg.as_str()])
            .await?;
        Ok(())
    }

    async fn apply_color_table(&self, layer: &str, table: &str) -> Result<(), GisError> {
        let map_arg = format!("map={layer}");
        let color_arg = format!("color={table}");
        self.run("r.colors", &[map_arg.as_str(), color_arg.as_str()])
            .await?;
        Ok(())
    }

    async fn map_units(&self) -> MapUnits {
        match self.run("g.proj", &["-g"]).await {
            Ok(output) => units_from_proj_output(&output),
            Err(error) => {
                warn!(error = %error, "unable to determine map units; importer will infer resolution");
                MapUnits::Unknown
            }
        }
    }
}

#[async_trait]
impl CoordTransform for GrassGis {
    async fn to_srs(&self, x: f64, y: f64, proj4: &str) -> Result<(f64, f64), GisError> {
        let coordinates_arg = format!("coordinates={x},{y}");
        let proj_out_arg = format!("proj_out={proj4}");
        let output = self
            .run(
                "m.proj",
                &[
                    "-d",
                    coordinates_arg.as_str(),
                    proj_out_arg.as_str(),
                    "separator=comma",
                ],
            )
            .await?;
        parse_coord_pair(&output)
    }

    async fn current_region(&self) -> Result<(f64, f64, f64, f64), GisError> {
        let output = self.run("g.region", &["-g"]).await?;
        parse_region_bounds(&output)
    }
}

/// Parses the first two comma-separated fields of a transform result line.
fn parse_coord_pair(output: &str) -> Result<(f64, f64), GisError> {
    let line = output.lines().next().unwrap_or("");
    let mut fields = line.split(',');
    let parse = |field: Option<&str>| {
        field
            .map(str::trim)
            .and_then(|value| value.parse::<f64>().ok())
    };
    match (parse(fields.next()), parse(fields.next())) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(GisError::CoordParse {
            output: line.to_string(),
        }),
    }
}

/// Parses `w=`, `s=`, `e=`, `n=` from `g.region -g` key=value output.
fn parse_region_bounds(output: &str) -> Result<(f64, f64, f64, f64), GisError> {
    let lookup = |key: &str| {
        output.lines().find_map(|line| {
            line.strip_prefix(key)
                .and_then(|rest| rest.strip_prefix('='))
                .and_then(|value| value.trim().parse::<f64>().ok())
        })
    };
    match (lookup("w"), lookup("s"), lookup("e"), lookup("n")) {
        (Some(w), Some(s), Some(e), Some(n)) => Ok((w, s, e, n)),
        _ => Err(GisError::CoordParse {
            output: output.trim().to_string(),
        }),
    }
}

/// Derives map units from `g.proj -g` key=value output.
fn units_from_proj_output(output: &str) -> MapUnits {
    let value_of = |key: &str| {
        output.lines().find_map(|line| {
            line.strip_prefix(key)
                .and_then(|rest| rest.strip_prefix('='))
                .map(str::trim)
        })
    };
    if value_of("proj") == Some("ll") {
        return MapUnits::LatLon;
    }
    match value_of("meters").and_then(|value| value.parse::<f64>().ok()) {
        Some(meters) if (meters - 1.0).abs() < f64::EPSILON => MapUnits::Meters,
        Some(_) => MapUnits::Feet,
        None => MapUnits::Unknown,
    }
}
