//! CLI entry point for the tilefetch tool.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use tilefetch::{GrassGis, Pipeline, PipelineRequest, ProgressObserver};
use tilefetch::catalog::CatalogClient;
use tilefetch::fetch::Fetcher;

mod cli;

use cli::Args;

/// Per-file download progress rendered as an indicatif bar.
#[derive(Default)]
struct DownloadBar {
    bar: Mutex<Option<ProgressBar>>,
}

impl ProgressObserver for DownloadBar {
    fn on_file_start(&self, name: &str, expected_total: Option<u64>) {
        let bar = match expected_total {
            Some(total) => {
                let bar = ProgressBar::new(total);
                bar.set_style(
                    ProgressStyle::with_template(
                        "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes}",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
                );
                bar
            }
            None => ProgressBar::new_spinner(),
        };
        bar.set_message(name.to_string());
        *self.bar.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(bar);
    }

    fn on_progress(&self, bytes_downloaded: u64, _expected_total: Option<u64>) {
        if let Some(bar) = self
            .bar
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
        {
            bar.set_position(bytes_downloaded);
        }
    }

    fn on_file_complete(&self, _name: &str) {
        if let Some(bar) = self
            .bar
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            bar.finish_and_clear();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");
    info!("tilefetch starting");

    let gis = Arc::new(GrassGis::new());
    let pipeline = Pipeline::new(
        CatalogClient::new(),
        Fetcher::new(),
        gis.clone(),
        gis,
    );

    let request = PipelineRequest {
        product: args.product,
        dataset_tag: args.dataset,
        subset: args.subset,
        bbox: args.bbox,
        work_dir: args.output_directory,
        output_layer: args.output,
        resampling: args.resampling_method,
        keep_sources: args.keep_sources,
        dry_run: args.info_only,
    };

    let outcome = pipeline.execute(&request, &DownloadBar::default()).await?;

    if outcome.dry_run {
        info!(
            expected = outcome.expected_tiles,
            reused = outcome.reused,
            "information mode complete; re-run without -i to download and import"
        );
    } else {
        info!(
            imported = outcome.imported_tiles,
            expected = outcome.expected_tiles,
            reused = outcome.reused,
            downloaded = outcome.downloaded,
            "pipeline complete"
        );
    }

    Ok(())
}
