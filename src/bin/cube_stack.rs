//! Cube-combination tool.
//!
//! Reads a list of exposure cubes, combines them voxel-by-voxel with
//! outlier-rejecting inverse-variance weighting, and writes one stacked
//! cube. Optionally writes the white-light collapse of the stack for
//! quick-look inspection.
//!
//! Exit status is zero on success and nonzero on any unrecoverable input
//! error, such as mismatched grids with no offsets supplied.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;

use cubex::detect::collapse;
use cubex::io::{read_cube, write_collapse_image, write_cube};
use cubex::stack::{stack_cubes, StackConfig};
use cubex::SpatialOffset;

#[derive(Parser, Debug)]
#[command(
    name = "cube_stack",
    about = "Combine dithered exposure cubes into one stacked cube",
    long_about = None
)]
struct Args {
    /// Input cube files, one per exposure
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output path for the stacked cube
    #[arg(short, long)]
    output: PathBuf,

    /// Minimum number of valid contributors per voxel
    #[arg(long, default_value_t = 1)]
    min_valid: usize,

    /// Outlier rejection threshold in units of each value's own sigma
    #[arg(long, default_value_t = 3.0)]
    clip_sigma: f64,

    /// Iteration cap for the rejection loop
    #[arg(long, default_value_t = 5)]
    clip_iterations: usize,

    /// JSON file with per-exposure spatial offsets [{"dx":..,"dy":..},..];
    /// required when the exposures are dithered
    #[arg(long)]
    offsets: Option<PathBuf>,

    /// Also write the white-light collapse of the stack to this path
    #[arg(long)]
    white_light: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct OffsetEntry {
    dx: f64,
    dy: f64,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let progress = ProgressBar::new(args.inputs.len() as u64).with_style(
        ProgressStyle::with_template("{msg} [{bar:32}] {pos}/{len}")
            .expect("valid progress template"),
    );
    progress.set_message("reading cubes");

    let mut cubes = Vec::with_capacity(args.inputs.len());
    for path in &args.inputs {
        let cube = read_cube(path).with_context(|| format!("reading cube {}", path.display()))?;
        cubes.push(cube);
        progress.inc(1);
    }
    progress.finish_and_clear();

    let offsets = match &args.offsets {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading offsets {}", path.display()))?;
            let entries: Vec<OffsetEntry> =
                serde_json::from_str(&text).context("parsing offsets JSON")?;
            Some(
                entries
                    .into_iter()
                    .map(|e| SpatialOffset { dx: e.dx, dy: e.dy })
                    .collect::<Vec<_>>(),
            )
        }
        None => None,
    };

    let config = StackConfig {
        min_valid_inputs: args.min_valid,
        clip_sigma: args.clip_sigma,
        clip_iterations: args.clip_iterations,
    };

    log::info!(
        "stacking {} cubes (clip {:.1} sigma, {} iterations)",
        cubes.len(),
        config.clip_sigma,
        config.clip_iterations
    );
    let stacked = stack_cubes(&cubes, offsets.as_deref(), &config).context("stacking cubes")?;

    write_cube(&stacked, &args.output)
        .with_context(|| format!("writing stacked cube {}", args.output.display()))?;
    log::info!("wrote stacked cube to {}", args.output.display());

    if let Some(path) = &args.white_light {
        let map = collapse(&stacked);
        write_collapse_image(&map.signal, "WHITE", path)
            .with_context(|| format!("writing white-light image {}", path.display()))?;
        log::info!("wrote white-light image to {}", path.display());
    }

    Ok(())
}
