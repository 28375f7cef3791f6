//! Zeropoint lookup tool.
//!
//! Reports the zeropoint value, uncertainty, and validity for a set of
//! exposure identifiers from a JSON calibration table. The records printed
//! here are what the flux calibrator consumes; an exposure missing from the
//! table is reported as an invalid record rather than aborting the lookup.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use cubex::ZeropointRecord;

#[derive(Parser, Debug)]
#[command(
    name = "zeropoint_lookup",
    about = "Report zeropoint records for exposure identifiers",
    long_about = None
)]
struct Args {
    /// JSON table mapping exposure id to {"value":..,"uncertainty":..,"valid":..}
    #[arg(long)]
    table: PathBuf,

    /// Exposure identifiers to look up
    #[arg(required = true)]
    exposures: Vec<String>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let text = std::fs::read_to_string(&args.table)
        .with_context(|| format!("reading zeropoint table {}", args.table.display()))?;
    let table: HashMap<String, ZeropointRecord> =
        serde_json::from_str(&text).context("parsing zeropoint table JSON")?;

    println!(
        "{:<20} {:<12} {:<12} {:<8}",
        "Exposure", "Zeropoint", "Uncertainty", "Valid"
    );
    println!("{:-<52}", "");

    for exposure in &args.exposures {
        match table.get(exposure) {
            Some(record) => {
                println!(
                    "{:<20} {:<12.4} {:<12.4} {:<8}",
                    exposure, record.value, record.uncertainty, record.valid
                );
            }
            None => {
                log::warn!("exposure {exposure} not found in table");
                let record = ZeropointRecord::invalid();
                println!(
                    "{:<20} {:<12} {:<12} {:<8}",
                    exposure, "-", "-", record.valid
                );
            }
        }
    }

    Ok(())
}
