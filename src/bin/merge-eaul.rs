//! Adds the EAUL results of every way to the road network GeoJSON.
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use flood_eaul::inputs::read_json;
use flood_eaul::logging::initialize_logging;
use flood_eaul::merge::merge_results;

/// Adds the eaul values to the road network
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding the result--<NAME>.json files
    source_dir: PathBuf,
    /// Road network file in GeoJSON format
    #[arg(long)]
    rn: PathBuf,
    /// Output file [default: <source-dir>/roadnetwork-eaul.geojson]
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,
    /// Log directory [default: <source-dir>/logs]
    #[arg(short = 'l', long)]
    logs: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let logs = args.logs.clone().unwrap_or_else(|| args.source_dir.join("logs"));
    initialize_logging(&logs)?;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| args.source_dir.join("roadnetwork-eaul.geojson"));

    let mut road_network: serde_json::Value = read_json(&args.rn)?;
    let missing = merge_results(&mut road_network, &args.source_dir)?;

    if !missing.is_empty() {
        let not_found = logs.join("eaul-merge-not-found.json");
        fs::write(&not_found, serde_json::to_string_pretty(&missing)?)
            .with_context(|| format!("Failed to write {}", not_found.display()))?;
        info!(
            "{} results not found in source folder. Missing written to file.",
            missing.len()
        );
    }

    let mut writer = BufWriter::new(
        File::create(&output).with_context(|| format!("Failed to create {}", output.display()))?,
    );
    serde_json::to_writer(&mut writer, &road_network)?;
    writer.flush()?;
    info!(output = %output.display(), "road network written");
    Ok(())
}
