//! Criticality indicator: removes each way in turn and scores the OD travel
//! time it costs.
use std::fs::{self, File};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;

use flood_eaul::config::EaulConfig;
use flood_eaul::cost_table::CostTableQuery;
use flood_eaul::criticality::{measure_ways, scores, write_scores};
use flood_eaul::engine::Scenario;
use flood_eaul::inputs::{SourceFiles, load_od_points, load_ways, select_ways};
use flood_eaul::logging::initialize_logging;
use flood_eaul::osrm_tools::OsrmEngine;
use flood_eaul::scenario::ScenarioBuilder;

/// Score every way of the road network by how much removing it hurts OD travel
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Source data directory (od.geojson, roadnetwork-osm-ways.json, osrm/)
    source_dir: PathBuf,
    /// Output CSV [default: <source-dir>/indicator-criticality.csv]
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,
    /// Log directory [default: <source-dir>/criticality-workdir/logs]
    #[arg(short = 'l', long)]
    logs: Option<PathBuf>,
    /// Comma separated way ids to score [default: all ways]
    #[arg(short = 'w', long, value_delimiter = ',')]
    ways: Option<Vec<String>>,
    /// JSON file overriding the default parameters
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let source_dir = fs::canonicalize(&args.source_dir)
        .with_context(|| format!("Source directory {} not found", args.source_dir.display()))?;
    let workdir = source_dir.join("criticality-workdir");
    initialize_logging(&args.logs.clone().unwrap_or_else(|| workdir.join("logs")))?;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| source_dir.join("indicator-criticality.csv"));

    let started = Instant::now();
    let config = EaulConfig::load(args.config.as_deref())?;
    let files = SourceFiles::new(&source_dir);
    let od_points = load_od_points(&files.od)?;
    let ways = select_ways(&load_ways(&files.ways)?, args.ways.as_deref());
    if ways.is_empty() {
        bail!("No ways to score");
    }
    fs::create_dir_all(&workdir)
        .with_context(|| format!("Failed to create {}", workdir.display()))?;

    let engine = OsrmEngine::new(config.osrm.clone());
    let builder = ScenarioBuilder::new(
        &engine,
        Scenario::new(&files.osrm, config.osrm.graph_file.clone()),
    );
    let coordinates: Vec<_> = od_points.iter().map(|point| point.coordinate).collect();
    // Deltas are compared in seconds.
    let query = CostTableQuery::new(&engine, &coordinates, config.cost_strategy, 1.0);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.concurrency.ways)
        .build()?;

    let impacts = measure_ways(&builder, &query, &pool, &workdir, &ways)?;
    let scores = scores(&impacts);
    let file = File::create(&output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    write_scores(file, &scores)?;

    info!(
        ways = scores.len(),
        impacted = impacts.iter().filter(|impact| impact.impacted_pairs > 0).count(),
        output = %output.display(),
        "Total run time {:.1?}",
        started.elapsed()
    );
    Ok(())
}
