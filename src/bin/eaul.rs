//! Computes the baseline EAUL of a road network and the EAUL avoided by each
//! upgrade of each candidate way.
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use tracing::{error, info};

use flood_eaul::config::EaulConfig;
use flood_eaul::eaul::{EaulObserver, JsonDumpObserver, NoopObserver};
use flood_eaul::engine::Scenario;
use flood_eaul::inputs::{
    SourceFiles, load_flood_depths, load_od_points, load_traffic, load_ways, select_ways,
};
use flood_eaul::logging::initialize_logging;
use flood_eaul::model::Way;
use flood_eaul::orchestrator::{Orchestrator, RunDirs, RunInputs};
use flood_eaul::osrm_tools::{OsrmEngine, prepare_base_graph};
use flood_eaul::traffic::TrafficWeights;

/// Expected Annual User Loss of flooding, and the loss avoided by road upgrades
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Source data directory (od.geojson, roadnetwork-osm-ways.json,
    /// flood-depths-current.json, osrm/, optional traffic.json)
    source_dir: PathBuf,
    /// Log directory [default: <source-dir>/eaul-workdir/logs]
    #[arg(short = 'l', long)]
    logs: Option<PathBuf>,
    /// Results directory [default: <source-dir>/eaul-workdir/results]
    #[arg(short = 'o', long)]
    results: Option<PathBuf>,
    /// Comma separated way ids to process [default: all ways]
    #[arg(short = 'w', long, value_delimiter = ',')]
    ways: Option<Vec<String>>,
    /// JSON file overriding the default parameters
    #[arg(long)]
    config: Option<PathBuf>,
    /// OSM extract used to build the base graph in <source-dir>/osrm
    #[arg(long)]
    osm: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let source_dir = fs::canonicalize(&args.source_dir)
        .with_context(|| format!("Source directory {} not found", args.source_dir.display()))
        .inspect_err(|_| print_usage())?;
    let workdir = source_dir.join("eaul-workdir");
    let logs = args.logs.clone().unwrap_or_else(|| workdir.join("logs"));
    let results = args.results.clone().unwrap_or_else(|| workdir.join("results"));

    let log_file = initialize_logging(&logs)?;
    info!(log = %log_file.display(), "logging to file");

    let started = Instant::now();
    let outcome = run(&args, &source_dir, workdir, logs, results);
    info!("Total run time {:.1?}", started.elapsed());
    if let Err(err) = &outcome {
        error!("{:#}", err);
    }
    outcome
}

/// Prints the usage line and a pointer to `--help` after a startup error.
fn print_usage() {
    eprintln!("{}", Args::command().render_usage());
    eprintln!("Run with --help for the expected source directory layout.");
}

/// Everything a run needs before the first scenario is built.
struct Startup {
    config: EaulConfig,
    base: Scenario,
    inputs: RunInputs,
    candidates: Vec<Way>,
}

fn startup(args: &Args, source_dir: &Path) -> Result<Startup> {
    let config = EaulConfig::load(args.config.as_deref())?;
    let files = SourceFiles::new(source_dir);

    let base = match &args.osm {
        Some(osm) => prepare_base_graph(&config.osrm, osm, &files.osrm)
            .context("Failed to prepare the base graph")?,
        None => Scenario::new(&files.osrm, config.osrm.graph_file.clone()),
    };
    if !base.dir().is_dir() {
        bail!("Base graph directory {} not found", base.dir().display());
    }

    let od_points = load_od_points(&files.od)?;
    let ways = load_ways(&files.ways)?;
    let depths = load_flood_depths(&files.flood_depths)?;
    let weights = match load_traffic(&files.traffic)? {
        Some(records) => TrafficWeights::from_records(&records, &od_points),
        None => TrafficWeights::Uniform,
    };

    let candidates = select_ways(&ways, args.ways.as_deref());
    if candidates.is_empty() {
        bail!("No ways to process");
    }
    Ok(Startup {
        config,
        base,
        inputs: RunInputs {
            od_points,
            ways,
            depths,
            weights,
        },
        candidates,
    })
}

fn run(
    args: &Args,
    source_dir: &Path,
    workdir: PathBuf,
    logs: PathBuf,
    results: PathBuf,
) -> Result<()> {
    let Startup {
        config,
        base,
        inputs,
        candidates,
    } = startup(args, source_dir).inspect_err(|_| print_usage())?;
    info!(ways = candidates.len(), upgrades = config.upgrades.len(), "Processing ways");

    for dir in [&workdir, &results] {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let engine = OsrmEngine::new(config.osrm.clone());
    let observer: Box<dyn EaulObserver> = if config.dump_cost_tables {
        Box::new(JsonDumpObserver::new(logs))
    } else {
        Box::new(NoopObserver)
    };
    let orchestrator = Orchestrator::new(
        &engine,
        &config,
        &inputs,
        base,
        RunDirs { workdir, results },
        observer,
    )?;

    let report = orchestrator.run(&candidates)?;
    info!(
        eaul = report.baseline_eaul,
        unroutable_pairs = report.unroutable_pairs,
        written = report.results.len(),
        "Run finished"
    );
    if !report.failed.is_empty() {
        bail!(
            "{} of {} ways failed: {}",
            report.failed.len(),
            candidates.len(),
            report.failed.join(",")
        );
    }
    Ok(())
}
