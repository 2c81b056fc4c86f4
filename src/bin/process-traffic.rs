//! Turns a square OD traffic matrix (vehicles/day) into `traffic.json`.
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use flood_eaul::logging::initialize_terminal_logging;
use flood_eaul::traffic::records_from_matrix_csv;

/// Convert an OD matrix CSV into bidirectional traffic records
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// CSV with a `from` column and one column per destination id
    matrix: PathBuf,
    /// Output file
    #[arg(short = 'o', long, default_value = "traffic.json")]
    output: PathBuf,
}

fn main() -> Result<()> {
    initialize_terminal_logging()?;
    let args = Args::parse();

    let reader = BufReader::new(
        File::open(&args.matrix)
            .with_context(|| format!("Failed to open {}", args.matrix.display()))?,
    );
    let records = records_from_matrix_csv(reader)?;

    let mut writer = BufWriter::new(
        File::create(&args.output)
            .with_context(|| format!("Failed to create {}", args.output.display()))?,
    );
    serde_json::to_writer(&mut writer, &records)?;
    writer.flush()?;
    info!(records = records.len(), output = %args.output.display(), "traffic records written");
    Ok(())
}
