//! Error types shared by the EAUL pipeline.
//!
//! Each layer has its own enum. Expected conditions (unroutable pairs,
//! zero-traffic pairs) are never errors; they travel as data.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::{Coordinate, ReturnPeriod};

/// Failures raised by a routing engine implementation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no route between {from} and {to}")]
    Unroutable { from: Coordinate, to: Coordinate },

    #[error("routing engine returned {code}: {message}")]
    Response { code: String, message: String },

    #[error("malformed table response: expected {expected}x{expected} durations, got {rows} rows")]
    MalformedTable { expected: usize, rows: usize },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("`{command}` failed: {status}")]
    ProcessFailure { command: String, status: String },

    #[error("osrm-routed did not become ready on port {port} within {timeout_secs}s")]
    StartupTimeout { port: u16, timeout_secs: u64 },

    #[error("scenario graph missing: {0}")]
    MissingGraph(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failures while preparing a routing scenario on disk.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to copy base graph {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    #[error("failed to write speed overrides {path}: {source}")]
    SpeedFile { path: PathBuf, source: io::Error },

    #[error("contraction of {scenario} failed: {source}")]
    Contract {
        scenario: PathBuf,
        source: EngineError,
    },

    #[error("scenario build for return period {0} cancelled")]
    Cancelled(ReturnPeriod),
}

/// Failures while reading the pipeline inputs.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("OD feature {index} has no point coordinates")]
    BadFeature { index: usize },

    #[error("traffic matrix error: {0}")]
    Csv(#[from] csv::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Failures of an EAUL run (baseline or one way/upgrade unit).
#[derive(Debug, Error)]
pub enum EaulError {
    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    #[error("cost table query on {scenario} failed: {source}")]
    Query {
        scenario: PathBuf,
        source: EngineError,
    },

    #[error("no flood scenario for return period {0}")]
    MissingPeriod(ReturnPeriod),

    #[error("return periods must be strictly increasing, got {0:?}")]
    UnorderedPeriods(Vec<ReturnPeriod>),

    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

pub type EaulResult<T> = Result<T, EaulError>;
