//! Routing engine seam.
//!
//! The pipeline only needs three things from a shortest-path engine: an
//! all-pairs duration table, a single route, and re-contraction of a graph
//! after edge speeds change. Concrete engines implement [`RoutingEngine`];
//! tests use an in-memory one.

use std::path::{Path, PathBuf};

use crate::error::EngineError;
use crate::model::Coordinate;

/// Directed durations in seconds, `matrix[from][to]`. `None` where the engine
/// could not route or snap a point.
pub type DurationMatrix = Vec<Vec<Option<f64>>>;

/// A queryable copy of the routing graph living in its own directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scenario {
    dir: PathBuf,
    graph_file: String,
}

impl Scenario {
    pub fn new(dir: impl Into<PathBuf>, graph_file: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            graph_file: graph_file.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn graph_file(&self) -> &str {
        &self.graph_file
    }

    /// Path of the graph artifact, e.g. `<dir>/roadnetwork.osrm`.
    pub fn graph_path(&self) -> PathBuf {
        self.dir.join(&self.graph_file)
    }
}

/// Result of a single route query.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteSummary {
    /// Seconds.
    pub duration: f64,
    /// Graph node ids traversed, in order.
    pub nodes: Vec<String>,
}

pub trait RoutingEngine: Send + Sync {
    /// Durations between every ordered pair of `coordinates` on `scenario`.
    fn table(&self, scenario: &Scenario, coordinates: &[Coordinate])
    -> Result<DurationMatrix, EngineError>;

    /// Fastest route from `from` to `to`. Fails with
    /// [`EngineError::Unroutable`] when no path or snapping segment exists.
    fn route(
        &self,
        scenario: &Scenario,
        from: Coordinate,
        to: Coordinate,
    ) -> Result<RouteSummary, EngineError>;

    /// Applies `speed_file` to the graph of `scenario` and re-contracts it.
    fn contract(&self, scenario: &Scenario, speed_file: &Path) -> Result<(), EngineError>;

    /// Frees whatever the engine holds for `scenario` before its directory
    /// is removed.
    fn release(&self, _scenario: &Scenario) {}
}

impl<E: RoutingEngine + ?Sized> RoutingEngine for &E {
    fn table(
        &self,
        scenario: &Scenario,
        coordinates: &[Coordinate],
    ) -> Result<DurationMatrix, EngineError> {
        (**self).table(scenario, coordinates)
    }

    fn route(
        &self,
        scenario: &Scenario,
        from: Coordinate,
        to: Coordinate,
    ) -> Result<RouteSummary, EngineError> {
        (**self).route(scenario, from, to)
    }

    fn contract(&self, scenario: &Scenario, speed_file: &Path) -> Result<(), EngineError> {
        (**self).contract(scenario, speed_file)
    }

    fn release(&self, scenario: &Scenario) {
        (**self).release(scenario)
    }
}
