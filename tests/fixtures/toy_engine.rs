//! In-process routing engine over a JSON graph file.
//!
//! `contract` applies the speed file to the graph stored in the scenario
//! directory, so copies and overrides behave like an OSRM dataset on disk.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use flood_eaul::engine::{DurationMatrix, RouteSummary, RoutingEngine, Scenario};
use flood_eaul::error::EngineError;
use flood_eaul::model::Coordinate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToyEdge {
    pub from: String,
    pub to: String,
    pub length_km: f64,
    /// km/h; 0 closes the edge.
    pub speed: f64,
}

impl ToyEdge {
    pub fn new(from: &str, to: &str, length_km: f64, speed: f64) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            length_km,
            speed,
        }
    }

    fn seconds(&self) -> Option<f64> {
        (self.speed > 0.0).then(|| self.length_km / self.speed * 3600.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToyGraph {
    pub nodes: BTreeMap<String, [f64; 2]>,
    pub edges: Vec<ToyEdge>,
}

impl ToyGraph {
    pub fn read(path: &Path) -> Result<Self, EngineError> {
        if !path.exists() {
            return Err(EngineError::MissingGraph(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|err| EngineError::Response {
            code: "InvalidGraph".to_string(),
            message: err.to_string(),
        })
    }

    pub fn write(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("graph dir");
        }
        fs::write(path, serde_json::to_string(self).expect("graph json")).expect("write graph");
    }

    fn snap(&self, coordinate: Coordinate) -> Option<&str> {
        self.nodes
            .iter()
            .min_by(|(_, a), (_, b)| {
                let d = |p: &[f64; 2]| (p[0] - coordinate.lon).powi(2) + (p[1] - coordinate.lat).powi(2);
                d(a).total_cmp(&d(b))
            })
            .map(|(id, _)| id.as_str())
    }

    /// Fastest durations from `source` to every reachable node.
    fn durations_from(&self, source: &str) -> BTreeMap<String, (f64, Vec<String>)> {
        let mut settled: BTreeMap<String, (f64, Vec<String>)> = BTreeMap::new();
        let mut frontier: BTreeMap<String, (f64, Vec<String>)> = BTreeMap::new();
        frontier.insert(source.to_string(), (0.0, vec![source.to_string()]));

        while let Some(next) = frontier
            .iter()
            .min_by(|a, b| a.1.0.total_cmp(&b.1.0))
            .map(|(id, _)| id.clone())
        {
            let Some((duration, path)) = frontier.remove(&next) else { break };
            for edge in self.edges.iter().filter(|edge| edge.from == next) {
                let Some(seconds) = edge.seconds() else { continue };
                if settled.contains_key(&edge.to) {
                    continue;
                }
                let candidate = duration + seconds;
                let better = frontier
                    .get(&edge.to)
                    .is_none_or(|(known, _)| candidate < *known);
                if better {
                    let mut extended = path.clone();
                    extended.push(edge.to.clone());
                    frontier.insert(edge.to.clone(), (candidate, extended));
                }
            }
            settled.insert(next, (duration, path));
        }
        settled
    }

    /// Applies `from,to,speed` lines; the last line for an edge wins.
    fn apply_speeds(&mut self, speeds: &str) {
        for line in speeds.lines().filter(|line| !line.trim().is_empty()) {
            let fields: Vec<&str> = line.split(',').collect();
            let [from, to, speed] = fields[..] else { continue };
            let Ok(speed) = speed.parse::<f64>() else { continue };
            for edge in self
                .edges
                .iter_mut()
                .filter(|edge| edge.from == from && edge.to == to)
            {
                edge.speed = speed;
            }
        }
    }
}

/// Records what the pipeline asked of it; optionally fails contractions of
/// scenarios whose path contains a fragment.
#[derive(Debug, Default)]
pub struct ToyEngine {
    contracts: Mutex<Vec<PathBuf>>,
    releases: Mutex<Vec<PathBuf>>,
    tables: AtomicUsize,
    fail_contract_in: Option<String>,
}

impl ToyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_in(fragment: &str) -> Self {
        Self {
            fail_contract_in: Some(fragment.to_string()),
            ..Self::default()
        }
    }

    pub fn contracts(&self) -> Vec<PathBuf> {
        self.contracts.lock().expect("contracts lock").clone()
    }

    pub fn releases(&self) -> Vec<PathBuf> {
        self.releases.lock().expect("releases lock").clone()
    }

    pub fn table_calls(&self) -> usize {
        self.tables.load(Ordering::SeqCst)
    }
}

impl RoutingEngine for ToyEngine {
    fn table(
        &self,
        scenario: &Scenario,
        coordinates: &[Coordinate],
    ) -> Result<DurationMatrix, EngineError> {
        self.tables.fetch_add(1, Ordering::SeqCst);
        let graph = ToyGraph::read(&scenario.graph_path())?;
        let snapped: Vec<Option<&str>> = coordinates.iter().map(|c| graph.snap(*c)).collect();

        Ok(snapped
            .iter()
            .map(|from| {
                let reachable = from.map(|from| graph.durations_from(from)).unwrap_or_default();
                snapped
                    .iter()
                    .map(|to| to.and_then(|to| reachable.get(to)).map(|(seconds, _)| *seconds))
                    .collect()
            })
            .collect())
    }

    fn route(
        &self,
        scenario: &Scenario,
        from: Coordinate,
        to: Coordinate,
    ) -> Result<RouteSummary, EngineError> {
        let graph = ToyGraph::read(&scenario.graph_path())?;
        let (Some(origin), Some(destination)) = (graph.snap(from), graph.snap(to)) else {
            return Err(EngineError::Unroutable { from, to });
        };
        graph
            .durations_from(origin)
            .remove(destination)
            .map(|(duration, nodes)| RouteSummary { duration, nodes })
            .ok_or(EngineError::Unroutable { from, to })
    }

    fn contract(&self, scenario: &Scenario, speed_file: &Path) -> Result<(), EngineError> {
        self.contracts
            .lock()
            .expect("contracts lock")
            .push(scenario.dir().to_path_buf());
        if let Some(fragment) = &self.fail_contract_in {
            if scenario.dir().to_string_lossy().contains(fragment.as_str()) {
                return Err(EngineError::ProcessFailure {
                    command: "osrm-contract".to_string(),
                    status: "exit status: 1".to_string(),
                });
            }
        }
        let mut graph = ToyGraph::read(&scenario.graph_path())?;
        graph.apply_speeds(&fs::read_to_string(speed_file)?);
        graph.write(&scenario.graph_path());
        Ok(())
    }

    fn release(&self, scenario: &Scenario) {
        self.releases
            .lock()
            .expect("releases lock")
            .push(scenario.dir().to_path_buf());
    }
}
