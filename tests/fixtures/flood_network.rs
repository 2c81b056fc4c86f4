//! The flood network used by the pipeline tests.
//!
//! ```text
//!        n4
//!       /  \        B: 2 km + 2 km detour, never flooded
//!     n1 -- n2 -- n3 -- n5
//!       A: 1 km + 1 km   C: 1 km spur
//! ```
//!
//! OD points sit on n1, n3 and n5 (indices 0, 1, 2). With the default test
//! config A closes from the 20-year flood and C at the 50-year flood.

#![allow(dead_code)]

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use flood_eaul::config::{Concurrency, EaulConfig};
use flood_eaul::engine::Scenario;
use flood_eaul::flood::{FloodDepths, FloodRules};
use flood_eaul::inputs::od_points_from_features;
use flood_eaul::model::{OdPoint, ReturnPeriod, Surface, Upgrade, Way};
use flood_eaul::orchestrator::{RunDirs, RunInputs};
use flood_eaul::traffic::TrafficWeights;

use super::toy_engine::{ToyEdge, ToyGraph};

pub const GRAPH_FILE: &str = "roadnetwork.osrm";

/// Base graph speed, km/h.
pub const BASE_SPEED: f64 = 60.0;

/// Expected baseline EAUL, worked out by hand:
/// U_10 = 0, U_20 = 336 * 2/60, U_50 = 1080 * 2/60 over the only surviving
/// pair (0, 1), integrated over 1/10, 1/20, 1/50.
pub const BASELINE_EAUL: f64 = 0.988;

/// Expected EAUL avoided by paving A. The paved A still floods at the
/// 50-year return period, but its upgrade speed overrides the closure, so
/// the upgraded network loses nothing.
pub const PAVE_AVOIDED: f64 = BASELINE_EAUL;

/// Pair (0, 1) over the paved A: 2 km at 120 km/h, in hours.
pub const PAVED_A_HOURS: f64 = 2.0 / 120.0;

fn node(id: &str, lon: f64, lat: f64) -> (String, [f64; 2]) {
    (id.to_string(), [lon, lat])
}

fn both_ways(from: &str, to: &str, length_km: f64) -> [ToyEdge; 2] {
    [
        ToyEdge::new(from, to, length_km, BASE_SPEED),
        ToyEdge::new(to, from, length_km, BASE_SPEED),
    ]
}

pub fn base_graph() -> ToyGraph {
    ToyGraph {
        nodes: [
            node("1", 0.0, 0.0),
            node("2", 1.0, 0.0),
            node("3", 2.0, 0.0),
            node("4", 1.0, 1.0),
            node("5", 3.0, 0.0),
        ]
        .into_iter()
        .collect(),
        edges: [
            both_ways("1", "2", 1.0),
            both_ways("2", "3", 1.0),
            both_ways("1", "4", 2.0),
            both_ways("4", "3", 2.0),
            both_ways("3", "5", 1.0),
        ]
        .into_iter()
        .flatten()
        .collect(),
    }
}

pub fn ways() -> Vec<Way> {
    serde_json::from_value(serde_json::json!([
        {
            "type": "way",
            "id": "10",
            "nodes": ["1", "2", "3"],
            "tags": {"NAME": "A", "ROAD_CLASS": "Secondary", "SURF_TYPE": "Asphalt", "Length": 1000}
        },
        {
            "type": "way",
            "id": "20",
            "nodes": ["1", "4", "3"],
            "tags": {"NAME": "B", "ROAD_CLASS": "Tertiary", "SURF_TYPE": "Gravel", "Length": "4000"}
        },
        {
            "type": "way",
            "id": 30,
            "nodes": ["3", "5"],
            "tags": {"NAME": "C", "ROAD_CLASS": "Vicinal", "SURF_TYPE": "Earth", "Length": 500}
        }
    ]))
    .expect("ways fixture")
}

pub fn way(id: &str) -> Way {
    ways()
        .into_iter()
        .find(|way| way.id == id)
        .expect("known way id")
}

/// B is missing on purpose: no flood exposure.
pub fn depths() -> FloodDepths {
    serde_json::from_value(serde_json::json!({
        "A": {"10": 1.0, "20": 1.4, "50": 2.0},
        "C": {"10": 0.5, "20": 0.6, "50": 1.5}
    }))
    .expect("depths fixture")
}

pub fn od_points() -> Vec<OdPoint> {
    let feature = |id: i64, lon: f64, lat: f64| {
        serde_json::json!({
            "type": "Feature",
            "properties": {"OBJECTID": id},
            "geometry": {"type": "Point", "coordinates": [lon, lat]}
        })
    };
    od_points_from_features(vec![
        feature(101, 0.0, 0.0),
        feature(103, 2.0, 0.0),
        feature(105, 3.0, 0.0),
    ])
    .expect("od fixture")
}

pub fn pave() -> Upgrade {
    Upgrade {
        id: "pave".to_string(),
        ruc: 0.2,
        speed: 2.0 * BASE_SPEED,
        drainage_capacity: 1.0,
        surface: Surface::Paved,
        condition: "good".to_string(),
    }
}

pub fn config() -> EaulConfig {
    EaulConfig {
        return_periods: vec![ReturnPeriod(10), ReturnPeriod(20), ReturnPeriod(50)],
        flood: FloodRules {
            design_standard: ReturnPeriod(10),
            ..FloodRules::default()
        },
        upgrades: vec![pave()],
        concurrency: Concurrency {
            ways: 2,
            flood_scenarios: 2,
            od_batches: 2,
        },
        ..EaulConfig::default()
    }
}

pub fn inputs() -> RunInputs {
    RunInputs {
        od_points: od_points(),
        ways: ways(),
        depths: depths(),
        weights: TrafficWeights::Uniform,
    }
}

/// A temporary source tree: `osrm/` with the base graph, plus empty work
/// and results directories.
pub struct Workspace {
    pub root: TempDir,
    pub base: Scenario,
    pub dirs: RunDirs,
}

impl Workspace {
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let osrm = root.path().join("osrm");
        base_graph().write(&osrm.join(GRAPH_FILE));

        let workdir = root.path().join("eaul-workdir");
        let results = workdir.join("results");
        fs::create_dir_all(&results).expect("results dir");

        Self {
            base: Scenario::new(osrm, GRAPH_FILE),
            dirs: RunDirs { workdir, results },
            root,
        }
    }

    pub fn logs(&self) -> std::path::PathBuf {
        let logs = self.dirs.workdir.join("logs");
        fs::create_dir_all(&logs).expect("logs dir");
        logs
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }
}
