//! OD cost tables: symmetric travel cost for every unordered OD pair.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::{DurationMatrix, RoutingEngine, Scenario};
use crate::error::EngineError;
use crate::model::{Coordinate, CostEntry, PairKey};

/// How pairwise durations are obtained from the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostStrategy {
    /// One all-pairs table query.
    #[default]
    Table,
    /// Two route queries per pair, run in parallel on the current pool.
    Route,
}

/// Folds a directed duration matrix into one entry per pair `i < j`.
///
/// The slower direction wins; a missing duration in either direction makes
/// the pair unroutable. Durations are divided by `unit_divisor`.
pub fn symmetric_entries(matrix: &DurationMatrix, unit_divisor: f64) -> Vec<CostEntry> {
    let n = matrix.len();
    let mut entries = Vec::with_capacity(n * n.saturating_sub(1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            entries.push(symmetric_entry(
                PairKey::new(i, j),
                matrix[i][j],
                matrix[j][i],
                unit_divisor,
            ));
        }
    }
    entries
}

fn symmetric_entry(key: PairKey, ab: Option<f64>, ba: Option<f64>, unit_divisor: f64) -> CostEntry {
    match (ab, ba) {
        (Some(ab), Some(ba)) => CostEntry::routable(key, ab.max(ba) / unit_divisor),
        _ => CostEntry::unroutable(key),
    }
}

/// Cost table query over a fixed OD coordinate set.
pub struct CostTableQuery<'a, E: RoutingEngine> {
    engine: &'a E,
    coordinates: &'a [Coordinate],
    strategy: CostStrategy,
    unit_divisor: f64,
}

impl<'a, E: RoutingEngine> CostTableQuery<'a, E> {
    pub fn new(
        engine: &'a E,
        coordinates: &'a [Coordinate],
        strategy: CostStrategy,
        unit_divisor: f64,
    ) -> Self {
        Self {
            engine,
            coordinates,
            strategy,
            unit_divisor,
        }
    }

    pub fn coordinates(&self) -> &'a [Coordinate] {
        self.coordinates
    }

    /// `n(n-1)/2` entries ordered by `(origin, destination)`.
    pub fn compute(&self, scenario: &Scenario) -> Result<Vec<CostEntry>, EngineError> {
        match self.strategy {
            CostStrategy::Table => {
                let matrix = self.engine.table(scenario, self.coordinates)?;
                let n = self.coordinates.len();
                if matrix.len() != n || matrix.iter().any(|row| row.len() != n) {
                    return Err(EngineError::MalformedTable {
                        expected: n,
                        rows: matrix.len(),
                    });
                }
                Ok(symmetric_entries(&matrix, self.unit_divisor))
            }
            CostStrategy::Route => self.compute_by_routes(scenario),
        }
    }

    fn compute_by_routes(&self, scenario: &Scenario) -> Result<Vec<CostEntry>, EngineError> {
        let n = self.coordinates.len();
        let pairs: Vec<PairKey> = (0..n)
            .flat_map(|i| ((i + 1)..n).map(move |j| PairKey::new(i, j)))
            .collect();

        pairs
            .par_iter()
            .map(|&key| {
                let ab = self.duration(scenario, key.origin, key.destination)?;
                let ba = self.duration(scenario, key.destination, key.origin)?;
                Ok(symmetric_entry(key, ab, ba, self.unit_divisor))
            })
            .collect()
    }

    fn duration(&self, scenario: &Scenario, from: usize, to: usize) -> Result<Option<f64>, EngineError> {
        match self
            .engine
            .route(scenario, self.coordinates[from], self.coordinates[to])
        {
            Ok(route) => Ok(Some(route.duration)),
            Err(EngineError::Unroutable { from, to }) => {
                debug!(%from, %to, "Unroutable OD Pair");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}
