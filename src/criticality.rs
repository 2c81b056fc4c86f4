//! Criticality indicator: how much OD travel suffers when a single way is
//! removed from the network, scored 0 to 100 across all ways.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cost_table::CostTableQuery;
use crate::engine::{RoutingEngine, Scenario};
use crate::error::{EaulError, EaulResult};
use crate::model::{CostEntry, PairKey, Way};
use crate::scenario::ScenarioBuilder;

const TIME_WEIGHT: f64 = 0.4;
const UNROUTABLE_WEIGHT: f64 = 0.6;

/// Effect of removing one way, durations in seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WayImpact {
    pub way_id: String,
    pub name: String,
    pub max_delta: f64,
    pub avg_delta: f64,
    /// Mean over the pairs that got slower.
    pub avg_delta_non_zero: f64,
    /// Pairs that became unroutable, or faster (treated as unroutable).
    pub unroutable_pairs: usize,
    pub impacted_pairs: usize,
}

impl WayImpact {
    /// Compares the cost table without `way` against the benchmark.
    pub fn measure(way: &Way, benchmark: &[CostEntry], removed: &[CostEntry]) -> Self {
        let benchmark: HashMap<PairKey, Option<f64>> =
            benchmark.iter().map(|entry| (entry.key, entry.cost)).collect();

        let mut unroutable_pairs = 0;
        let mut impacted_pairs = 0;
        let mut deltas = Vec::new();
        for entry in removed {
            let (Some(cost), Some(Some(base))) = (entry.cost, benchmark.get(&entry.key)) else {
                unroutable_pairs += 1;
                continue;
            };
            let delta = cost - base;
            if delta < 0.0 {
                debug!(way = %way.id, pair = %entry.key, delta, "negative delta, assuming unroutable");
                unroutable_pairs += 1;
                continue;
            }
            if delta > 0.0 {
                impacted_pairs += 1;
            }
            deltas.push(delta);
        }

        let total: f64 = deltas.iter().sum();
        let mean = |count: usize| if count == 0 { 0.0 } else { total / count as f64 };
        Self {
            way_id: way.id.clone(),
            name: way.name().to_string(),
            max_delta: deltas.iter().copied().fold(0.0, f64::max),
            avg_delta: mean(deltas.len()),
            avg_delta_non_zero: mean(impacted_pairs),
            unroutable_pairs,
            impacted_pairs,
        }
    }

    fn weighted_time(&self) -> f64 {
        (self.unroutable_pairs + self.impacted_pairs) as f64 * self.avg_delta_non_zero
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriticalityScore {
    pub way_id: String,
    pub score: f64,
}

/// Normalises every impact against the worst way; 40% time, 60%
/// unroutable pairs.
pub fn scores(impacts: &[WayImpact]) -> Vec<CriticalityScore> {
    let max_time = impacts.iter().map(WayImpact::weighted_time).fold(0.0, f64::max);
    let max_unroutable = impacts.iter().map(|impact| impact.unroutable_pairs).max().unwrap_or(0);

    impacts
        .iter()
        .map(|impact| {
            let time_score = if max_time > 0.0 {
                impact.weighted_time() / max_time
            } else {
                0.0
            };
            let unroutable_score = if max_unroutable > 0 {
                impact.unroutable_pairs as f64 / max_unroutable as f64
            } else {
                0.0
            };
            CriticalityScore {
                way_id: impact.name.clone(),
                score: (time_score * TIME_WEIGHT + unroutable_score * UNROUTABLE_WEIGHT) * 100.0,
            }
        })
        .collect()
}

/// `way_id,score` rows.
pub fn write_scores<W: Write>(writer: W, scores: &[CriticalityScore]) -> Result<(), csv::Error> {
    let mut csv = csv::Writer::from_writer(writer);
    for score in scores {
        csv.serialize(score)?;
    }
    csv.flush()?;
    Ok(())
}

/// Measures every way against the benchmark table of the base graph.
///
/// `query` should report seconds; ways are removed one at a time on `pool`,
/// each in `<workdir>/osrm-<wayId>`.
pub fn measure_ways<E: RoutingEngine>(
    builder: &ScenarioBuilder<'_, E>,
    query: &CostTableQuery<'_, E>,
    pool: &rayon::ThreadPool,
    workdir: &Path,
    ways: &[Way],
) -> EaulResult<Vec<WayImpact>> {
    let table = |scenario: &Scenario| {
        query.compute(scenario).map_err(|source| EaulError::Query {
            scenario: scenario.dir().to_path_buf(),
            source,
        })
    };

    let started = Instant::now();
    let benchmark = table(builder.base())?;
    info!(pairs = benchmark.len(), "benchmark computed in {:.1?}", started.elapsed());

    pool.install(|| {
        ways.par_iter()
            .enumerate()
            .map(|(i, way)| -> EaulResult<WayImpact> {
                let started = Instant::now();
                info!("start for way {}/{} ({})", i + 1, ways.len(), way.id);
                let dir = workdir.join(format!("osrm-{}", way.id));
                let scenario = builder.build(&dir, &[way], None)?;
                let removed = table(&scenario);
                builder.engine().release(&scenario);
                if let Err(err) = fs::remove_dir_all(&dir) {
                    warn!(dir = %dir.display(), error = %err, "could not remove working directory");
                }
                let impact = WayImpact::measure(way, &benchmark, &removed?);
                info!("WAY {} total {:.1?}", way.id, started.elapsed());
                Ok(impact)
            })
            .collect()
    })
}
