//! Expected Annual User Loss.
//!
//! For one scenario family (a base graph and its flooded variants) the
//! aggregator queries every cost table, drops excluded pairs, turns the cost
//! increase of each flood into an increased user cost
//!
//! ```text
//! U_T = r(T) * sum over pairs of (cost_T - cost_base) * traffic
//! ```
//!
//! and integrates it over exceedance probability with the trapezoidal rule
//!
//! ```text
//! EAUL = 1/2 * sum over i of (1/T_i - 1/T_{i+1}) * (U_i + U_{i+1})
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::cost_table::CostTableQuery;
use crate::engine::{RoutingEngine, Scenario};
use crate::error::{EaulError, EaulResult};
use crate::exclusion::{ExclusionSet, UnroutablePairTracker};
use crate::model::{CostEntry, PairKey, ReturnPeriod, RunKind};
use crate::scenario::FloodFamily;
use crate::traffic::TrafficWeights;

/// Extension points called while a run progresses. Implementations must not
/// fail the run.
pub trait EaulObserver: Send + Sync {
    /// A cost table was computed; `period` is `None` for the unflooded graph.
    fn cost_table(&self, _run: &RunKind, _period: Option<ReturnPeriod>, _entries: &[CostEntry]) {}

    fn integrated(&self, _run: &RunKind, _outcome: &EaulOutcome) {}
}

pub struct NoopObserver;

impl EaulObserver for NoopObserver {}

/// Dumps every cost table as JSON next to the run logs.
pub struct JsonDumpObserver {
    dir: PathBuf,
}

impl JsonDumpObserver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn dump<T: Serialize + ?Sized>(&self, name: &str, value: &T) {
        let path = self.dir.join(name);
        let written = File::create(&path).map_err(serde_json::Error::io).and_then(|file| {
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, value)?;
            writer.flush().map_err(serde_json::Error::io)
        });
        if let Err(err) = written {
            warn!(path = %path.display(), error = %err, "could not dump cost table");
        }
    }
}

impl EaulObserver for JsonDumpObserver {
    fn cost_table(&self, run: &RunKind, period: Option<ReturnPeriod>, entries: &[CostEntry]) {
        let name = match period {
            None => format!("no-flood--{}.json", run),
            Some(period) => format!("flood-{}--{}.json", period, run),
        };
        self.dump(&name, entries);
    }

    fn integrated(&self, run: &RunKind, outcome: &EaulOutcome) {
        self.dump(&format!("eaul--{}.json", run), &outcome.losses);
    }
}

/// Increased user cost of one flood period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodLoss {
    pub period: ReturnPeriod,
    /// Hours.
    pub repair_time: f64,
    /// `U_T`, summed over the surviving pairs.
    pub increased_cost: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EaulOutcome {
    pub eaul: f64,
    pub losses: Vec<PeriodLoss>,
    /// EAUL per surviving pair; sums to `eaul`.
    pub per_pair: BTreeMap<PairKey, f64>,
    /// (pair, period) combinations without a defined cost, counted as 0.
    pub undefined: usize,
}

/// Trapezoidal rule in exceedance-probability space.
///
/// `periods` must be strictly increasing and `losses[i]` belongs to
/// `periods[i]`.
pub fn trapezoid(periods: &[ReturnPeriod], losses: &[f64]) -> f64 {
    debug_assert_eq!(periods.len(), losses.len());
    let sum: f64 = periods
        .windows(2)
        .zip(losses.windows(2))
        .map(|(t, u)| {
            (t[0].exceedance_probability() - t[1].exceedance_probability()) * (u[0] + u[1])
        })
        .sum();
    0.5 * sum
}

/// Cost tables of one scenario family, before filtering.
#[derive(Debug, Clone)]
pub struct RunCosts {
    pub baseline: Vec<CostEntry>,
    /// In return period order, with the repair time of each period.
    pub floods: Vec<(ReturnPeriod, f64, Vec<CostEntry>)>,
}

/// Integrates already filtered cost tables.
pub fn integrate(costs: &RunCosts, weights: &TrafficWeights) -> EaulOutcome {
    let baseline: HashMap<PairKey, Option<f64>> = costs
        .baseline
        .iter()
        .map(|entry| (entry.key, entry.cost))
        .collect();
    let periods: Vec<ReturnPeriod> = costs.floods.iter().map(|(period, _, _)| *period).collect();

    let mut per_pair_losses: BTreeMap<PairKey, Vec<f64>> = costs
        .baseline
        .iter()
        .map(|entry| (entry.key, vec![0.0; periods.len()]))
        .collect();
    let mut undefined = 0;

    for (i, (_, repair_time, flood)) in costs.floods.iter().enumerate() {
        for entry in flood {
            let (Some(losses), Some(Some(base))) =
                (per_pair_losses.get_mut(&entry.key), baseline.get(&entry.key))
            else {
                undefined += 1;
                continue;
            };
            match entry.cost {
                Some(cost) => {
                    losses[i] = repair_time * (cost - base) * weights.weight(entry.key);
                }
                None => undefined += 1,
            }
        }
    }

    let losses: Vec<PeriodLoss> = costs
        .floods
        .iter()
        .enumerate()
        .map(|(i, (period, repair_time, _))| PeriodLoss {
            period: *period,
            repair_time: *repair_time,
            increased_cost: per_pair_losses.values().map(|losses| losses[i]).sum(),
        })
        .collect();

    let totals: Vec<f64> = losses.iter().map(|loss| loss.increased_cost).collect();
    let per_pair = per_pair_losses
        .into_iter()
        .map(|(key, losses)| (key, trapezoid(&periods, &losses)))
        .collect();

    EaulOutcome {
        eaul: trapezoid(&periods, &totals),
        losses,
        per_pair,
        undefined,
    }
}

/// Computes EAUL values for scenario families over a fixed OD set.
pub struct EaulAggregator<'a, E: RoutingEngine> {
    query: CostTableQuery<'a, E>,
    pool: &'a rayon::ThreadPool,
    periods: &'a [ReturnPeriod],
    weights: &'a TrafficWeights,
    observer: &'a dyn EaulObserver,
}

impl<'a, E: RoutingEngine> EaulAggregator<'a, E> {
    /// `pool` runs the cost table queries.
    pub fn new(
        query: CostTableQuery<'a, E>,
        pool: &'a rayon::ThreadPool,
        periods: &'a [ReturnPeriod],
        weights: &'a TrafficWeights,
        observer: &'a dyn EaulObserver,
    ) -> Self {
        Self {
            query,
            pool,
            periods,
            weights,
            observer,
        }
    }

    /// The baseline run: feeds `tracker` with every flood table, freezes it
    /// and integrates over the surviving pairs.
    pub fn baseline(
        &self,
        base: &Scenario,
        floods: &FloodFamily,
        mut tracker: UnroutablePairTracker,
    ) -> EaulResult<(EaulOutcome, ExclusionSet)> {
        let run = RunKind::Baseline;
        let costs = self.collect(&run, base, floods)?;
        for (period, _, table) in &costs.floods {
            tracker.record_observations(*period, table);
        }
        let exclusion = tracker.finalize();
        let outcome = self.finish(&run, &costs, &exclusion);
        Ok((outcome, exclusion))
    }

    /// Any run after the baseline, filtered by the frozen exclusion set.
    pub fn run(
        &self,
        run: &RunKind,
        base: &Scenario,
        floods: &FloodFamily,
        exclusion: &ExclusionSet,
    ) -> EaulResult<EaulOutcome> {
        let costs = self.collect(run, base, floods)?;
        Ok(self.finish(run, &costs, exclusion))
    }

    fn finish(&self, run: &RunKind, costs: &RunCosts, exclusion: &ExclusionSet) -> EaulOutcome {
        let filtered = RunCosts {
            baseline: exclusion.filter(&costs.baseline),
            floods: costs
                .floods
                .iter()
                .map(|(period, repair_time, table)| (*period, *repair_time, exclusion.filter(table)))
                .collect(),
        };
        let outcome = integrate(&filtered, self.weights);
        if outcome.undefined > 0 {
            warn!(
                run = %run,
                undefined = outcome.undefined,
                "pairs unroutable outside the baseline exclusion set counted as 0"
            );
        }
        self.observer.integrated(run, &outcome);
        outcome
    }

    /// Queries the unflooded table and one table per period on the pool.
    pub fn collect(&self, run: &RunKind, base: &Scenario, floods: &FloodFamily) -> EaulResult<RunCosts> {
        if self.periods.windows(2).any(|w| w[0] >= w[1]) {
            return Err(EaulError::UnorderedPeriods(self.periods.to_vec()));
        }
        let flood_scenarios = self
            .periods
            .iter()
            .map(|&period| floods.get(period).ok_or(EaulError::MissingPeriod(period)))
            .collect::<EaulResult<Vec<_>>>()?;

        let started = Instant::now();
        let query = |scenario: &Scenario| {
            self.query
                .compute(scenario)
                .map_err(|source| EaulError::Query {
                    scenario: scenario.dir().to_path_buf(),
                    source,
                })
        };

        let (baseline, floods) = self.pool.install(|| {
            rayon::join(
                || query(base),
                || {
                    flood_scenarios
                        .par_iter()
                        .map(|flood| -> EaulResult<(ReturnPeriod, f64, Vec<CostEntry>)> {
                            let table = query(&flood.scenario)?;
                            self.observer.cost_table(run, Some(flood.period), &table);
                            Ok((flood.period, flood.repair_time, table))
                        })
                        .collect::<EaulResult<Vec<_>>>()
                },
            )
        });
        let baseline = baseline?;
        self.observer.cost_table(run, None, &baseline);
        let floods = floods?;

        info!(
            run = %run,
            pairs = baseline.len(),
            "cost tables ready in {:.1?}",
            started.elapsed()
        );
        Ok(RunCosts { baseline, floods })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(costs: &[(usize, usize, Option<f64>)]) -> Vec<CostEntry> {
        costs
            .iter()
            .map(|&(o, d, cost)| CostEntry {
                key: PairKey::new(o, d),
                cost,
            })
            .collect()
    }

    #[test]
    fn test_trapezoid_matches_hand_computation() {
        let eaul = trapezoid(&[ReturnPeriod(10), ReturnPeriod(20)], &[100.0, 50.0]);
        assert!((eaul - 3.75).abs() < 1e-12);
    }

    #[test]
    fn test_trapezoid_three_periods() {
        // 0.5 * ((0.2 - 0.1) * (10 + 20) + (0.1 - 0.02) * (20 + 40)) = 0.5 * (3 + 4.8)
        let eaul = trapezoid(
            &[ReturnPeriod(5), ReturnPeriod(10), ReturnPeriod(50)],
            &[10.0, 20.0, 40.0],
        );
        assert!((eaul - 3.9).abs() < 1e-12);
    }

    #[test]
    fn test_integrate_weights_and_repair_time() {
        let costs = RunCosts {
            baseline: entries(&[(0, 1, Some(1.0)), (0, 2, Some(2.0))]),
            floods: vec![
                (ReturnPeriod(10), 10.0, entries(&[(0, 1, Some(11.0)), (0, 2, Some(2.0))])),
                (ReturnPeriod(20), 10.0, entries(&[(0, 1, Some(6.0)), (0, 2, Some(2.0))])),
            ],
        };
        let outcome = integrate(&costs, &TrafficWeights::Uniform);
        assert_eq!(outcome.losses[0].increased_cost, 100.0);
        assert_eq!(outcome.losses[1].increased_cost, 50.0);
        assert!((outcome.eaul - 3.75).abs() < 1e-12);
        assert!((outcome.per_pair[&PairKey::new(0, 1)] - 3.75).abs() < 1e-12);
        assert_eq!(outcome.per_pair[&PairKey::new(0, 2)], 0.0);
        assert_eq!(outcome.undefined, 0);
    }

    #[test]
    fn test_fully_excluded_pair_contributes_zero() {
        let mut tracker = UnroutablePairTracker::new();
        let flood = entries(&[(0, 1, None), (0, 2, Some(3.0))]);
        tracker.record_observations(ReturnPeriod(10), &flood);
        let exclusion = tracker.finalize();

        let baseline = entries(&[(0, 1, Some(1.0)), (0, 2, Some(2.0))]);
        let costs = RunCosts {
            baseline: exclusion.filter(&baseline),
            floods: vec![
                (ReturnPeriod(10), 1.0, exclusion.filter(&flood)),
                (ReturnPeriod(20), 1.0, exclusion.filter(&entries(&[(0, 1, None), (0, 2, Some(3.0))]))),
            ],
        };
        let outcome = integrate(&costs, &TrafficWeights::Uniform);
        assert!(outcome.eaul.is_finite());
        assert!(!outcome.per_pair.contains_key(&PairKey::new(0, 1)));
        // Only pair 0-2 remains: 0.5 * (0.1 - 0.05) * (1 + 1)
        assert!((outcome.eaul - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_everything_excluded_is_zero_not_nan() {
        let costs = RunCosts {
            baseline: Vec::new(),
            floods: vec![(ReturnPeriod(10), 5.0, Vec::new()), (ReturnPeriod(20), 5.0, Vec::new())],
        };
        let outcome = integrate(&costs, &TrafficWeights::Uniform);
        assert_eq!(outcome.eaul, 0.0);
        assert!(outcome.per_pair.is_empty());
    }

    #[test]
    fn test_unroutable_survivor_counts_as_undefined() {
        let costs = RunCosts {
            baseline: entries(&[(0, 1, Some(1.0))]),
            floods: vec![
                (ReturnPeriod(10), 1.0, entries(&[(0, 1, None)])),
                (ReturnPeriod(20), 1.0, entries(&[(0, 1, Some(2.0))])),
            ],
        };
        let outcome = integrate(&costs, &TrafficWeights::Uniform);
        assert_eq!(outcome.undefined, 1);
        assert!(outcome.eaul.is_finite());
    }
}
