//! Way-upgrade orchestration.
//!
//! The baseline family is built and integrated once. Candidate ways are then
//! processed by a fixed set of worker threads; for every upgrade a way gets
//! an upgraded base scenario, its own flood family and an EAUL run, and the
//! avoided loss against the baseline is recorded in one result file per way.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;

use tracing::{debug, error, info, info_span, warn};

use crate::config::{Concurrency, EaulConfig};
use crate::cost_table::CostTableQuery;
use crate::eaul::{EaulAggregator, EaulObserver, EaulOutcome};
use crate::engine::{RoutingEngine, Scenario};
use crate::error::{EaulError, EaulResult};
use crate::exclusion::{ExclusionSet, UnroutablePairTracker};
use crate::flood::FloodDepths;
use crate::model::{Coordinate, OdPoint, RunKind, Upgrade, Way, WayResult};
use crate::scenario::{CancelToken, FloodContext, FloodFamily, ScenarioBuilder, build_flood_family};
use crate::traffic::TrafficWeights;

pub const UNROUTABLE_PAIRS_FILE: &str = "unroutable-pairs.json";

/// Progress of one way. `Failed` can follow any stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WayStage {
    Pending,
    ScenarioBuilding,
    FloodScenariosBuilding,
    EaulComputing,
    ResultWritten,
    CleanedUp,
    Failed,
}

/// Worker pools shared by every way, one per nesting level below ways.
pub struct Pools {
    flood: rayon::ThreadPool,
    query: rayon::ThreadPool,
}

impl Pools {
    pub fn new(concurrency: &Concurrency) -> EaulResult<Self> {
        let flood = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency.flood_scenarios)
            .thread_name(|i| format!("flood-{}", i))
            .build()?;
        let query = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency.od_batches)
            .thread_name(|i| format!("od-{}", i))
            .build()?;
        Ok(Self { flood, query })
    }
}

/// Loaded inputs of a run.
pub struct RunInputs {
    pub od_points: Vec<OdPoint>,
    /// The whole road network; flooding is evaluated on all of it.
    pub ways: Vec<Way>,
    pub depths: FloodDepths,
    pub weights: TrafficWeights,
}

impl RunInputs {
    pub fn coordinates(&self) -> Vec<Coordinate> {
        self.od_points.iter().map(|point| point.coordinate).collect()
    }
}

#[derive(Debug, Clone)]
pub struct RunDirs {
    /// Scenario directories are created below it.
    pub workdir: PathBuf,
    pub results: PathBuf,
}

/// Output of the baseline run, shared read-only by every way.
#[derive(Debug, Clone)]
pub struct Baseline {
    pub outcome: EaulOutcome,
    pub exclusion: ExclusionSet,
}

#[derive(Debug)]
pub struct RunReport {
    pub baseline_eaul: f64,
    pub unroutable_pairs: usize,
    pub results: Vec<WayResult>,
    /// Ids of the ways whose processing failed.
    pub failed: Vec<String>,
}

pub struct Orchestrator<'a, E: RoutingEngine> {
    engine: &'a E,
    config: &'a EaulConfig,
    inputs: &'a RunInputs,
    coordinates: Vec<Coordinate>,
    builder: ScenarioBuilder<'a, E>,
    dirs: RunDirs,
    pools: Pools,
    observer: Box<dyn EaulObserver + 'a>,
}

impl<'a, E: RoutingEngine> Orchestrator<'a, E> {
    pub fn new(
        engine: &'a E,
        config: &'a EaulConfig,
        inputs: &'a RunInputs,
        base: Scenario,
        dirs: RunDirs,
        observer: Box<dyn EaulObserver + 'a>,
    ) -> EaulResult<Self> {
        Ok(Self {
            engine,
            config,
            inputs,
            coordinates: inputs.coordinates(),
            builder: ScenarioBuilder::new(engine, base),
            dirs,
            pools: Pools::new(&config.concurrency)?,
            observer,
        })
    }

    /// Runs the baseline, then every candidate way. A failed way is logged
    /// and reported; the others carry on.
    pub fn run(&self, candidates: &[Way]) -> EaulResult<RunReport> {
        for name in shared_result_names(candidates) {
            warn!(name = %name, "several candidate ways write result--{}.json", name);
        }
        let baseline = &self.run_baseline()?;

        let cursor = &AtomicUsize::new(0);
        let workers = self.config.concurrency.ways.min(candidates.len());
        let mut outcomes: Vec<(usize, EaulResult<WayResult>)> = thread::scope(|s| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    s.spawn(move || {
                        let mut done = Vec::new();
                        loop {
                            let i = cursor.fetch_add(1, Ordering::SeqCst);
                            let Some(way) = candidates.get(i) else { break };
                            done.push((i, self.process_way(way, baseline)));
                        }
                        done
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|handle| match handle.join() {
                    Ok(done) => done,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        });
        outcomes.sort_by_key(|(i, _)| *i);
        for period in &self.config.return_periods {
            remove_in_background(
                self.dirs.workdir.join(format!("osrm-flood-{}", period)),
                "baseline".to_string(),
            );
        }

        let mut results = Vec::new();
        let mut failed = Vec::new();
        for (i, outcome) in outcomes {
            match outcome {
                Ok(result) => results.push(result),
                Err(_) => failed.push(candidates[i].id.clone()),
            }
        }

        Ok(RunReport {
            baseline_eaul: baseline.outcome.eaul,
            unroutable_pairs: baseline.exclusion.unroutable_len(),
            results,
            failed,
        })
    }

    /// Builds the baseline flood family, integrates it and writes the
    /// unroutable-pairs audit file.
    pub fn run_baseline(&self) -> EaulResult<Baseline> {
        let span = info_span!("baseline");
        let _enter = span.enter();
        let started = Instant::now();

        let floods = build_flood_family(
            &self.builder,
            &self.pools.flood,
            &self.dirs.workdir,
            self.flood_context(),
            None,
            &CancelToken::new(),
        )?;

        let tracker = UnroutablePairTracker::with_no_traffic(self.inputs.weights.no_traffic_pairs());
        let (outcome, exclusion) = self
            .aggregator()
            .baseline(self.builder.base(), &floods, tracker)?;
        release_family(self.engine, &floods);
        self.engine.release(self.builder.base());

        let audit = self.dirs.results.join(UNROUTABLE_PAIRS_FILE);
        exclusion
            .persist(&self.inputs.od_points, &audit)
            .map_err(|source| EaulError::Write {
                path: audit.clone(),
                source,
            })?;

        info!(
            eaul = outcome.eaul,
            unroutable = exclusion.unroutable_len(),
            "baseline EAUL computed in {:.1?}",
            started.elapsed()
        );
        Ok(Baseline { outcome, exclusion })
    }

    /// Evaluates every upgrade for one way and writes its result record. The
    /// way's working directory is removed afterwards, whatever the outcome.
    pub fn process_way(&self, way: &Way, baseline: &Baseline) -> EaulResult<WayResult> {
        let span = info_span!("way", id = %way.id, name = %way.name());
        let _enter = span.enter();
        let started = Instant::now();
        let workdir = self.dirs.workdir.join(format!("eaul-work-{}", way.id));
        advance(way, WayStage::Pending);

        let result = self.evaluate_upgrades(way, &workdir, baseline).and_then(|eaul| {
            let result = WayResult {
                id: way.id.clone(),
                name: way.name().to_string(),
                eaul,
            };
            self.write_result(&result)?;
            advance(way, WayStage::ResultWritten);
            Ok(result)
        });

        if let Err(err) = &result {
            advance(way, WayStage::Failed);
            error!(error = %err, "way failed after {:.1?}", started.elapsed());
        } else {
            info!("[UPGRADE WAYS] {} done in {:.1?}", way.id, started.elapsed());
        }
        self.cleanup(way, workdir);
        result
    }

    fn evaluate_upgrades(
        &self,
        way: &Way,
        workdir: &Path,
        baseline: &Baseline,
    ) -> EaulResult<BTreeMap<String, f64>> {
        let mut eaul = BTreeMap::new();
        for upgrade in &self.config.upgrades {
            let avoided = self.evaluate_upgrade(way, upgrade, workdir, baseline)?;
            eaul.insert(upgrade.id.clone(), avoided);
        }
        Ok(eaul)
    }

    fn evaluate_upgrade(
        &self,
        way: &Way,
        upgrade: &Upgrade,
        workdir: &Path,
        baseline: &Baseline,
    ) -> EaulResult<f64> {
        let span = info_span!("upgrade", id = %upgrade.id);
        let _enter = span.enter();
        let started = Instant::now();
        let cancel = CancelToken::new();

        advance(way, WayStage::ScenarioBuilding);
        let upgraded_dir = workdir.join("osrm");
        let upgraded = self
            .pools
            .flood
            .install(|| self.builder.build(&upgraded_dir, &[], Some((way, upgrade.speed))))?;

        advance(way, WayStage::FloodScenariosBuilding);
        let floods = build_flood_family(
            &self.builder,
            &self.pools.flood,
            workdir,
            self.flood_context(),
            Some((way, upgrade)),
            &cancel,
        )?;

        advance(way, WayStage::EaulComputing);
        let run = RunKind::Upgrade {
            way_id: way.id.clone(),
            upgrade_id: upgrade.id.clone(),
        };
        let outcome = self
            .aggregator()
            .run(&run, &upgraded, &floods, &baseline.exclusion)?;
        let avoided = baseline.outcome.eaul - outcome.eaul;

        info!(
            "[UPGRADE WAYS] {} {} avoided {:.4} (upgrade EAUL {:.4}) in {:.1?}",
            way.id,
            upgrade.id,
            avoided,
            outcome.eaul,
            started.elapsed()
        );
        Ok(avoided)
    }

    fn flood_context(&self) -> FloodContext<'_> {
        FloodContext {
            rules: &self.config.flood,
            depths: &self.inputs.depths,
            ways: &self.inputs.ways,
            periods: &self.config.return_periods,
        }
    }

    fn aggregator(&self) -> EaulAggregator<'_, E> {
        let query = CostTableQuery::new(
            self.engine,
            &self.coordinates,
            self.config.cost_strategy,
            self.config.cost_unit_divisor,
        );
        EaulAggregator::new(
            query,
            &self.pools.query,
            &self.config.return_periods,
            &self.inputs.weights,
            self.observer.as_ref(),
        )
    }

    fn write_result(&self, result: &WayResult) -> EaulResult<()> {
        let path = result_path(&self.dirs.results, &result.name);
        if path.exists() {
            warn!(way = %result.id, path = %path.display(), "overwriting existing result file");
        }
        let write = || -> std::io::Result<()> {
            let mut writer = BufWriter::new(File::create(&path)?);
            serde_json::to_writer(&mut writer, result)?;
            writer.flush()
        };
        write().map_err(|source| EaulError::Write {
            path: path.clone(),
            source,
        })
    }

    /// Stops the engine's resources for the way's scenarios, then removes
    /// the directory in the background.
    fn cleanup(&self, way: &Way, workdir: PathBuf) {
        let graph_file = self.builder.base().graph_file();
        self.engine
            .release(&Scenario::new(workdir.join("osrm"), graph_file));
        for period in &self.config.return_periods {
            self.engine.release(&Scenario::new(
                workdir.join(format!("osrm-flood-{}", period)),
                graph_file,
            ));
        }

        remove_in_background(workdir, way.id.clone());
    }
}

/// Removes a released scenario directory on the global rayon pool.
fn remove_in_background(dir: PathBuf, owner: String) {
    rayon::spawn(move || {
        if !dir.exists() {
            return;
        }
        match fs::remove_dir_all(&dir) {
            Ok(()) => debug!(owner = %owner, stage = ?WayStage::CleanedUp, dir = %dir.display(), "directory removed"),
            Err(err) => warn!(
                owner = %owner,
                dir = %dir.display(),
                error = %err,
                "could not remove directory"
            ),
        }
    });
}

/// Result file names written by more than one candidate, or by a way
/// without a name. Those results overwrite each other.
pub fn shared_result_names(ways: &[Way]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for way in ways {
        *counts.entry(way.name()).or_default() += 1;
    }
    let mut shared: Vec<String> = counts
        .into_iter()
        .filter(|(name, count)| name.is_empty() || *count > 1)
        .map(|(name, _)| name.to_string())
        .collect();
    shared.sort();
    shared
}

/// `<results>/result--<name>.json`.
pub fn result_path(results: &Path, way_name: &str) -> PathBuf {
    results.join(format!("result--{}.json", way_name))
}

fn advance(way: &Way, stage: WayStage) {
    debug!(way = %way.id, ?stage, "way stage");
}

fn release_family<E: RoutingEngine>(engine: &E, family: &FloodFamily) {
    for scenario in family.scenarios() {
        engine.release(scenario);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_path_uses_way_name() {
        assert_eq!(
            result_path(Path::new("/tmp/results"), "N1-T8083"),
            PathBuf::from("/tmp/results/result--N1-T8083.json")
        );
    }

    fn way(id: &str, name: Option<&str>) -> Way {
        let tags = match name {
            Some(name) => serde_json::json!({"NAME": name}),
            None => serde_json::json!({}),
        };
        serde_json::from_value(serde_json::json!({"id": id, "nodes": ["1", "2"], "tags": tags}))
            .expect("way fixture")
    }

    #[test]
    fn test_shared_result_names() {
        let ways = [
            way("1", Some("R400")),
            way("2", Some("N1")),
            way("3", Some("R400")),
            way("4", None),
        ];
        assert_eq!(shared_result_names(&ways), vec!["".to_string(), "R400".to_string()]);
        assert!(shared_result_names(&ways[..2]).is_empty());
    }

    #[test]
    fn test_pools_follow_concurrency() {
        let pools = Pools::new(&Concurrency {
            ways: 1,
            flood_scenarios: 2,
            od_batches: 3,
        })
        .expect("pools");
        assert_eq!(pools.flood.current_num_threads(), 2);
        assert_eq!(pools.query.current_num_threads(), 3);
    }
}
