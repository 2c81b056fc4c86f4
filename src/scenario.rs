//! Scenario builder: isolated copies of the base graph with edge speeds
//! overridden for flooded and upgraded ways.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::engine::{RoutingEngine, Scenario};
use crate::error::ScenarioError;
use crate::flood::{FloodDepths, FloodRules};
use crate::model::{ReturnPeriod, Upgrade, Way};

const SPEED_FILE: &str = "speeds.csv";

/// Shared flag telling sibling builds of a failed unit not to start.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Writes one `from,to,speed` line per directed edge of every way, both
/// directions. With `append` the lines are added after the existing ones.
pub fn write_speed_overrides(path: &Path, ways: &[&Way], speed: f64, append: bool) -> io::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)?;
    let mut writer = BufWriter::new(file);
    for way in ways {
        for (a, b) in way.edges() {
            writeln!(writer, "{},{},{}", a, b, speed)?;
            writeln!(writer, "{},{},{}", b, a, speed)?;
        }
    }
    writer.flush()
}

/// Recursively copies `from` into `to`, creating `to`.
pub fn copy_dir(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Builds scenarios from a base graph through an engine's contract step.
pub struct ScenarioBuilder<'e, E: RoutingEngine> {
    engine: &'e E,
    base: Scenario,
}

impl<'e, E: RoutingEngine> ScenarioBuilder<'e, E> {
    pub fn new(engine: &'e E, base: Scenario) -> Self {
        Self { engine, base }
    }

    pub fn base(&self) -> &Scenario {
        &self.base
    }

    pub fn engine(&self) -> &'e E {
        self.engine
    }

    /// Copies the base graph into `dir`, closes `closed` (speed 0) and, when
    /// given, overrides the upgraded way's speed afterwards. An existing `dir`
    /// is replaced.
    pub fn build(
        &self,
        dir: &Path,
        closed: &[&Way],
        upgrade: Option<(&Way, f64)>,
    ) -> Result<Scenario, ScenarioError> {
        if dir.exists() {
            self.engine.release(&Scenario::new(dir, self.base.graph_file()));
            fs::remove_dir_all(dir).map_err(|source| ScenarioError::Copy {
                from: self.base.dir().to_path_buf(),
                to: dir.to_path_buf(),
                source,
            })?;
        }
        copy_dir(self.base.dir(), dir).map_err(|source| ScenarioError::Copy {
            from: self.base.dir().to_path_buf(),
            to: dir.to_path_buf(),
            source,
        })?;
        let scenario = Scenario::new(dir, self.base.graph_file());

        if closed.is_empty() && upgrade.is_none() {
            debug!(dir = %dir.display(), "no overrides, base graph reused as is");
            return Ok(scenario);
        }

        let speed_file = dir.join(SPEED_FILE);
        let speed_file_err = |source| ScenarioError::SpeedFile {
            path: speed_file.clone(),
            source,
        };
        write_speed_overrides(&speed_file, closed, 0.0, false).map_err(speed_file_err)?;
        if let Some((way, speed)) = upgrade {
            write_speed_overrides(&speed_file, &[way], speed, true).map_err(speed_file_err)?;
        }

        self.engine
            .contract(&scenario, &speed_file)
            .map_err(|source| ScenarioError::Contract {
                scenario: dir.to_path_buf(),
                source,
            })?;

        if let Err(err) = fs::remove_file(&speed_file) {
            warn!(file = %speed_file.display(), error = %err, "could not remove speed file");
        }
        Ok(scenario)
    }
}

/// Inputs deciding which ways a flood closes.
#[derive(Debug, Clone, Copy)]
pub struct FloodContext<'a> {
    pub rules: &'a FloodRules,
    pub depths: &'a FloodDepths,
    pub ways: &'a [Way],
    pub periods: &'a [ReturnPeriod],
}

/// One flooded variant of a scenario family.
#[derive(Debug, Clone)]
pub struct FloodScenario {
    pub period: ReturnPeriod,
    pub scenario: Scenario,
    /// Ids of the ways closed at this period.
    pub impassable: Vec<String>,
    /// Hours until the closed ways reopen.
    pub repair_time: f64,
}

/// The flooded scenarios derived from one graph, one per return period.
#[derive(Debug, Clone, Default)]
pub struct FloodFamily {
    pub periods: BTreeMap<ReturnPeriod, FloodScenario>,
}

impl FloodFamily {
    pub fn get(&self, period: ReturnPeriod) -> Option<&FloodScenario> {
        self.periods.get(&period)
    }

    pub fn scenarios(&self) -> impl Iterator<Item = &Scenario> {
        self.periods.values().map(|flood| &flood.scenario)
    }
}

/// Builds `<workdir>/osrm-flood-<T>` for every return period on `pool`.
///
/// When an upgrade is given, the upgraded way's closure is re-evaluated with
/// the upgrade's drainage capacity and its speed override is appended after
/// the closures, so the upgrade speed applies even to a way still flooded.
/// The first failure cancels builds that have not started yet.
pub fn build_flood_family<E: RoutingEngine>(
    builder: &ScenarioBuilder<'_, E>,
    pool: &rayon::ThreadPool,
    workdir: &Path,
    ctx: FloodContext<'_>,
    upgrade: Option<(&Way, &Upgrade)>,
    cancel: &CancelToken,
) -> Result<FloodFamily, ScenarioError> {
    let label = upgrade.map(|(way, _)| way.id.as_str()).unwrap_or("baseline");

    let results: Vec<Result<FloodScenario, ScenarioError>> = pool.install(|| {
        ctx.periods
            .par_iter()
            .map(|&period| {
                if cancel.is_cancelled() {
                    return Err(ScenarioError::Cancelled(period));
                }
                let started = Instant::now();
                let closed = ctx
                    .rules
                    .impassable_ways(ctx.depths, ctx.ways, period, upgrade);
                let repair_time = ctx.rules.repair_time(ctx.depths, &closed, period);
                let dir = workdir.join(format!("osrm-flood-{}", period));
                let upgrade_speed = upgrade.map(|(way, upgrade)| (way, upgrade.speed));

                let built = builder.build(&dir, &closed, upgrade_speed);
                if built.is_err() {
                    cancel.cancel();
                }
                let scenario = built?;
                info!(
                    target: "eaul::scenario",
                    "[IGNORE WAYS] {} {} closed {} ways in {:.1?}",
                    label,
                    period,
                    closed.len(),
                    started.elapsed()
                );
                Ok(FloodScenario {
                    period,
                    scenario,
                    impassable: closed.iter().map(|way| way.id.clone()).collect(),
                    repair_time,
                })
            })
            .collect()
    });

    let mut family = FloodFamily::default();
    let mut cancelled = None;
    for result in results {
        match result {
            Ok(flood) => {
                family.periods.insert(flood.period, flood);
            }
            Err(err @ ScenarioError::Cancelled(_)) => cancelled = cancelled.or(Some(err)),
            Err(err) => return Err(err),
        }
    }
    match cancelled {
        Some(err) => Err(err),
        None => Ok(family),
    }
}
