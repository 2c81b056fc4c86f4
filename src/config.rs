//! Run configuration. Every field has a default, so a JSON file only needs
//! to list what it overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cost_table::CostStrategy;
use crate::error::InputError;
use crate::flood::FloodRules;
use crate::inputs::read_json;
use crate::model::{ReturnPeriod, Surface, Upgrade};
use crate::osrm_tools::OsrmToolsConfig;

/// Worker pool sizes, one per nesting level. Pools are shared by all ways,
/// so each size is also the global cap for its level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Concurrency {
    /// Ways processed at the same time.
    pub ways: usize,
    /// Flood scenarios (contractions) built at the same time.
    pub flood_scenarios: usize,
    /// Cost table queries, and OD pairs for the route strategy.
    pub od_batches: usize,
}

impl Default for Concurrency {
    fn default() -> Self {
        Self {
            ways: 5,
            flood_scenarios: 5,
            od_batches: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EaulConfig {
    /// Strictly increasing.
    pub return_periods: Vec<ReturnPeriod>,
    pub flood: FloodRules,
    pub upgrades: Vec<Upgrade>,
    pub concurrency: Concurrency,
    pub cost_strategy: CostStrategy,
    /// Engine durations are divided by this (seconds to hours).
    pub cost_unit_divisor: f64,
    /// Dump every cost table into the log directory.
    pub dump_cost_tables: bool,
    pub osrm: OsrmToolsConfig,
}

impl Default for EaulConfig {
    fn default() -> Self {
        Self {
            return_periods: [5, 10, 20, 50, 75, 100, 200, 250, 500, 1000]
                .into_iter()
                .map(ReturnPeriod)
                .collect(),
            flood: FloodRules::default(),
            // Rehabilitating asphalt and upgrading to asphalt give the same
            // road, so only one of them is evaluated.
            upgrades: vec![
                Upgrade::from_ruc("upgrade-rehab-asphalt", 0.23, Surface::Paved),
                Upgrade::from_ruc("upgrade-rehab-gravel", 0.27, Surface::Unpaved),
                Upgrade::from_ruc("rehab-earth", 0.3, Surface::Unpaved),
            ],
            concurrency: Concurrency::default(),
            cost_strategy: CostStrategy::Table,
            cost_unit_divisor: 3600.0,
            dump_cost_tables: false,
            osrm: OsrmToolsConfig::default(),
        }
    }
}

impl EaulConfig {
    /// Defaults, overridden by the JSON file when one is given.
    pub fn load(path: Option<&Path>) -> Result<Self, InputError> {
        let config = match path {
            Some(path) => read_json(path)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), InputError> {
        if self.return_periods.len() < 2 {
            return Err(InputError::Config(
                "at least two return periods are needed".to_string(),
            ));
        }
        if self.return_periods.windows(2).any(|w| w[0] >= w[1]) {
            return Err(InputError::Config(format!(
                "return periods must be strictly increasing: {:?}",
                self.return_periods
            )));
        }
        if self.return_periods.iter().any(|period| period.0 == 0) {
            return Err(InputError::Config("return period 0".to_string()));
        }
        let c = &self.concurrency;
        if c.ways == 0 || c.flood_scenarios == 0 || c.od_batches == 0 {
            return Err(InputError::Config(
                "concurrency bounds must be at least 1".to_string(),
            ));
        }
        if self.cost_unit_divisor <= 0.0 {
            return Err(InputError::Config(
                "cost_unit_divisor must be positive".to_string(),
            ));
        }
        if let Some(upgrade) = self.upgrades.iter().find(|upgrade| upgrade.speed < 0.0) {
            return Err(InputError::Config(format!(
                "upgrade {} has a negative speed",
                upgrade.id
            )));
        }
        Ok(())
    }
}
