//! Flood exposure rules: impassability, severity and repair time.
//!
//! Everything here is pure; the water levels come from the flood depth
//! table loaded by [`crate::inputs`].

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::model::{ReturnPeriod, RoadClass, Surface, Upgrade, Way};

/// Water level (m) per way name per return period.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct FloodDepths(HashMap<String, BTreeMap<ReturnPeriod, f64>>);

impl FloodDepths {
    pub fn new(depths: HashMap<String, BTreeMap<ReturnPeriod, f64>>) -> Self {
        Self(depths)
    }

    pub fn water_level(&self, way_name: &str, period: ReturnPeriod) -> Option<f64> {
        self.0.get(way_name).and_then(|levels| levels.get(&period)).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Upper bounds (m) of the low and medium severity bands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityBands {
    pub low_max: f64,
    pub medium_max: f64,
}

impl Default for SeverityBands {
    fn default() -> Self {
        Self {
            low_max: 0.5,
            medium_max: 1.5,
        }
    }
}

impl SeverityBands {
    pub fn classify(&self, water_level: f64) -> Severity {
        if water_level > self.medium_max {
            Severity::High
        } else if water_level > self.low_max {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

/// Repair time in hours per km of road.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepairTimeTable(BTreeMap<Severity, BTreeMap<Surface, BTreeMap<RoadClass, f64>>>);

impl Default for RepairTimeTable {
    fn default() -> Self {
        let row = |paved: f64, unpaved: f64| {
            let classes = |hours: f64| {
                [
                    RoadClass::Primary,
                    RoadClass::Secondary,
                    RoadClass::Tertiary,
                    RoadClass::Vicinal,
                ]
                .into_iter()
                .map(|class| (class, hours))
                .collect::<BTreeMap<_, _>>()
            };
            BTreeMap::from([
                (Surface::Paved, classes(paved)),
                (Surface::Unpaved, classes(unpaved)),
            ])
        };

        Self(BTreeMap::from([
            (Severity::Low, row(168.0, 1440.0)),
            (Severity::Medium, row(336.0, 2160.0)),
            (Severity::High, row(1056.0, 4320.0)),
        ]))
    }
}

impl RepairTimeTable {
    /// Hours per km; a combination missing from the table repairs instantly.
    pub fn hours_per_km(&self, severity: Severity, surface: Surface, class: RoadClass) -> f64 {
        self.0
            .get(&severity)
            .and_then(|surfaces| surfaces.get(&surface))
            .and_then(|classes| classes.get(&class))
            .copied()
            .unwrap_or(0.0)
    }
}

/// Thresholds deciding when a way is closed by a flood and how long it stays closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FloodRules {
    /// Return period the road network was designed for.
    pub design_standard: ReturnPeriod,
    pub default_drainage_capacity: f64,
    /// Excess water level (m) above which a way is impassable.
    pub impassable_threshold: f64,
    pub severity: SeverityBands,
    pub repair_time: RepairTimeTable,
}

impl Default for FloodRules {
    fn default() -> Self {
        Self {
            design_standard: ReturnPeriod(20),
            default_drainage_capacity: 0.7,
            impassable_threshold: 0.5,
            severity: SeverityBands::default(),
            repair_time: RepairTimeTable::default(),
        }
    }
}

/// `(WLcc - WLd * Dc) > threshold`, strictly.
pub fn exceeds_drainage(
    water_level: f64,
    design_level: f64,
    drainage_capacity: f64,
    threshold: f64,
) -> bool {
    water_level - design_level * drainage_capacity > threshold
}

impl FloodRules {
    /// Whether `way` is closed at `period` given its drainage capacity.
    pub fn is_impassable(
        &self,
        depths: &FloodDepths,
        way: &Way,
        period: ReturnPeriod,
        drainage_capacity: f64,
    ) -> bool {
        let (Some(level), Some(design)) = (
            depths.water_level(way.name(), period),
            depths.water_level(way.name(), self.design_standard),
        ) else {
            return false;
        };
        exceeds_drainage(level, design, drainage_capacity, self.impassable_threshold)
    }

    /// Ways closed at `period`. The upgraded way, if any, is evaluated with the
    /// upgrade's drainage capacity instead of the default one.
    pub fn impassable_ways<'a>(
        &self,
        depths: &FloodDepths,
        ways: &'a [Way],
        period: ReturnPeriod,
        upgrade: Option<(&Way, &Upgrade)>,
    ) -> Vec<&'a Way> {
        ways.iter()
            .filter(|way| {
                let drainage = match upgrade {
                    Some((upgraded, upgrade)) if upgraded.id == way.id => upgrade.drainage_capacity,
                    _ => self.default_drainage_capacity,
                };
                self.is_impassable(depths, way, period, drainage)
            })
            .collect()
    }

    /// Repair time (hours) after the flood of `period`: the slowest repair among
    /// the closed ways, each scaled by its length.
    pub fn repair_time(&self, depths: &FloodDepths, impassable: &[&Way], period: ReturnPeriod) -> f64 {
        impassable
            .iter()
            .filter_map(|way| {
                let level = depths.water_level(way.name(), period)?;
                let severity = self.severity.classify(level);
                let hours = self
                    .repair_time
                    .hours_per_km(severity, way.surface(), way.road_class());
                Some(way.length_km() * hours)
            })
            .fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn way(id: &str, name: &str, surface: &str, length_m: f64) -> Way {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "nodes": ["1", "2"],
            "tags": {"NAME": name, "ROAD_CLASS": "Secondary", "SURF_TYPE": surface, "Length": length_m}
        }))
        .expect("way fixture")
    }

    fn depths(entries: &[(&str, &[(u32, f64)])]) -> FloodDepths {
        FloodDepths::new(
            entries
                .iter()
                .map(|(name, levels)| {
                    (
                        name.to_string(),
                        levels.iter().map(|(t, l)| (ReturnPeriod(*t), *l)).collect(),
                    )
                })
                .collect(),
        )
    }

    #[test]
    fn test_threshold_is_strict() {
        let rules = FloodRules::default();
        // 10.0 * 0.7 == 7.0 exactly, so the excess is exactly 0.5.
        let table = depths(&[("A", &[(20, 10.0), (50, 7.5)]), ("B", &[(20, 10.0), (50, 7.50001)])]);
        let a = way("1", "A", "asphalt", 1000.0);
        let b = way("2", "B", "asphalt", 1000.0);
        assert!(!rules.is_impassable(&table, &a, ReturnPeriod(50), 0.7));
        assert!(rules.is_impassable(&table, &b, ReturnPeriod(50), 0.7));
    }

    #[test]
    fn test_upgrade_drainage_can_clear_way() {
        let rules = FloodRules::default();
        let table = depths(&[("A", &[(20, 1.0), (100, 1.3)])]);
        let ways = vec![way("1", "A", "earth", 1000.0)];
        let upgrade = Upgrade::from_ruc("rehab-earth", 0.3, Surface::Unpaved);

        let closed = rules.impassable_ways(&table, &ways, ReturnPeriod(100), None);
        assert_eq!(closed.len(), 1);

        let closed = rules.impassable_ways(&table, &ways, ReturnPeriod(100), Some((&ways[0], &upgrade)));
        assert!(closed.is_empty());
    }

    #[test]
    fn test_missing_depth_is_passable() {
        let rules = FloodRules::default();
        let table = depths(&[("A", &[(20, 0.1)])]);
        let w = way("1", "unknown", "asphalt", 1000.0);
        assert!(!rules.is_impassable(&table, &w, ReturnPeriod(100), 0.7));
    }

    #[test]
    fn test_severity_bands() {
        let bands = SeverityBands::default();
        assert_eq!(bands.classify(0.5), Severity::Low);
        assert_eq!(bands.classify(0.51), Severity::Medium);
        assert_eq!(bands.classify(1.5), Severity::Medium);
        assert_eq!(bands.classify(1.6), Severity::High);
    }

    #[test]
    fn test_repair_time_takes_slowest_way() {
        let rules = FloodRules::default();
        let table = depths(&[("A", &[(100, 0.3)]), ("B", &[(100, 2.0)])]);
        let a = way("1", "A", "earth", 2000.0); // 2km * 1440 (low, unpaved)
        let b = way("2", "B", "asphalt", 1000.0); // 1km * 1056 (high, paved)
        let hours = rules.repair_time(&table, &[&a, &b], ReturnPeriod(100));
        assert_eq!(hours, 2880.0);
        assert_eq!(rules.repair_time(&table, &[], ReturnPeriod(100)), 0.0);
    }

    #[test]
    fn test_repair_table_from_json() {
        let json = r#"{"high": {"paved": {"primary": 12.0}}}"#;
        let table: RepairTimeTable = serde_json::from_str(json).expect("parse table");
        assert_eq!(table.hours_per_km(Severity::High, Surface::Paved, RoadClass::Primary), 12.0);
        assert_eq!(table.hours_per_km(Severity::Low, Surface::Paved, RoadClass::Primary), 0.0);
    }
}
