//! Domain records shared across the pipeline.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// A point in WGS84, stored the way OSRM and GeoJSON order it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lon: f64,
    pub lat: f64,
}

impl Coordinate {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.lon, self.lat)
    }
}

/// Flood recurrence interval in years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReturnPeriod(pub u32);

impl ReturnPeriod {
    /// Annual exceedance probability, `1 / T`.
    pub fn exceedance_probability(self) -> f64 {
        1.0 / f64::from(self.0)
    }
}

impl fmt::Display for ReturnPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An OD point: its position in the OD array is its identity.
#[derive(Debug, Clone)]
pub struct OdPoint {
    pub index: usize,
    pub coordinate: Coordinate,
    /// `OBJECTID` property, used to join traffic counts.
    pub object_id: Option<i64>,
    /// Source GeoJSON feature, kept for audit output.
    pub feature: serde_json::Value,
}

/// Canonical identity of an unordered OD pair, `origin < destination`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PairKey {
    pub origin: usize,
    pub destination: usize,
}

impl PairKey {
    /// Builds the canonical key for two distinct indices in either order.
    pub fn new(a: usize, b: usize) -> Self {
        Self {
            origin: a.min(b),
            destination: a.max(b),
        }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.origin, self.destination)
    }
}

/// Symmetric travel cost of one OD pair on one scenario.
///
/// `cost` is `None` exactly when the pair is not routable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostEntry {
    pub key: PairKey,
    pub cost: Option<f64>,
}

impl Serialize for CostEntry {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut state = s.serialize_struct("CostEntry", 4)?;
        state.serialize_field("oIdx", &self.key.origin)?;
        state.serialize_field("dIdx", &self.key.destination)?;
        state.serialize_field("routable", &self.is_routable())?;
        state.serialize_field("cost", &self.cost)?;
        state.end()
    }
}

impl CostEntry {
    pub fn routable(key: PairKey, cost: f64) -> Self {
        Self {
            key,
            cost: Some(cost),
        }
    }

    pub fn unroutable(key: PairKey) -> Self {
        Self { key, cost: None }
    }

    pub fn is_routable(&self) -> bool {
        self.cost.is_some()
    }
}

/// A road segment as extracted from the OSM road network.
#[derive(Debug, Clone, Deserialize)]
pub struct Way {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(deserialize_with = "strings_or_numbers")]
    pub nodes: Vec<String>,
    pub tags: WayTags,
}

impl Way {
    pub fn name(&self) -> &str {
        &self.tags.name
    }

    /// Consecutive node pairs, i.e. the directed edges of the way in one direction.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.nodes
            .windows(2)
            .map(|pair| (pair[0].as_str(), pair[1].as_str()))
    }

    pub fn length_km(&self) -> f64 {
        self.tags.length_m / 1000.0
    }

    pub fn surface(&self) -> Surface {
        Surface::classify(self.tags.surface_type.as_deref())
    }

    pub fn road_class(&self) -> RoadClass {
        RoadClass::classify(self.tags.road_class.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WayTags {
    #[serde(rename = "NAME", default)]
    pub name: String,
    #[serde(rename = "ROAD_CLASS", default)]
    pub road_class: Option<String>,
    #[serde(rename = "SURF_TYPE", default)]
    pub surface_type: Option<String>,
    #[serde(rename = "Length", default, deserialize_with = "lenient_f64")]
    pub length_m: f64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Surface {
    Paved,
    Unpaved,
}

impl Surface {
    pub fn classify(surface_type: Option<&str>) -> Self {
        match surface_type.map(|s| s.trim().to_ascii_lowercase()) {
            Some(s)
                if matches!(
                    s.as_str(),
                    "paved" | "asphalt" | "concrete" | "bitumen" | "tar" | "sett" | "cobblestone"
                ) =>
            {
                Surface::Paved
            }
            _ => Surface::Unpaved,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoadClass {
    Primary,
    Secondary,
    Tertiary,
    Vicinal,
}

impl RoadClass {
    pub fn classify(road_class: Option<&str>) -> Self {
        match road_class.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("primary") => RoadClass::Primary,
            Some("secondary") => RoadClass::Secondary,
            Some("tertiary") => RoadClass::Tertiary,
            _ => RoadClass::Vicinal,
        }
    }
}

/// Road upgrade evaluated for every candidate way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upgrade {
    pub id: String,
    /// Road user cost per km after the upgrade.
    pub ruc: f64,
    /// Traversal speed written to the speed override file.
    pub speed: f64,
    pub drainage_capacity: f64,
    pub surface: Surface,
    pub condition: String,
}

impl Upgrade {
    /// An upgrade whose speed is derived as `1 / ruc`.
    pub fn from_ruc(id: &str, ruc: f64, surface: Surface) -> Self {
        Self {
            id: id.to_string(),
            ruc,
            speed: 1.0 / ruc,
            drainage_capacity: 1.0,
            surface,
            condition: "good".to_string(),
        }
    }
}

/// Which EAUL run is executing. Only the baseline run feeds the
/// unroutable-pair tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunKind {
    Baseline,
    Upgrade { way_id: String, upgrade_id: String },
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunKind::Baseline => write!(f, "all"),
            RunKind::Upgrade { way_id, upgrade_id } => write!(f, "up-{}-{}", way_id, upgrade_id),
        }
    }
}

/// Avoided EAUL per upgrade for one way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WayResult {
    pub id: String,
    pub name: String,
    pub eaul: BTreeMap<String, f64>,
}

fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(d)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

fn strings_or_numbers<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    let values = Vec::<serde_json::Value>::deserialize(d)?;
    values
        .into_iter()
        .map(|value| match value {
            serde_json::Value::String(s) => Ok(s),
            serde_json::Value::Number(n) => Ok(n.to_string()),
            other => Err(serde::de::Error::custom(format!(
                "expected node id, got {}",
                other
            ))),
        })
        .collect()
}

fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    match serde_json::Value::deserialize(d)? {
        serde_json::Value::Number(n) => Ok(n.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|err| serde::de::Error::custom(format!("bad length {:?}: {}", s, err))),
        serde_json::Value::Null => Ok(0.0),
        other => Err(serde::de::Error::custom(format!(
            "expected length, got {}",
            other
        ))),
    }
}
