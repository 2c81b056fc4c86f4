//! Daily traffic between OD points, used to weight cost increases.

use std::collections::{BTreeSet, HashMap};
use std::io::Read;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::InputError;
use crate::model::{OdPoint, PairKey};

/// Bidirectional daily vehicle counts between two OD points, keyed by
/// their `OBJECTID`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficRecord {
    pub origin: i64,
    pub destination: i64,
    #[serde(rename = "dailyODCount")]
    pub daily: f64,
    #[serde(rename = "reverseODCount", default)]
    pub reverse: f64,
}

impl TrafficRecord {
    pub fn total(&self) -> f64 {
        self.daily + self.reverse
    }
}

/// Weight of each OD pair in the increased user cost.
#[derive(Debug, Clone, Default)]
pub enum TrafficWeights {
    /// No traffic data: every pair weighs 1.
    #[default]
    Uniform,
    Counts(HashMap<PairKey, f64>),
}

impl TrafficWeights {
    /// Joins traffic records to OD indices through `OBJECTID`. Records naming
    /// an unknown point are skipped.
    pub fn from_records(records: &[TrafficRecord], od_points: &[OdPoint]) -> Self {
        let index: HashMap<i64, usize> = od_points
            .iter()
            .filter_map(|point| point.object_id.map(|id| (id, point.index)))
            .collect();

        let mut counts = HashMap::with_capacity(records.len());
        let mut skipped = 0usize;
        for record in records {
            match (index.get(&record.origin), index.get(&record.destination)) {
                (Some(&o), Some(&d)) if o != d => {
                    *counts.entry(PairKey::new(o, d)).or_insert(0.0) += record.total();
                }
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(skipped, "traffic records without matching OD points");
        }
        TrafficWeights::Counts(counts)
    }

    /// Daily count for the pair; 0 for a pair missing from loaded counts.
    pub fn weight(&self, key: PairKey) -> f64 {
        match self {
            TrafficWeights::Uniform => 1.0,
            TrafficWeights::Counts(counts) => counts.get(&key).copied().unwrap_or(0.0),
        }
    }

    /// Pairs with a traffic record totalling zero.
    pub fn no_traffic_pairs(&self) -> BTreeSet<PairKey> {
        match self {
            TrafficWeights::Uniform => BTreeSet::new(),
            TrafficWeights::Counts(counts) => counts
                .iter()
                .filter(|(_, total)| **total == 0.0)
                .map(|(key, _)| *key)
                .collect(),
        }
    }
}

/// Converts a square OD matrix CSV (a `from` column plus one column per
/// destination id, vehicles/day) into records combining both directions.
pub fn records_from_matrix_csv<R: Read>(reader: R) -> Result<Vec<TrafficRecord>, InputError> {
    let mut csv = csv::Reader::from_reader(reader);
    let headers = csv.headers()?.clone();
    let from_column = headers
        .iter()
        .position(|header| header.trim() == "from")
        .ok_or_else(|| InputError::Config("traffic matrix has no `from` column".to_string()))?;

    let destinations: Vec<(usize, i64)> = headers
        .iter()
        .enumerate()
        .filter(|(column, _)| *column != from_column)
        .filter_map(|(column, header)| header.trim().parse().ok().map(|id| (column, id)))
        .collect();

    let mut records: Vec<TrafficRecord> = Vec::new();
    let mut by_pair: HashMap<(i64, i64), usize> = HashMap::new();

    for row in csv.records() {
        let row = row?;
        let origin: i64 = row
            .get(from_column)
            .and_then(|value| value.trim().parse().ok())
            .ok_or_else(|| InputError::Config(format!("bad `from` value in row {:?}", row)))?;

        for &(column, destination) in &destinations {
            if destination == origin {
                continue;
            }
            let count: f64 = row
                .get(column)
                .and_then(|value| value.trim().parse().ok())
                .unwrap_or(0.0);

            match by_pair.get(&(destination, origin)) {
                Some(&existing) => records[existing].reverse = count,
                None => {
                    by_pair.insert((origin, destination), records.len());
                    records.push(TrafficRecord {
                        origin,
                        destination,
                        daily: count,
                        reverse: 0.0,
                    });
                }
            }
        }
    }

    Ok(records)
}
