//! Unroutable-pair bookkeeping.
//!
//! The baseline run feeds an [`UnroutablePairTracker`] with every flood
//! cost table. Finalising it yields an immutable [`ExclusionSet`] that
//! filters the baseline and every upgrade run the same way, so all EAUL
//! values are computed over the same pairs.
//!
//! The set is frozen after the baseline on the assumption that closures grow
//! with the return period and that upgrades never break routability
//! elsewhere. A pair that only becomes unroutable in an upgrade run is not
//! detected.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use tracing::info;

use crate::model::{CostEntry, OdPoint, PairKey, ReturnPeriod};

/// Mutable stage: collects unroutable pairs during the baseline run.
#[derive(Debug, Clone, Default)]
pub struct UnroutablePairTracker {
    observed: BTreeMap<ReturnPeriod, BTreeSet<PairKey>>,
    no_traffic: BTreeSet<PairKey>,
}

impl UnroutablePairTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pairs without traffic are excluded as well, but never reported as
    /// unroutable.
    pub fn with_no_traffic(no_traffic: impl IntoIterator<Item = PairKey>) -> Self {
        Self {
            observed: BTreeMap::new(),
            no_traffic: no_traffic.into_iter().collect(),
        }
    }

    /// Records every unroutable pair of one flood period's cost table.
    pub fn record_observations(&mut self, period: ReturnPeriod, entries: &[CostEntry]) {
        let unroutable = self.observed.entry(period).or_default();
        unroutable.extend(
            entries
                .iter()
                .filter(|entry| !entry.is_routable())
                .map(|entry| entry.key),
        );
    }

    pub fn observed(&self, period: ReturnPeriod) -> usize {
        self.observed.get(&period).map_or(0, BTreeSet::len)
    }

    /// Freezes the union of all observations.
    pub fn finalize(self) -> ExclusionSet {
        let unroutable: BTreeSet<PairKey> = self.observed.into_values().flatten().collect();
        info!(
            unroutable = unroutable.len(),
            no_traffic = self.no_traffic.len(),
            "Computing unroutable pairs"
        );
        ExclusionSet {
            unroutable,
            no_traffic: self.no_traffic,
        }
    }
}

/// Frozen stage: pairs excluded from every EAUL computation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExclusionSet {
    unroutable: BTreeSet<PairKey>,
    no_traffic: BTreeSet<PairKey>,
}

impl ExclusionSet {
    pub fn contains(&self, key: PairKey) -> bool {
        self.unroutable.contains(&key) || self.no_traffic.contains(&key)
    }

    /// Drops every entry whose pair is excluded, whatever its routability in
    /// this table.
    pub fn filter(&self, entries: &[CostEntry]) -> Vec<CostEntry> {
        entries
            .iter()
            .filter(|entry| !self.contains(entry.key))
            .copied()
            .collect()
    }

    pub fn unroutable(&self) -> impl Iterator<Item = PairKey> + '_ {
        self.unroutable.iter().copied()
    }

    pub fn unroutable_len(&self) -> usize {
        self.unroutable.len()
    }

    /// Writes the unroutable pairs as `[[origin, destination], ...]` features.
    pub fn persist(&self, od_points: &[OdPoint], destination: &Path) -> io::Result<()> {
        let dump: Vec<[&serde_json::Value; 2]> = self
            .unroutable
            .iter()
            .filter_map(|key| {
                let origin = od_points.get(key.origin)?;
                let destination = od_points.get(key.destination)?;
                Some([&origin.feature, &destination.feature])
            })
            .collect();

        let mut writer = BufWriter::new(File::create(destination)?);
        serde_json::to_writer_pretty(&mut writer, &dump)?;
        writer.flush()
    }
}
