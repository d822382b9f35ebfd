//! Per-material, per-day checkpoints of quantity by location.
use super::calendar::{Calendar, DayKey};
use super::error::{LedgerError, ValidationError};
use super::ledger::LedgerStore;
use super::movement::TimeStamp;
use super::store::{self, decode};
use sled::Tree;
use std::collections::BTreeMap;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    #[n(0)]
    pub material: String,
    #[n(1)]
    pub day: DayKey,
    #[n(2)]
    pub opening: BTreeMap<String, i64>,
    #[n(3)]
    pub closing: BTreeMap<String, i64>,
    #[n(4)]
    pub built_at: TimeStamp,
}

impl Snapshot {
    /// A new day's checkpoint. Nothing has moved yet so closing == opening.
    pub fn open(material: &str, day: DayKey, opening: BTreeMap<String, i64>) -> Self {
        Self {
            material: material.to_owned(),
            day,
            closing: opening.clone(),
            opening,
            built_at: TimeStamp::new(),
        }
    }

    pub fn apply(&mut self, location: &str, quantity: i64) -> Result<(), ValidationError> {
        let closing = self.closing.entry(location.to_owned()).or_insert(0);
        *closing = closing
            .checked_add(quantity)
            .ok_or_else(|| ValidationError::QuantityOverflow(location.to_owned()))?;
        Ok(())
    }

    pub fn opening_at(&self, location: &str) -> i64 {
        self.opening.get(location).copied().unwrap_or(0)
    }

    pub fn closing_at(&self, location: &str) -> i64 {
        self.closing.get(location).copied().unwrap_or(0)
    }

    /// Closing minus opening for every location touched on either side.
    pub fn net_change(&self) -> BTreeMap<String, i64> {
        self.opening
            .keys()
            .chain(self.closing.keys())
            .map(|loc| {
                let delta = self.closing_at(loc).saturating_sub(self.opening_at(loc));
                (loc.clone(), delta)
            })
            .filter(|(_, delta)| *delta != 0)
            .collect()
    }
}

/// A day whose stored opening disagrees with a replay of the move log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBreak {
    pub day: DayKey,
    pub stored: BTreeMap<String, i64>,
    pub replayed: BTreeMap<String, i64>,
}

#[derive(Clone)]
pub struct SnapshotStore {
    snapshots: Tree,
}

impl SnapshotStore {
    pub fn new(snapshots: Tree) -> Self {
        Self { snapshots }
    }

    pub fn get(&self, material: &str, day: DayKey) -> Result<Option<Snapshot>, LedgerError> {
        self.snapshots
            .get(store::snapshot_key(material, day))?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    pub fn contains(&self, material: &str, day: DayKey) -> Result<bool, LedgerError> {
        Ok(self.snapshots.contains_key(store::snapshot_key(material, day))?)
    }

    /// Snapshots for `material` with `from <= day <= to`, oldest first.
    pub fn range(
        &self,
        material: &str,
        from: DayKey,
        to: DayKey,
    ) -> Result<Vec<Snapshot>, LedgerError> {
        let start = store::snapshot_key(material, from);
        let end = store::snapshot_key(material, to);
        self.snapshots
            .range(start..=end)
            .values()
            .map(|bytes| decode::<Snapshot>(&bytes?))
            .collect()
    }

    pub fn all(&self, material: &str) -> Result<Vec<Snapshot>, LedgerError> {
        self.snapshots
            .scan_prefix(store::material_prefix(material))
            .values()
            .map(|bytes| decode::<Snapshot>(&bytes?))
            .collect()
    }

    /// Compares every stored opening against a replay of the log. Replay is
    /// authoritative; breaks are reported, never rewritten.
    pub fn find_chain_breaks(
        &self,
        material: &str,
        ledger: &LedgerStore,
        calendar: &Calendar,
    ) -> Result<Vec<ChainBreak>, LedgerError> {
        let mut breaks = vec![];
        for snapshot in self.all(material)? {
            let replayed = ledger.compute_opening(material, calendar.day_start(snapshot.day))?;
            let replayed: BTreeMap<_, _> = replayed.into_iter().filter(|(_, q)| *q != 0).collect();
            let stored: BTreeMap<_, _> = snapshot
                .opening
                .iter()
                .filter(|(_, q)| **q != 0)
                .map(|(loc, q)| (loc.clone(), *q))
                .collect();
            if stored != replayed {
                breaks.push(ChainBreak {
                    day: snapshot.day,
                    stored,
                    replayed,
                });
            }
        }
        Ok(breaks)
    }
}
