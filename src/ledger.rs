//! Read side of the append-only move log.
use super::error::{LedgerError, ValidationError};
use super::movement::Move;
use super::store::{self, decode};
use chrono::{DateTime, Utc};
use sled::Tree;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Clone)]
pub struct LedgerStore {
    moves: Tree,
}

impl LedgerStore {
    pub fn new(moves: Tree) -> Self {
        Self { moves }
    }

    pub fn get(&self, material: &str, source_id: &str) -> Result<Option<Move>, LedgerError> {
        self.moves
            .get(store::move_key(material, source_id))?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    /// Every move recorded for `material`, deleted ones included, ordered by
    /// effective instant then recorded instant.
    pub fn history(&self, material: &str) -> Result<Vec<Move>, LedgerError> {
        let mut moves = self
            .moves
            .scan_prefix(store::material_prefix(material))
            .values()
            .map(|bytes| decode::<Move>(&bytes?))
            .collect::<Result<Vec<_>, _>>()?;
        moves.sort_by_key(|m| (m.effective_at, m.recorded_at));
        Ok(moves)
    }

    /// Opening quantities by location: the sum of non-deleted moves effective
    /// strictly before `before`. Linear in the material's whole history, so
    /// only used when no prior-day snapshot can be adopted.
    pub fn compute_opening(
        &self,
        material: &str,
        before: DateTime<Utc>,
    ) -> Result<BTreeMap<String, i64>, LedgerError> {
        let mut opening = BTreeMap::new();
        let mut replayed = 0usize;

        for bytes in self.moves.scan_prefix(store::material_prefix(material)).values() {
            let fact: Move = decode(&bytes?)?;
            if fact.deleted || fact.effective_at.to_datetime_utc() >= before {
                continue;
            }
            let quantity = opening.entry(fact.location.clone()).or_insert(0i64);
            *quantity = quantity
                .checked_add(fact.quantity)
                .ok_or(ValidationError::QuantityOverflow(fact.location))?;
            replayed += 1;
        }

        debug!(material, %before, replayed, "replayed move history for opening quantities");
        Ok(opening)
    }

    /// Moves whose stored digest no longer matches their contents.
    pub fn verify(&self, material: &str) -> Result<Vec<Move>, LedgerError> {
        Ok(self
            .history(material)?
            .into_iter()
            .filter(|fact| !fact.verify())
            .collect())
    }

    pub fn count(&self, material: &str) -> usize {
        self.moves.scan_prefix(store::material_prefix(material)).count()
    }
}
