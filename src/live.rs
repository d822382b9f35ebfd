//! Denormalized current stock per material.
//!
//! This is a projection of the move log. It is only ever written inside the
//! same transaction as the move it reflects, see [`crate::engine`].
use super::error::{LedgerError, ValidationError};
use super::movement::{Move, TimeStamp};
use super::store::{self, decode};
use sled::{Event, Subscriber, Tree};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct LocationStock {
    #[n(0)]
    pub quantity: i64,
    #[n(1)]
    pub last_entry_move: Option<String>,
    #[n(2)]
    pub last_exit_move: Option<String>,
    #[n(3)]
    pub last_modified: TimeStamp,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Default)]
pub struct LiveStock {
    // number of moves folded in, used to detect stale replays
    #[n(0)]
    pub revision: u64,
    #[n(1)]
    pub locations: BTreeMap<String, LocationStock>,
}

impl LiveStock {
    pub fn quantity(&self, location: &str) -> Option<i64> {
        self.locations.get(location).map(|entry| entry.quantity)
    }

    pub fn total(&self) -> i64 {
        self.locations
            .values()
            .fold(0i64, |total, entry| total.saturating_add(entry.quantity))
    }

    /// Folds one freshly sealed move into the projection. Nothing changes
    /// when the location's quantity would overflow.
    pub fn apply(&mut self, fact: &Move) -> Result<(), ValidationError> {
        let quantity = self
            .quantity(&fact.location)
            .unwrap_or(0)
            .checked_add(fact.quantity)
            .ok_or_else(|| ValidationError::QuantityOverflow(fact.location.clone()))?;
        let entry = self
            .locations
            .entry(fact.location.clone())
            .or_insert_with(|| LocationStock {
                quantity: 0,
                last_entry_move: None,
                last_exit_move: None,
                last_modified: fact.recorded_at,
            });
        entry.quantity = quantity;
        if fact.is_entry() {
            entry.last_entry_move = Some(fact.id.clone());
        } else {
            entry.last_exit_move = Some(fact.id.clone());
        }
        entry.last_modified = fact.recorded_at;
        self.revision += 1;
        Ok(())
    }
}

/// A change to one material's live stock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveUpdate {
    pub material: String,
    pub stock: LiveStock,
}

#[derive(Clone)]
pub struct LiveCache {
    live: Tree,
}

impl LiveCache {
    pub fn new(live: Tree) -> Self {
        Self { live }
    }

    pub fn stock(&self, material: &str) -> Result<Option<LiveStock>, LedgerError> {
        self.live
            .get(store::live_key(material))?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    pub fn quantity(&self, material: &str, location: &str) -> Result<Option<i64>, LedgerError> {
        Ok(self
            .stock(material)?
            .and_then(|stock| stock.quantity(location)))
    }

    pub fn revision(&self, material: &str) -> Result<u64, LedgerError> {
        Ok(self.stock(material)?.map(|s| s.revision).unwrap_or(0))
    }

    /// Blocking subscription to every committed change of `material`.
    pub fn watch(&self, material: &str) -> LiveWatch {
        LiveWatch {
            material: material.to_owned(),
            subscriber: self.live.watch_prefix(store::live_key(material)),
        }
    }
}

pub struct LiveWatch {
    material: String,
    subscriber: Subscriber,
}

impl LiveWatch {
    /// Like [`Iterator::next`] but gives up after `timeout`.
    pub fn next_timeout(&mut self, timeout: Duration) -> Option<Result<LiveUpdate, LedgerError>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            match self.subscriber.next_timeout(remaining).ok()? {
                Event::Insert { key, value } if key[..] == *self.material.as_bytes() => {
                    return Some(self.update(&value));
                }
                _ => continue,
            }
        }
    }

    fn update(&self, value: &[u8]) -> Result<LiveUpdate, LedgerError> {
        decode(value).map(|stock| LiveUpdate {
            material: self.material.clone(),
            stock,
        })
    }
}

impl Iterator for LiveWatch {
    type Item = Result<LiveUpdate, LedgerError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            // the prefix also matches longer codes, skip those
            match self.subscriber.next()? {
                Event::Insert { key, value } if key[..] == *self.material.as_bytes() => {
                    return Some(self.update(&value));
                }
                _ => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::SourceKind;

    fn inbound(source_id: &str, quantity: i64) -> Move {
        Move::seal(
            "M",
            quantity,
            "A",
            TimeStamp::new_with(2024, 6, 1, 0, 0, 0),
            TimeStamp::new(),
            SourceKind::InboundRequest,
            source_id,
            "",
            "user_1",
        )
        .unwrap()
    }

    #[test]
    fn apply_tracks_quantity_and_revision() {
        let mut stock = LiveStock::default();
        stock.apply(&inbound("req_1", 40)).unwrap();
        stock.apply(&inbound("req_2", 2)).unwrap();

        assert_eq!(stock.quantity("A"), Some(42));
        assert_eq!(stock.revision, 2);
        assert!(stock.locations["A"].last_exit_move.is_none());
    }

    #[test]
    fn overflow_leaves_the_projection_untouched() {
        let mut stock = LiveStock::default();
        stock.apply(&inbound("req_1", i64::MAX)).unwrap();
        let before = stock.clone();

        assert_eq!(
            stock.apply(&inbound("req_2", 1)),
            Err(ValidationError::QuantityOverflow("A".into()))
        );
        assert_eq!(stock, before);
    }
}
