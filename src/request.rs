//! Pending movement requests.
//!
//! Requests are written by data entry and only ever changed here in two ways:
//! denied (deleted) while still pending, or marked applied material by
//! material by the approval engine.
use super::calendar::DayKey;
use super::error::{LedgerError, ValidationError};
use super::movement::{Direction, TimeStamp};
use super::store::{decode, encode};
use super::utils;
use sled::Tree;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct PendingMovement {
    #[n(0)]
    pub id: String, // bech32 uuid7, "req_" prefix
    #[n(1)]
    pub direction: Direction,
    #[n(2)]
    pub lines: BTreeMap<String, i64>, // material -> requested magnitude
    #[n(3)]
    pub location: String,
    #[n(4)]
    pub requested_date: DayKey,
    #[n(5)]
    pub reason: String,
    #[n(6)]
    pub creator: String,
    #[n(7)]
    pub state: RequestState,
    #[n(8)]
    pub accepted_at: Option<TimeStamp>,
    #[n(9)]
    pub approver: Option<String>,
    #[n(10)]
    pub applied: BTreeSet<String>, // materials whose move is already written
    #[n(11)]
    pub work_order: Option<String>,
    #[n(12)]
    pub created_at: TimeStamp,
}

impl PendingMovement {
    pub fn is_pending(&self) -> bool {
        self.state == RequestState::Pending
    }

    /// Lines that still need a move.
    pub fn outstanding(&self) -> impl Iterator<Item = (&String, i64)> {
        self.lines
            .iter()
            .filter(|(material, _)| !self.applied.contains(*material))
            .map(|(material, quantity)| (material, *quantity))
    }

    /// Records that `material`'s move has been written. Once every line is
    /// covered the request flips to approved and is stamped. Returns true on
    /// that flip.
    pub fn record_applied(&mut self, material: &str, approver: &str, now: TimeStamp) -> bool {
        self.applied.insert(material.to_owned());
        if self.is_pending() && self.lines.keys().all(|m| self.applied.contains(m)) {
            self.state = RequestState::Approved;
            self.accepted_at = Some(now);
            self.approver = Some(approver.to_owned());
            return true;
        }
        false
    }
}

// used for constructing requests before they are stored
#[derive(Debug, Default)]
pub struct MovementDraft {
    direction: Option<Direction>,
    lines: BTreeMap<String, i64>,
    location: Option<String>,
    requested_date: Option<DayKey>,
    reason: String,
    creator: Option<String>,
    work_order: Option<String>,
    accepted_at: Option<TimeStamp>,
}

impl MovementDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }
    /// Adds (or replaces) one material line.
    pub fn add_line(mut self, material: &str, quantity: i64) -> Self {
        self.lines.insert(material.to_owned(), quantity);
        self
    }
    pub fn set_location(mut self, location: &str) -> Self {
        self.location = Some(location.to_owned());
        self
    }
    pub fn set_requested_date(mut self, day: DayKey) -> Self {
        self.requested_date = Some(day);
        self
    }
    pub fn set_reason(mut self, reason: &str) -> Self {
        self.reason = reason.to_owned();
        self
    }
    pub fn set_creator(mut self, creator: &str) -> Self {
        self.creator = Some(creator.to_owned());
        self
    }
    pub fn set_work_order(mut self, work_order: &str) -> Self {
        self.work_order = Some(work_order.to_owned());
        self
    }
    /// For requests imported with an acceptance stamp already assigned.
    pub fn set_accepted_at(mut self, accepted_at: TimeStamp) -> Self {
        self.accepted_at = Some(accepted_at);
        self
    }
    /// Checks required fields. Quantities are checked when the request is
    /// approved.
    pub fn finalise(self) -> Result<PendingMovement, ValidationError> {
        let direction = self.direction.ok_or(ValidationError::MissingField("direction"))?;
        let location = self.location.ok_or(ValidationError::MissingField("location"))?;
        let requested_date = self
            .requested_date
            .ok_or(ValidationError::MissingField("requested_date"))?;
        let creator = self.creator.ok_or(ValidationError::MissingField("creator"))?;
        if self.lines.is_empty() {
            return Err(ValidationError::EmptyRequest);
        }

        Ok(PendingMovement {
            id: utils::new_request_id(),
            direction,
            lines: self.lines,
            location,
            requested_date,
            reason: self.reason,
            creator,
            state: RequestState::Pending,
            accepted_at: self.accepted_at,
            approver: None,
            applied: BTreeSet::new(),
            work_order: self.work_order,
            created_at: TimeStamp::new(),
        })
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct WorkOrderCompletion {
    #[n(0)]
    pub work_order: String,
    #[n(1)]
    pub request_id: String,
    #[n(2)]
    pub completed_at: TimeStamp,
}

#[derive(Clone)]
pub struct RequestStore {
    requests: Tree,
    work_orders: Tree,
}

impl RequestStore {
    pub fn new(requests: Tree, work_orders: Tree) -> Self {
        Self {
            requests,
            work_orders,
        }
    }

    pub fn submit(&self, draft: MovementDraft) -> Result<PendingMovement, LedgerError> {
        let request = draft.finalise()?;
        self.put(&request)?;
        debug!(request_id = %request.id, lines = request.lines.len(), "request submitted");
        Ok(request)
    }

    /// Stores a request as-is, replacing any previous version.
    pub fn put(&self, request: &PendingMovement) -> Result<(), LedgerError> {
        self.requests
            .insert(request.id.as_bytes(), encode(request)?)?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<PendingMovement>, LedgerError> {
        self.requests
            .get(id.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    pub fn pending(&self) -> Result<Vec<PendingMovement>, LedgerError> {
        let mut pending = vec![];
        for bytes in self.requests.iter().values() {
            let request: PendingMovement = decode(&bytes?)?;
            if request.is_pending() {
                pending.push(request);
            }
        }
        Ok(pending)
    }

    /// Deletes a request that has not had any material applied. The delete is
    /// a compare-and-swap against the version read, so an approval racing the
    /// denial makes one of them lose cleanly.
    pub fn deny(&self, id: &str) -> Result<PendingMovement, LedgerError> {
        loop {
            let current = self
                .requests
                .get(id.as_bytes())?
                .ok_or_else(|| LedgerError::UnknownRequest(id.to_owned()))?;
            let request: PendingMovement = decode(&current)?;
            if !request.is_pending() || !request.applied.is_empty() {
                return Err(LedgerError::NotPending(id.to_owned()));
            }

            match self
                .requests
                .compare_and_swap(id.as_bytes(), Some(&current), None::<Vec<u8>>)?
            {
                Ok(()) => {
                    info!(request_id = id, "request denied");
                    return Ok(request);
                }
                Err(_) => continue,
            }
        }
    }

    /// Marks the upstream work order complete. The first completion wins.
    pub fn complete_work_order(
        &self,
        work_order: &str,
        request_id: &str,
    ) -> Result<WorkOrderCompletion, LedgerError> {
        let completion = WorkOrderCompletion {
            work_order: work_order.to_owned(),
            request_id: request_id.to_owned(),
            completed_at: TimeStamp::new(),
        };
        let swapped = self.work_orders.compare_and_swap(
            work_order.as_bytes(),
            None::<&[u8]>,
            Some(encode(&completion)?),
        )?;
        match swapped {
            Ok(()) => Ok(completion),
            Err(existing) => match existing.current {
                Some(bytes) => decode(&bytes),
                None => Ok(completion),
            },
        }
    }

    pub fn work_order(&self, work_order: &str) -> Result<Option<WorkOrderCompletion>, LedgerError> {
        self.work_orders
            .get(work_order.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> MovementDraft {
        MovementDraft::new()
            .set_direction(Direction::Outbound)
            .add_line("M1", 10)
            .add_line("M2", 5)
            .set_location("A")
            .set_requested_date(DayKey::new(2024, 6, 1).unwrap())
            .set_creator("user_1")
    }

    #[test]
    fn finalise_requires_fields() {
        let res = MovementDraft::new()
            .set_direction(Direction::Inbound)
            .add_line("M1", 1)
            .finalise();
        assert_eq!(res, Err(ValidationError::MissingField("location")));

        let res = MovementDraft::new()
            .set_direction(Direction::Inbound)
            .set_location("A")
            .set_requested_date(DayKey::new(2024, 6, 1).unwrap())
            .set_creator("user_1")
            .finalise();
        assert_eq!(res, Err(ValidationError::EmptyRequest));
    }

    #[test]
    fn finalise_keeps_bad_quantities_for_later_checks() {
        let request = draft().add_line("M3", -4).finalise().unwrap();
        assert_eq!(request.lines["M3"], -4);
        assert!(request.is_pending());
        assert!(request.id.starts_with("req_"));
    }

    #[test]
    fn approval_waits_for_every_line() {
        let mut request = draft().finalise().unwrap();
        let now = TimeStamp::new();

        assert!(!request.record_applied("M1", "boss", now));
        assert!(request.is_pending());
        assert_eq!(request.outstanding().collect::<Vec<_>>(), vec![(&"M2".to_string(), 5)]);

        assert!(request.record_applied("M2", "boss", now));
        assert_eq!(request.state, RequestState::Approved);
        assert_eq!(request.accepted_at, Some(now));
        assert_eq!(request.approver.as_deref(), Some("boss"));
        assert_eq!(request.outstanding().count(), 0);
    }
}
