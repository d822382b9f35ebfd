//! Movement approval engine.
//!
//! Applies one signed movement for one material as a single sled transaction
//! spanning the move log, the day's snapshot, the live cache and the
//! originating request. All reads happen before any write.
//!
//! sled transactions cannot scan, so when a day has to be opened by replay the
//! replay runs first, outside the transaction, and is tagged with the live
//! cache revision it saw. A mismatching revision inside the transaction means
//! another move landed in between and the unit is run again.
use super::calendar::{Calendar, DayKey};
use super::config::LedgerConfig;
use super::error::{LedgerError, ValidationError};
use super::ledger::LedgerStore;
use super::live::{LiveCache, LiveStock};
use super::movement::{Move, SourceKind, TimeStamp};
use super::request::PendingMovement;
use super::snapshot::{Snapshot, SnapshotStore};
use super::store::{self, Trees, decode, encode};
use chrono::{DateTime, Utc};
use sled::Transactional;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionResult, TransactionalTree, abort,
};
use std::cell::Cell;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

/// One approved movement of one material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approval {
    pub material: String,
    pub source_id: String, // idempotency key, the originating request id
    pub quantity: i64,     // already signed
    pub location: String,
    pub effective_at: DateTime<Utc>,
    pub source_kind: SourceKind,
    pub reason: String,
    pub approver: String,
    /// `source_id` names a stored request. It must still be pending with this
    /// material outstanding, and it is stamped in the same transaction.
    pub from_request: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Applied {
        fact: Move,
        /// This move was the request's last outstanding line.
        request_completed: bool,
    },
    /// A move for this (material, source id) already exists. Nothing changed.
    AlreadyApplied { move_id: String },
}

impl ApprovalOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApprovalOutcome::Applied { .. })
    }
}

#[derive(Debug)]
enum Abort {
    StaleOpening,
    Fatal(LedgerError),
}

impl Abort {
    fn fatal(err: LedgerError) -> ConflictableTransactionError<Abort> {
        ConflictableTransactionError::Abort(Abort::Fatal(err))
    }
}

struct OpeningHint {
    revision: u64,
    opening: BTreeMap<String, i64>,
}

fn read<T>(tree: &TransactionalTree, key: &[u8]) -> ConflictableTransactionResult<Option<T>, Abort>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tree.get(key)? {
        Some(bytes) => decode(&bytes).map(Some).map_err(Abort::fatal),
        None => Ok(None),
    }
}

/// The request behind an approval, provided it can still take `material`.
fn pending_request(
    tree: &TransactionalTree,
    id: &str,
    material: &str,
) -> ConflictableTransactionResult<PendingMovement, Abort> {
    match read::<PendingMovement>(tree, id.as_bytes())? {
        None => abort(Abort::Fatal(LedgerError::UnknownRequest(id.to_owned()))),
        Some(request) if !request.is_pending() || request.applied.contains(material) => {
            abort(Abort::Fatal(LedgerError::NotPending(id.to_owned())))
        }
        Some(request) => Ok(request),
    }
}

#[derive(Clone)]
pub struct ApprovalEngine {
    trees: Trees,
    ledger: LedgerStore,
    snapshots: SnapshotStore,
    live: LiveCache,
    calendar: Calendar,
    max_attempts: u32,
}

impl ApprovalEngine {
    pub fn new(trees: Trees, config: &LedgerConfig) -> Self {
        Self {
            ledger: LedgerStore::new(trees.moves.clone()),
            snapshots: SnapshotStore::new(trees.snapshots.clone()),
            live: LiveCache::new(trees.live.clone()),
            trees,
            calendar: Calendar::new(config.timezone),
            max_attempts: config.max_attempts,
        }
    }

    pub fn calendar(&self) -> &Calendar {
        &self.calendar
    }

    #[instrument(skip_all, fields(material = %approval.material, source_id = %approval.source_id))]
    pub fn approve(&self, approval: &Approval) -> Result<ApprovalOutcome, LedgerError> {
        if approval.quantity == 0 {
            return Err(ValidationError::ZeroDelta.into());
        }
        if approval.material.is_empty() {
            return Err(ValidationError::MissingField("material").into());
        }
        if approval.location.is_empty() {
            return Err(ValidationError::MissingField("location").into());
        }

        let material = approval.material.as_str();
        let day = self.calendar.day_key(approval.effective_at);
        let yesterday = day.pred();
        let day_start = self.calendar.day_start(day);

        let move_key = store::move_key(material, &approval.source_id);
        let today_key = store::snapshot_key(material, day);
        let yesterday_key = yesterday.map(|y| store::snapshot_key(material, y));
        let live_key = store::live_key(material);
        let request_key = approval.source_id.as_bytes();

        let attempts = Cell::new(0u32);
        let contention = || LedgerError::Contention {
            material: material.to_owned(),
            attempts: attempts.get(),
        };

        loop {
            if attempts.get() >= self.max_attempts {
                warn!(attempts = attempts.get(), "giving up on contended material");
                return Err(contention());
            }
            let hint = self.prepare_opening(material, day, yesterday, day_start)?;

            let result: TransactionResult<ApprovalOutcome, Abort> = (
                &self.trees.moves,
                &self.trees.snapshots,
                &self.trees.live,
                &self.trees.requests,
            )
                .transaction(|(moves, snapshots, live, requests)| {
                    attempts.set(attempts.get() + 1);
                    if attempts.get() > self.max_attempts {
                        return abort(Abort::Fatal(contention()));
                    }

                    // reads
                    if let Some(existing) = read::<Move>(moves, &move_key)? {
                        return Ok(ApprovalOutcome::AlreadyApplied {
                            move_id: existing.id,
                        });
                    }
                    let today = read::<Snapshot>(snapshots, &today_key)?;
                    let previous = match &yesterday_key {
                        Some(key) => read::<Snapshot>(snapshots, key)?,
                        None => None,
                    };
                    let mut stock = read::<LiveStock>(live, &live_key)?.unwrap_or_default();
                    let mut request = if approval.from_request {
                        Some(pending_request(requests, &approval.source_id, material)?)
                    } else {
                        None
                    };

                    let mut snapshot = match (today, previous) {
                        (Some(today), _) => today,
                        (None, Some(previous)) => Snapshot::open(material, day, previous.closing),
                        (None, None) => match &hint {
                            Some(hint) if hint.revision == stock.revision => {
                                Snapshot::open(material, day, hint.opening.clone())
                            }
                            _ => return abort(Abort::StaleOpening),
                        },
                    };

                    let now = TimeStamp::new();
                    let fact = Move::seal(
                        material,
                        approval.quantity,
                        &approval.location,
                        approval.effective_at.into(),
                        now,
                        approval.source_kind,
                        &approval.source_id,
                        &approval.reason,
                        &approval.approver,
                    )
                    .map_err(|e| Abort::fatal(e.into()))?;

                    snapshot
                        .apply(&approval.location, approval.quantity)
                        .map_err(|e| Abort::fatal(e.into()))?;
                    stock.apply(&fact).map_err(|e| Abort::fatal(e.into()))?;
                    let request_completed = match request.as_mut() {
                        Some(request) => request.record_applied(material, &approval.approver, now),
                        None => false,
                    };

                    let snapshot_bytes = encode(&snapshot).map_err(Abort::fatal)?;
                    let move_bytes = encode(&fact).map_err(Abort::fatal)?;
                    let stock_bytes = encode(&stock).map_err(Abort::fatal)?;
                    let request_bytes = request
                        .as_ref()
                        .map(encode)
                        .transpose()
                        .map_err(Abort::fatal)?;

                    // writes
                    snapshots.insert(today_key.clone(), snapshot_bytes)?;
                    moves.insert(move_key.clone(), move_bytes)?;
                    live.insert(live_key.clone(), stock_bytes)?;
                    if let Some(bytes) = request_bytes {
                        requests.insert(request_key, bytes)?;
                    }

                    Ok(ApprovalOutcome::Applied {
                        fact,
                        request_completed,
                    })
                });

            match result {
                Ok(ApprovalOutcome::Applied {
                    fact,
                    request_completed,
                }) => {
                    info!(
                        move_id = %fact.id,
                        quantity = fact.quantity,
                        location = %fact.location,
                        day = %day,
                        request_completed,
                        "movement applied"
                    );
                    return Ok(ApprovalOutcome::Applied {
                        fact,
                        request_completed,
                    });
                }
                Ok(outcome) => {
                    debug!("movement already applied");
                    return Ok(outcome);
                }
                Err(TransactionError::Abort(Abort::StaleOpening)) => {
                    warn!(day = %day, "opening replay went stale, retrying");
                    continue;
                }
                Err(TransactionError::Abort(Abort::Fatal(err))) => return Err(err),
                Err(TransactionError::Storage(err)) => return Err(err.into()),
            }
        }
    }

    /// Replays history when neither today's nor yesterday's snapshot exists.
    /// The revision is read before the replay so a move landing mid-scan is
    /// caught inside the transaction.
    fn prepare_opening(
        &self,
        material: &str,
        day: DayKey,
        yesterday: Option<DayKey>,
        day_start: DateTime<Utc>,
    ) -> Result<Option<OpeningHint>, LedgerError> {
        let revision = self.live.revision(material)?;
        if self.snapshots.contains(material, day)? {
            return Ok(None);
        }
        if let Some(yesterday) = yesterday {
            if self.snapshots.contains(material, yesterday)? {
                debug!(material, day = %day, "adopting previous closing as opening");
                return Ok(None);
            }
        }

        let opening = self.ledger.compute_opening(material, day_start)?;
        Ok(Some(OpeningHint { revision, opening }))
    }
}
