//! Batch approval coordinator.
//!
//! Inbound lines can only add stock and go straight to the engine. Outbound
//! lines are validated as a whole batch first (phase A, read-only) so that
//! several requests drawing on the same material and location cannot overdraw
//! it together. Only a clean phase A lets phase B apply anything.
//!
//! Each material is its own unit of work. A multi-material request that fails
//! half way keeps its applied lines and stays pending; running the batch
//! again finishes it without duplicating moves.
use super::catalog::{Catalog, NoCatalog};
use super::engine::{Approval, ApprovalEngine, ApprovalOutcome};
use super::error::{LedgerError, Violation};
use super::live::{LiveCache, LiveStock};
use super::movement::Direction;
use super::request::{PendingMovement, RequestStore};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Requests this run flipped to approved.
    pub requests_completed: usize,
    pub moves_applied: usize,
    /// Lines that already had a move, including whole requests approved
    /// by an earlier run.
    pub already_applied: usize,
}

/// A line, or a request's completion step when `material` is `None`, that
/// failed after phase B had started.
#[derive(Debug)]
pub struct ApplyFailure {
    pub request_id: String,
    pub material: Option<String>,
    pub error: LedgerError,
}

#[derive(thiserror::Error, Debug)]
pub enum BatchError {
    #[error("Batch rejected by pre-validation with {} violation(s)", .0.len())]
    Rejected(Vec<Violation>),
    #[error("Batch cancelled before any movement was applied")]
    Cancelled,
    #[error("{} step(s) failed after the batch started applying", .failures.len())]
    Partial {
        summary: BatchSummary,
        failures: Vec<ApplyFailure>,
    },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Clone)]
pub struct BatchCoordinator {
    engine: ApprovalEngine,
    requests: RequestStore,
    live: LiveCache,
    catalog: Arc<dyn Catalog>,
}

impl BatchCoordinator {
    pub fn new(engine: ApprovalEngine, requests: RequestStore, live: LiveCache) -> Self {
        Self {
            engine,
            requests,
            live,
            catalog: Arc::new(NoCatalog),
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn approve_batch(
        &self,
        request_ids: &[String],
        approver: &str,
    ) -> Result<BatchSummary, BatchError> {
        self.approve_batch_cancellable(request_ids, approver, &AtomicBool::new(false))
    }

    /// `cancel` is honoured up to the moment phase B starts. After that the
    /// batch runs to the end, committed moves cannot be taken back.
    #[instrument(skip_all, fields(batch = request_ids.len(), approver))]
    pub fn approve_batch_cancellable(
        &self,
        request_ids: &[String],
        approver: &str,
        cancel: &AtomicBool,
    ) -> Result<BatchSummary, BatchError> {
        let mut summary = BatchSummary::default();
        let mut violations = vec![];
        let mut selected = vec![];
        let mut seen = HashSet::new();

        for id in request_ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            match self.requests.get(id)? {
                None => violations.push(Violation::UnknownRequest {
                    request_id: id.clone(),
                }),
                Some(request) if !request.is_pending() => {
                    summary.already_applied += request.lines.len();
                }
                Some(request) => selected.push(request),
            }
        }
        if cancel.load(Ordering::SeqCst) {
            return Err(BatchError::Cancelled);
        }

        violations.extend(self.prevalidate(&selected)?);
        if !violations.is_empty() {
            warn!(violations = violations.len(), "batch rejected");
            return Err(BatchError::Rejected(violations));
        }
        if cancel.load(Ordering::SeqCst) {
            return Err(BatchError::Cancelled);
        }

        let failures = self.apply(&selected, approver, &mut summary);
        if !failures.is_empty() {
            warn!(
                failures = failures.len(),
                applied = summary.moves_applied,
                "batch partially applied"
            );
            return Err(BatchError::Partial { summary, failures });
        }

        info!(
            completed = summary.requests_completed,
            applied = summary.moves_applied,
            already_applied = summary.already_applied,
            "batch approved"
        );
        Ok(summary)
    }

    /// Phase A. Reads only; reports every violation in the batch.
    pub fn prevalidate(&self, requests: &[PendingMovement]) -> Result<Vec<Violation>, LedgerError> {
        let mut violations = vec![];
        let mut stock: HashMap<String, Option<LiveStock>> = HashMap::new();
        let mut draws: BTreeMap<(String, String), i64> = BTreeMap::new();
        let mut missing = BTreeSet::new();

        for request in requests {
            if request.lines.is_empty() {
                violations.push(Violation::EmptyRequest {
                    request_id: request.id.clone(),
                });
                continue;
            }
            for (material, quantity) in request.outstanding() {
                if quantity <= 0 {
                    violations.push(Violation::InvalidQuantity {
                        request_id: request.id.clone(),
                        material: material.clone(),
                        quantity,
                    });
                    continue;
                }
                if request.direction != Direction::Outbound {
                    continue;
                }

                let cached = match stock.entry(material.clone()) {
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => entry.insert(self.live.stock(material)?),
                };
                let key = (material.clone(), request.location.clone());
                if cached
                    .as_ref()
                    .and_then(|s| s.quantity(&request.location))
                    .is_none()
                {
                    if missing.insert(key) {
                        violations.push(Violation::MissingInventory {
                            material: material.clone(),
                            location: request.location.clone(),
                            description: self.catalog.describe(material),
                        });
                    }
                    continue;
                }
                let draw = draws.entry(key).or_insert(0);
                *draw = draw.saturating_add(quantity);
            }
        }

        for ((material, location), requested) in draws {
            let available = stock
                .get(&material)
                .and_then(|s| s.as_ref())
                .and_then(|s| s.quantity(&location))
                .unwrap_or(0);
            if requested > available {
                violations.push(Violation::InsufficientStock {
                    description: self.catalog.describe(&material),
                    material,
                    location,
                    requested,
                    available,
                });
            }
        }

        Ok(violations)
    }

    /// Phase B. Requests in selection order, each material its own unit.
    fn apply(
        &self,
        requests: &[PendingMovement],
        approver: &str,
        summary: &mut BatchSummary,
    ) -> Vec<ApplyFailure> {
        let mut failures = vec![];

        for request in requests {
            let effective_at = self.engine.calendar().effective_instant(
                request.accepted_at.map(|t| t.to_datetime_utc()),
                request.requested_date,
            );
            let mut complete = true;
            let mut flipped = false;

            for (material, quantity) in request.outstanding() {
                let outcome = request
                    .direction
                    .signed(quantity)
                    .map_err(LedgerError::from)
                    .and_then(|signed| {
                        self.engine.approve(&Approval {
                            material: material.clone(),
                            source_id: request.id.clone(),
                            quantity: signed,
                            location: request.location.clone(),
                            effective_at,
                            source_kind: request.direction.into(),
                            reason: request.reason.clone(),
                            approver: approver.to_owned(),
                            from_request: true,
                        })
                    });

                match outcome {
                    Ok(ApprovalOutcome::Applied {
                        request_completed, ..
                    }) => {
                        summary.moves_applied += 1;
                        flipped |= request_completed;
                    }
                    Ok(ApprovalOutcome::AlreadyApplied { .. }) => summary.already_applied += 1,
                    Err(error) => {
                        warn!(request_id = %request.id, material = %material, %error, "line failed");
                        complete = false;
                        failures.push(ApplyFailure {
                            request_id: request.id.clone(),
                            material: Some(material.clone()),
                            error,
                        });
                    }
                }
            }

            // a concurrent run that finished the request owns its completion
            if !complete || !flipped {
                continue;
            }
            summary.requests_completed += 1;
            if let Some(work_order) = &request.work_order {
                if let Err(error) = self.requests.complete_work_order(work_order, &request.id) {
                    failures.push(ApplyFailure {
                        request_id: request.id.clone(),
                        material: None,
                        error,
                    });
                }
            }
        }

        failures
    }
}
