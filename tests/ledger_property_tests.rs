//! Property-based tests for the ledger invariants.
//!
//! Random sequences of approvals (out of order days, repeated source ids,
//! several locations) are applied to a fresh database and the stores are then
//! checked against the move log, which is the source of truth:
//!
//! 1. Idempotence - one move per source id, repeats change nothing
//! 2. Conservation - live quantity == sum of non-deleted moves per location
//! 3. Snapshot consistency - closing - opening == that day's moves
//! 4. Batch validation atomicity - a rejected batch writes no moves
//! 5. Non-negativity - validated outbound batches never overdraw
use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use stock_ledger::{
    StockLedger,
    calendar::DayKey,
    config::LedgerConfig,
    coordinator::BatchError,
    engine::{Approval, ApprovalOutcome},
    movement::{Direction, SourceKind},
    request::MovementDraft,
};
use tempfile::{TempDir, tempdir};

const LOCATIONS: [&str; 3] = ["A", "B", "C"];

fn open_ledger() -> (TempDir, StockLedger) {
    let temp_dir = tempdir().unwrap();
    let db = sled::open(temp_dir.path().join("prop.db")).unwrap();
    let ledger = StockLedger::new(Arc::new(db), LedgerConfig::default()).unwrap();
    (temp_dir, ledger)
}

fn at(day_offset: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        + Duration::days(i64::from(day_offset))
        + Duration::minutes(i64::from(minute))
}

#[derive(Debug, Clone)]
struct Op {
    source: u8,
    day_offset: u32,
    minute: u32,
    location: usize,
    quantity: i64,
}

/// Strategy for one approval. Source ids are drawn from a small pool so
/// repeats are common.
fn op_strategy() -> impl Strategy<Value = Op> {
    (
        0u8..16,
        0u32..6,
        0u32..1440,
        0usize..LOCATIONS.len(),
        prop_oneof![-60i64..=-1, 1i64..=60],
    )
        .prop_map(|(source, day_offset, minute, location, quantity)| Op {
            source,
            day_offset,
            minute,
            location,
            quantity,
        })
}

fn to_approval(op: &Op) -> Approval {
    Approval {
        material: "M".into(),
        source_id: format!("src_{}", op.source),
        quantity: op.quantity,
        location: LOCATIONS[op.location].into(),
        effective_at: at(op.day_offset, op.minute),
        source_kind: if op.quantity > 0 {
            SourceKind::InboundRequest
        } else {
            SourceKind::OutboundRequest
        },
        reason: String::new(),
        approver: "user_prop".into(),
        from_request: false,
    }
}

fn submit_outbound(ledger: &StockLedger, quantity: i64, location: &str) -> String {
    ledger
        .requests()
        .submit(
            MovementDraft::new()
                .set_direction(Direction::Outbound)
                .add_line("M", quantity)
                .set_location(location)
                .set_requested_date(DayKey::new(2024, 1, 2).unwrap())
                .set_creator("user_prop"),
        )
        .unwrap()
        .id
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Properties 1-3 over an arbitrary approval sequence.
    #[test]
    fn prop_stores_agree_with_the_move_log(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let (_dir, ledger) = open_ledger();
        let calendar = *ledger.engine().calendar();

        let mut first_seen = HashSet::new();
        for op in &ops {
            let outcome = ledger.engine().approve(&to_approval(op)).unwrap();
            let fresh = first_seen.insert(op.source);
            prop_assert_eq!(outcome.is_applied(), fresh, "only the first use of a source id applies");
        }

        // 1. idempotence
        let history = ledger.moves().history("M").unwrap();
        prop_assert_eq!(history.len(), first_seen.len());

        let stock_before = ledger.live().stock("M").unwrap();
        let repeat = ledger.engine().approve(&to_approval(&ops[0])).unwrap();
        let repeated_is_noop = matches!(repeat, ApprovalOutcome::AlreadyApplied { .. });
        prop_assert!(repeated_is_noop);
        prop_assert_eq!(ledger.live().stock("M").unwrap(), stock_before);

        // 2. conservation
        let mut expected: BTreeMap<String, i64> = BTreeMap::new();
        let mut per_day: HashMap<DayKey, BTreeMap<String, i64>> = HashMap::new();
        for fact in history.iter().filter(|m| !m.deleted) {
            prop_assert!(fact.verify());
            *expected.entry(fact.location.clone()).or_insert(0) += fact.quantity;
            let day = calendar.day_key(fact.effective_at.to_datetime_utc());
            *per_day.entry(day).or_default().entry(fact.location.clone()).or_insert(0) += fact.quantity;
        }
        let stock = ledger.live().stock("M").unwrap().unwrap();
        let cached: BTreeMap<String, i64> = stock
            .locations
            .iter()
            .map(|(loc, entry)| (loc.clone(), entry.quantity))
            .collect();
        prop_assert_eq!(cached, expected);
        prop_assert_eq!(stock.revision as usize, history.len());

        // 3. snapshot consistency
        let snapshots = ledger.snapshots().all("M").unwrap();
        prop_assert_eq!(snapshots.len(), per_day.len());
        for snapshot in snapshots {
            let moved: BTreeMap<String, i64> = per_day
                .remove(&snapshot.day)
                .unwrap_or_default()
                .into_iter()
                .filter(|(_, q)| *q != 0)
                .collect();
            prop_assert_eq!(snapshot.net_change(), moved, "day {}", snapshot.day);
        }
    }

    /// Properties 4 and 5: outbound batches against seeded stock.
    #[test]
    fn prop_batches_never_overdraw(
        seed in 1i64..200,
        batches in prop::collection::vec(
            prop::collection::vec((1i64..120, 0usize..2), 1..4),
            1..6,
        )
    ) {
        let (_dir, ledger) = open_ledger();
        let seed_effective = at(0, 0);
        for location in ["A", "B"] {
            ledger.engine().approve(&Approval {
                material: "M".into(),
                source_id: format!("seed_{location}"),
                quantity: seed,
                location: location.into(),
                effective_at: seed_effective,
                source_kind: SourceKind::InboundRequest,
                reason: String::new(),
                approver: "user_prop".into(),
                from_request: false,
            }).unwrap();
        }

        for batch in batches {
            let ids: Vec<String> = batch
                .iter()
                .map(|(quantity, location)| submit_outbound(&ledger, *quantity, ["A", "B"][*location]))
                .collect();
            let moves_before = ledger.moves().count("M");
            let mut draws = [0i64; 2];
            for (quantity, location) in &batch {
                draws[*location] += quantity;
            }
            let available = [
                ledger.live().quantity("M", "A").unwrap().unwrap_or(0),
                ledger.live().quantity("M", "B").unwrap().unwrap_or(0),
            ];

            match ledger.coordinator().approve_batch(&ids, "user_prop") {
                Ok(summary) => {
                    prop_assert!(draws[0] <= available[0] && draws[1] <= available[1]);
                    prop_assert_eq!(summary.moves_applied, batch.len());
                }
                Err(BatchError::Rejected(violations)) => {
                    prop_assert!(!violations.is_empty());
                    prop_assert!(draws[0] > available[0] || draws[1] > available[1]);
                    prop_assert_eq!(ledger.moves().count("M"), moves_before);
                }
                Err(other) => prop_assert!(false, "unexpected batch error: {}", other),
            }

            for location in ["A", "B"] {
                let quantity = ledger.live().quantity("M", location).unwrap().unwrap_or(0);
                prop_assert!(quantity >= 0, "{} went negative: {}", location, quantity);
            }
        }
    }
}
