//! Walks a material through two days of movements and an overdrawn batch.
//!
//! `RUST_LOG=debug cargo run --example warehouse` shows the snapshot decisions.
use std::sync::Arc;
use stock_ledger::{
    StockLedger,
    calendar::DayKey,
    config::LedgerConfig,
    coordinator::BatchError,
    movement::Direction,
    request::MovementDraft,
};
use tracing::info;

fn request(
    ledger: &StockLedger,
    direction: Direction,
    quantity: i64,
    day: DayKey,
) -> anyhow::Result<String> {
    let draft = MovementDraft::new()
        .set_direction(direction)
        .add_line("STEEL-PLATE-6MM", quantity)
        .set_location("RACK-A")
        .set_requested_date(day)
        .set_reason("demo")
        .set_creator("user_clerk");
    Ok(ledger.requests().submit(draft)?.id)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let db = sled::Config::new().temporary(true).open()?;
    let ledger = StockLedger::new(Arc::new(db), LedgerConfig::from_env()?)?;

    let d1 = DayKey::new(2024, 3, 1).ok_or_else(|| anyhow::anyhow!("bad date"))?;
    let d2 = DayKey::new(2024, 3, 2).ok_or_else(|| anyhow::anyhow!("bad date"))?;

    let inbound = request(&ledger, Direction::Inbound, 100, d1)?;
    ledger.coordinator().approve_batch(&[inbound], "user_boss")?;

    let outbound = request(&ledger, Direction::Outbound, 30, d2)?;
    ledger.coordinator().approve_batch(&[outbound], "user_boss")?;

    for snapshot in ledger.snapshots().all("STEEL-PLATE-6MM")? {
        info!(day = %snapshot.day, opening = ?snapshot.opening, closing = ?snapshot.closing, "snapshot");
    }

    let first = request(&ledger, Direction::Outbound, 40, d2)?;
    let second = request(&ledger, Direction::Outbound, 50, d2)?;
    match ledger.coordinator().approve_batch(&[first, second], "user_boss") {
        Err(BatchError::Rejected(violations)) => {
            for violation in violations {
                info!(%violation, "rejected");
            }
        }
        other => info!(?other, "unexpected batch result"),
    }

    info!(
        quantity = ?ledger.live().quantity("STEEL-PLATE-6MM", "RACK-A")?,
        "live stock"
    );
    Ok(())
}
