//! Material movement ledger with daily inventory snapshots.
//!
//! Approved stock movements become immutable [`movement::Move`] facts. Each one
//! is written in the same sled transaction as the material's daily
//! [`snapshot::Snapshot`] and its [`live::LiveStock`] projection, so the three
//! never disagree.
use std::sync::Arc;

pub mod calendar;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod live;
pub mod movement;
pub mod request;
pub mod snapshot;
pub mod store;
pub mod utils;

use config::LedgerConfig;
use coordinator::BatchCoordinator;
use engine::ApprovalEngine;
use error::LedgerError;
use ledger::LedgerStore;
use live::LiveCache;
use request::RequestStore;
use snapshot::SnapshotStore;
use store::Trees;

/// Every component wired against one database.
#[derive(Clone)]
pub struct StockLedger {
    instance: Arc<sled::Db>,
    config: LedgerConfig,
    moves: LedgerStore,
    snapshots: SnapshotStore,
    live: LiveCache,
    requests: RequestStore,
    engine: ApprovalEngine,
    coordinator: BatchCoordinator,
}

impl StockLedger {
    pub fn new(instance: Arc<sled::Db>, config: LedgerConfig) -> Result<Self, LedgerError> {
        let trees = Trees::open(&instance)?;
        let moves = LedgerStore::new(trees.moves.clone());
        let snapshots = SnapshotStore::new(trees.snapshots.clone());
        let live = LiveCache::new(trees.live.clone());
        let requests = RequestStore::new(trees.requests.clone(), trees.work_orders.clone());
        let engine = ApprovalEngine::new(trees, &config);
        let coordinator = BatchCoordinator::new(engine.clone(), requests.clone(), live.clone());

        Ok(Self {
            instance,
            config,
            moves,
            snapshots,
            live,
            requests,
            engine,
            coordinator,
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }
    pub fn moves(&self) -> &LedgerStore {
        &self.moves
    }
    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }
    pub fn live(&self) -> &LiveCache {
        &self.live
    }
    pub fn requests(&self) -> &RequestStore {
        &self.requests
    }
    pub fn engine(&self) -> &ApprovalEngine {
        &self.engine
    }
    pub fn coordinator(&self) -> &BatchCoordinator {
        &self.coordinator
    }
    /// Replaces the coordinator's catalog used to describe materials in
    /// validation failures.
    pub fn with_catalog(mut self, catalog: Arc<dyn catalog::Catalog>) -> Self {
        self.coordinator = self.coordinator.with_catalog(catalog);
        self
    }

    /// Snapshot days of `material` whose opening no longer matches a replay
    /// of its moves.
    pub fn find_chain_breaks(
        &self,
        material: &str,
    ) -> Result<Vec<snapshot::ChainBreak>, LedgerError> {
        self.snapshots
            .find_chain_breaks(material, &self.moves, self.engine.calendar())
    }

    pub fn flush(&self) -> Result<(), LedgerError> {
        self.instance.flush()?;
        Ok(())
    }
}
