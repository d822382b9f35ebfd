//! sled layout shared by every component.
//!
//! Records are keyed per material so one approval only ever touches the
//! keys of the material it moves:
//!
//! | tree          | key                            | value                 |
//! |---------------|--------------------------------|-----------------------|
//! | `moves`       | `material 0x00 source_id`      | [`Move`]              |
//! | `snapshots`   | `material 0x00 YYYY-MM-DD`     | [`Snapshot`]          |
//! | `live`        | `material`                     | [`LiveStock`]         |
//! | `requests`    | request id                     | [`PendingMovement`]   |
//! | `work_orders` | work-order id                  | [`WorkOrderCompletion`] |
//!
//! [`Move`]: crate::movement::Move
//! [`Snapshot`]: crate::snapshot::Snapshot
//! [`LiveStock`]: crate::live::LiveStock
//! [`PendingMovement`]: crate::request::PendingMovement
//! [`WorkOrderCompletion`]: crate::request::WorkOrderCompletion
use super::calendar::DayKey;
use super::error::LedgerError;
use sled::{Db, Tree};

const SEPARATOR: u8 = 0x00;

#[derive(Clone)]
pub struct Trees {
    pub moves: Tree,
    pub snapshots: Tree,
    pub live: Tree,
    pub requests: Tree,
    pub work_orders: Tree,
}

impl Trees {
    pub fn open(db: &Db) -> Result<Self, LedgerError> {
        Ok(Self {
            moves: db.open_tree("moves")?,
            snapshots: db.open_tree("snapshots")?,
            live: db.open_tree("live")?,
            requests: db.open_tree("requests")?,
            work_orders: db.open_tree("work_orders")?,
        })
    }
}

/// Prefix shared by all of a material's keys in `moves` and `snapshots`.
pub fn material_prefix(material: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(material.len() + 1);
    key.extend_from_slice(material.as_bytes());
    key.push(SEPARATOR);
    key
}

pub fn move_key(material: &str, source_id: &str) -> Vec<u8> {
    let mut key = material_prefix(material);
    key.extend_from_slice(source_id.as_bytes());
    key
}

pub fn snapshot_key(material: &str, day: DayKey) -> Vec<u8> {
    let mut key = material_prefix(material);
    key.extend_from_slice(day.to_string().as_bytes());
    key
}

pub fn live_key(material: &str) -> Vec<u8> {
    material.as_bytes().to_vec()
}

pub fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, LedgerError> {
    minicbor::to_vec(value).map_err(|e| LedgerError::Codec(e.to_string()))
}

pub fn decode<T>(bytes: &[u8]) -> Result<T, LedgerError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    minicbor::decode(bytes).map_err(|e| LedgerError::Codec(e.to_string()))
}
