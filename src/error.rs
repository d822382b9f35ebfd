//! Error taxonomy for the ledger

/// Rejections raised before any state changes.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Quantity must be greater than zero, got {0}")]
    NonPositiveQuantity(i64),
    #[error("A movement must change stock, got a zero delta")]
    ZeroDelta,
    #[error("Movement is missing a required field: {0}")]
    MissingField(&'static str),
    #[error("Movement does not reference any material")]
    EmptyRequest,
    #[error("Stock at location {0} would overflow")]
    QuantityOverflow(String),
}

#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Gave up on material {material} after {attempts} conflicting attempts")]
    Contention { material: String, attempts: u32 },
    #[error("Storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("Failed to (de)serialise record: {0}")]
    Codec(String),
    #[error("No movement request with id {0}")]
    UnknownRequest(String),
    #[error("Movement request {0} is no longer pending")]
    NotPending(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl LedgerError {
    /// Conflicts and storage hiccups may succeed on a later run, everything
    /// else will fail the same way again.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Contention { .. } | LedgerError::Storage(_))
    }
}

/// A single failed pre-flight check. A batch reports every violation it
/// finds, not just the first.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    #[error("Request {request_id} does not exist")]
    UnknownRequest { request_id: String },
    #[error("Request {request_id} does not reference any material")]
    EmptyRequest { request_id: String },
    #[error("Request {request_id} asks for {quantity} of {material}, quantities must be positive")]
    InvalidQuantity {
        request_id: String,
        material: String,
        quantity: i64,
    },
    #[error("No stock of {material} is recorded at {location}")]
    MissingInventory {
        material: String,
        location: String,
        description: Option<String>,
    },
    #[error("Batch draws {requested} of {material} from {location}, only {available} available")]
    InsufficientStock {
        material: String,
        location: String,
        requested: i64,
        available: i64,
        description: Option<String>,
    },
}
