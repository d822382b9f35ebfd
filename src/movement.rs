//! Core movement types and the immutable ledger fact
use super::error::ValidationError;
use super::utils;
use chrono::{DateTime, TimeZone, Utc};

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct TimeStamp(DateTime<Utc>);

impl TimeStamp {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .unwrap_or_default()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp {
    fn default() -> Self {
        Self::new()
    }
}

impl From<DateTime<Utc>> for TimeStamp {
    fn from(value: DateTime<Utc>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    #[n(0)]
    Inbound,
    #[n(1)]
    Outbound,
}

impl Direction {
    /// Turns a request-level magnitude into the delta applied to stock.
    pub fn signed(&self, quantity: i64) -> Result<i64, ValidationError> {
        if quantity <= 0 {
            return Err(ValidationError::NonPositiveQuantity(quantity));
        }
        Ok(match self {
            Direction::Inbound => quantity,
            Direction::Outbound => -quantity,
        })
    }
}

/// What kind of document produced a move.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    #[n(0)]
    InboundRequest,
    #[n(1)]
    OutboundRequest,
}

impl From<Direction> for SourceKind {
    fn from(value: Direction) -> Self {
        match value {
            Direction::Inbound => SourceKind::InboundRequest,
            Direction::Outbound => SourceKind::OutboundRequest,
        }
    }
}

/// Immutable ledger fact. At most one exists per (material, source id).
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Move {
    #[n(0)]
    pub id: String, // bech32 uuid7, "move_" prefix
    #[n(1)]
    pub material: String,
    #[n(2)]
    pub quantity: i64, // +inbound / -outbound
    #[n(3)]
    pub location: String,
    #[n(4)]
    pub effective_at: TimeStamp, // business date it counts toward
    #[n(5)]
    pub recorded_at: TimeStamp, // wall clock
    #[n(6)]
    pub source_kind: SourceKind,
    #[n(7)]
    pub source_id: String, // idempotency key
    #[n(8)]
    pub reason: String,
    #[n(9)]
    pub approver: String,
    #[n(10)]
    pub deleted: bool,
    #[n(11)]
    pub digest: String, // sha256 over the fact, see `fingerprint`
}

/// The fields covered by a move's digest. `id` and `deleted` are left out so
/// the digest identifies the fact rather than its storage bookkeeping.
#[derive(minicbor::Encode)]
struct Fact<'a> {
    #[n(0)]
    material: &'a str,
    #[n(1)]
    quantity: i64,
    #[n(2)]
    location: &'a str,
    #[n(3)]
    effective_at: &'a TimeStamp,
    #[n(4)]
    recorded_at: &'a TimeStamp,
    #[n(5)]
    source_kind: &'a SourceKind,
    #[n(6)]
    source_id: &'a str,
    #[n(7)]
    reason: &'a str,
    #[n(8)]
    approver: &'a str,
}

impl Move {
    /// Build and seal a new fact. The quantity is already signed.
    #[allow(clippy::too_many_arguments)]
    pub fn seal(
        material: &str,
        quantity: i64,
        location: &str,
        effective_at: TimeStamp,
        recorded_at: TimeStamp,
        source_kind: SourceKind,
        source_id: &str,
        reason: &str,
        approver: &str,
    ) -> Result<Self, ValidationError> {
        if quantity == 0 {
            return Err(ValidationError::ZeroDelta);
        }
        let mut fact = Move {
            id: utils::new_move_id(),
            material: material.to_owned(),
            quantity,
            location: location.to_owned(),
            effective_at,
            recorded_at,
            source_kind,
            source_id: source_id.to_owned(),
            reason: reason.to_owned(),
            approver: approver.to_owned(),
            deleted: false,
            digest: String::new(),
        };
        fact.digest = fact.fingerprint();
        Ok(fact)
    }

    pub fn fingerprint(&self) -> String {
        let fact = Fact {
            material: &self.material,
            quantity: self.quantity,
            location: &self.location,
            effective_at: &self.effective_at,
            recorded_at: &self.recorded_at,
            source_kind: &self.source_kind,
            source_id: &self.source_id,
            reason: &self.reason,
            approver: &self.approver,
        };
        // Timestamps outside the nanosecond range are the only encode failure,
        // and they hash as an empty fact which never matches a sealed digest.
        let cbor = minicbor::to_vec(&fact).unwrap_or_default();
        sha256::digest(&cbor)
    }

    /// True when the stored digest still matches the fact's contents.
    pub fn verify(&self) -> bool {
        self.digest == self.fingerprint()
    }

    pub fn is_entry(&self) -> bool {
        self.quantity > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Move {
        Move::seal(
            "MAT-1",
            25,
            "A",
            TimeStamp::new_with(2024, 6, 1, 0, 0, 0),
            TimeStamp::new(),
            SourceKind::InboundRequest,
            "req_1",
            "restock",
            "user_1",
        )
        .unwrap()
    }

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(original).unwrap();
        let decode: TimeStamp = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn direction_signs_quantities() {
        assert_eq!(Direction::Inbound.signed(40), Ok(40));
        assert_eq!(Direction::Outbound.signed(40), Ok(-40));
        assert_eq!(
            Direction::Outbound.signed(0),
            Err(ValidationError::NonPositiveQuantity(0))
        );
        assert_eq!(
            Direction::Inbound.signed(-3),
            Err(ValidationError::NonPositiveQuantity(-3))
        );
    }

    #[test]
    fn sealed_move_verifies() {
        let fact = sample();
        assert!(fact.verify());
        assert!(!fact.deleted);
        assert!(fact.is_entry());
    }

    #[test]
    fn tampering_breaks_the_digest() {
        let mut fact = sample();
        fact.quantity = 2_500;
        assert!(!fact.verify());
    }

    #[test]
    fn deleted_flag_is_outside_the_digest() {
        let mut fact = sample();
        fact.deleted = true;
        assert!(fact.verify());
    }

    #[test]
    fn zero_delta_is_rejected() {
        let res = Move::seal(
            "MAT-1",
            0,
            "A",
            TimeStamp::new(),
            TimeStamp::new(),
            SourceKind::OutboundRequest,
            "req_1",
            "",
            "user_1",
        );
        assert_eq!(res, Err(ValidationError::ZeroDelta));
    }

    #[test]
    fn move_survives_storage_encoding() {
        let fact = sample();
        let encoding = minicbor::to_vec(&fact).unwrap();
        let decode: Move = minicbor::decode(&encoding).unwrap();
        assert_eq!(fact, decode);
        assert!(decode.verify());
    }
}
