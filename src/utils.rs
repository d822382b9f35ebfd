//! Utility functions for identifiers

use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Id for a freshly sealed move. Falls back to the plain uuid7 text form if
/// the prefix is ever rejected by bech32.
pub fn new_move_id() -> String {
    new_uuid_to_bech32("move_").unwrap_or_else(|_| uuid7().to_string())
}

pub fn new_request_id() -> String {
    new_uuid_to_bech32("req_").unwrap_or_else(|_| uuid7().to_string())
}
