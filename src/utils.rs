//! Token generation and credential digests

use super::error::ServiceError;
use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique token from a fresh uuid then encode using bech32 with `hrp` as prefix
pub fn new_token(hrp: &str) -> Result<String, ServiceError> {
    let hrp = bech32::Hrp::parse(hrp)
        .map_err(|e| ServiceError::Internal(format!("token prefix {hrp:?}: {e}")))?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())
        .map_err(|e| ServiceError::Internal(format!("token encoding: {e}")))?;
    Ok(encode)
}

// one-shot hex token handed out for email verification
pub fn new_verification_token() -> String {
    hex::encode(uuid7().as_bytes())
}

pub fn credential_digest(salt: &str, secret: &str) -> String {
    sha256::digest(format!("{salt}:{secret}").as_bytes())
}
