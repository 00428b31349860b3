//! HMAC-SHA256 helpers shared by webhook verification and boarding tokens.

use ferry_core::error::{EngineError, EngineResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn mac(secret: &str, message: &[u8]) -> EngineResult<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| EngineError::Validation("signing key rejected".to_string()))?;
    mac.update(message);
    Ok(mac)
}

/// Lower-case hex HMAC-SHA256 of `message` under `secret`
///
/// # Errors
///
/// Returns [`EngineError::Validation`] if the key is rejected.
pub fn sign_hex(secret: &str, message: &[u8]) -> EngineResult<String> {
    Ok(hex::encode(mac(secret, message)?.finalize().into_bytes()))
}

/// Whether `signature` is the hex HMAC-SHA256 of `message`, compared in constant time
#[must_use]
pub fn verify_hex(secret: &str, message: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    mac(secret, message).is_ok_and(|mac| mac.verify_slice(&expected).is_ok())
}
