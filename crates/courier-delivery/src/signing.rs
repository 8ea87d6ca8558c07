//! HMAC-SHA256 request signing.
//!
//! Outgoing bodies are signed with the shared secret and the lowercase hex
//! digest is sent as `X-Signature`. [`verify_signature`] is the receiving
//! side of the same contract.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Signature errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SigningError {
    /// Secret key was rejected by the MAC.
    #[error("invalid secret key")]
    InvalidSecret,

    /// Signature is not 64 hex characters.
    #[error("invalid signature format")]
    InvalidFormat,

    /// Signature does not match the body.
    #[error("signature mismatch")]
    Mismatch,
}

/// Signs `body` with `secret` and returns the lowercase hex digest.
///
/// # Errors
///
/// Returns `SigningError::InvalidSecret` if the MAC cannot be keyed.
pub fn sign_body(body: &[u8], secret: &str) -> Result<String, SigningError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SigningError::InvalidSecret)?;

    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks an `X-Signature` value against `body`.
///
/// Hex case is ignored and the comparison runs in constant time.
///
/// # Errors
///
/// Returns `InvalidFormat` for anything other than 64 hex characters and
/// `Mismatch` when the digest differs.
pub fn verify_signature(body: &[u8], signature: &str, secret: &str) -> Result<(), SigningError> {
    if signature.len() != 64 || !signature.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(SigningError::InvalidFormat);
    }

    let expected = sign_body(body, secret)?;
    if timing_safe_eq(&signature.to_ascii_lowercase(), &expected) {
        Ok(())
    } else {
        Err(SigningError::Mismatch)
    }
}

fn timing_safe_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
