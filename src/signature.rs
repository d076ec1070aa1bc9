//! HMAC-SHA256 verification of inbound webhook bodies.
//!
//! The signature header carries `"<version> <hex-digest> <salt>"`. The digest
//! covers `"<salt>.<body>"` keyed by the shared webhook secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Signature";
pub const SUPPORTED_VERSION: &str = "v1";

fn digest(secret: &str, salt: &str, body: &[u8]) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(salt.as_bytes());
    mac.update(b".");
    mac.update(body);
    Some(mac.finalize().into_bytes().to_vec())
}

/// Builds a header value that [`verify`] accepts for `body`.
pub fn sign(body: &[u8], secret: &str, salt: &str) -> String {
    let hash = digest(secret, salt, body).map(hex::encode).unwrap_or_default();
    format!("{SUPPORTED_VERSION} {hash} {salt}")
}

/// Returns `true` only when `header` is a well-formed `v1` signature over
/// `body`. Every failure collapses to `false`.
pub fn verify(body: &[u8], header: Option<&str>, secret: &str) -> bool {
    let Some(header) = header else {
        return false;
    };
    let mut parts = header.split(' ');
    let (Some(version), Some(hash), Some(salt), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if version != SUPPORTED_VERSION || salt.is_empty() {
        return false;
    }
    let Ok(provided) = hex::decode(hash) else {
        return false;
    };
    let Some(expected) = digest(secret, salt, body) else {
        return false;
    };
    expected.as_slice().ct_eq(provided.as_slice()).into()
}
