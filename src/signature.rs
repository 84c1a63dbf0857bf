//! GitHub `X-Hub-Signature-256` verification

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
const SIGNATURE_PREFIX: &str = "sha256=";

/// Hex-encoded HMAC-SHA256 of `body` keyed with `secret`.
fn hmac_hex(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Builds the header value GitHub would send for `body`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length, so this never falls back
    format!("{}{}", SIGNATURE_PREFIX, hmac_hex(secret, body).unwrap_or_default())
}

/// Verifies a `sha256=<hex>` header against the raw request body.
///
/// Headers without the prefix, shorter than it, or carrying a digest of the
/// wrong length are rejected. The hex digests are compared in constant time.
pub fn verify_signature(secret: &str, signature_header: &str, body: &[u8]) -> bool {
    let Some(provided) = signature_header.strip_prefix(SIGNATURE_PREFIX) else {
        warn!("Signature header does not start with '{}'", SIGNATURE_PREFIX);
        return false;
    };

    let Some(expected) = hmac_hex(secret, body) else {
        return false;
    };

    // ct_eq on slices of different length is false, not a panic
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}
