// X-Hub-Signature verification.
//
// Header format: {algorithm}={hex digest}
//
// The hub signs the exact bytes it POSTs with HMAC-{algorithm}, keyed by the
// `hub.secret` we sent when subscribing. The hub picks the algorithm, so any
// of the SHA family is accepted; anything else is reported as unsupported
// rather than failing hard.

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha224, Sha256, Sha384, Sha512};

/// Outcome of checking a claimed signature against a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    /// The digest matches the payload.
    Valid,
    /// Known algorithm, but the digest doesn't match (or isn't hex).
    Invalid,
    /// The declared algorithm isn't one we can compute.
    UnsupportedAlgorithm,
}

/// A parsed `X-Hub-Signature` header. Both parts are lowercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub algorithm: String,
    pub digest: String,
}

/// Split a signature header into algorithm and digest.
///
/// Never fails: a missing part comes back as an empty string, which later
/// verifies as unsupported or invalid.
pub fn parse_signature_header(value: &str) -> SignatureHeader {
    let mut parts = value.split('=');
    let algorithm = parts.next().unwrap_or("").trim().to_lowercase();
    let digest = if value.contains('=') {
        value.rsplit('=').next().unwrap_or("").trim().to_lowercase()
    } else {
        String::new()
    };
    SignatureHeader { algorithm, digest }
}

/// Check `claimed_hex` against the HMAC of `raw` keyed by `secret`.
///
/// The digest comparison runs in constant time.
pub fn check(secret: &str, algorithm: &str, claimed_hex: &str, raw: &[u8]) -> SignatureCheck {
    let algorithm = algorithm.to_ascii_lowercase();
    if !is_supported(&algorithm) {
        return SignatureCheck::UnsupportedAlgorithm;
    }

    let Ok(claimed) = hex::decode(claimed_hex.trim()) else {
        return SignatureCheck::Invalid;
    };

    let key = secret.as_bytes();
    let matches = match algorithm.as_str() {
        "sha1" => verify_mac::<Hmac<Sha1>>(key, raw, &claimed),
        "sha224" => verify_mac::<Hmac<Sha224>>(key, raw, &claimed),
        "sha256" => verify_mac::<Hmac<Sha256>>(key, raw, &claimed),
        "sha384" => verify_mac::<Hmac<Sha384>>(key, raw, &claimed),
        "sha512" => verify_mac::<Hmac<Sha512>>(key, raw, &claimed),
        _ => return SignatureCheck::UnsupportedAlgorithm,
    };

    if matches {
        SignatureCheck::Valid
    } else {
        SignatureCheck::Invalid
    }
}

/// Returns `true` only when the payload is authentic.
pub fn verify(secret: &str, algorithm: &str, claimed_hex: &str, raw: &[u8]) -> bool {
    check(secret, algorithm, claimed_hex, raw) == SignatureCheck::Valid
}

/// Whether an algorithm name (lowercase) can be verified.
pub fn is_supported(algorithm: &str) -> bool {
    matches!(
        algorithm,
        "sha1" | "sha224" | "sha256" | "sha384" | "sha512"
    )
}

/// Compute the lowercase hex HMAC of `raw`, as a hub would put it in the
/// header. Returns `None` for unsupported algorithms.
pub fn sign(secret: &str, algorithm: &str, raw: &[u8]) -> Option<String> {
    let key = secret.as_bytes();
    let digest = match algorithm.to_ascii_lowercase().as_str() {
        "sha1" => compute_mac::<Hmac<Sha1>>(key, raw)?,
        "sha224" => compute_mac::<Hmac<Sha224>>(key, raw)?,
        "sha256" => compute_mac::<Hmac<Sha256>>(key, raw)?,
        "sha384" => compute_mac::<Hmac<Sha384>>(key, raw)?,
        "sha512" => compute_mac::<Hmac<Sha512>>(key, raw)?,
        _ => return None,
    };
    Some(hex::encode(digest))
}

// --- Private helpers ---

fn verify_mac<M: Mac + KeyInit>(key: &[u8], raw: &[u8], claimed: &[u8]) -> bool {
    let Ok(mut mac) = <M as Mac>::new_from_slice(key) else {
        return false;
    };
    mac.update(raw);
    mac.verify_slice(claimed).is_ok()
}

fn compute_mac<M: Mac + KeyInit>(key: &[u8], raw: &[u8]) -> Option<Vec<u8>> {
    let mut mac = <M as Mac>::new_from_slice(key).ok()?;
    mac.update(raw);
    Some(mac.finalize().into_bytes().to_vec())
}
