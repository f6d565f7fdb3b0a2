//! Provably fair crash-multiplier generation.
//!
//! A round's outcome is fixed by HMAC-SHA512 over the public client seed and
//! round nonce, keyed with the server seed. Once the server seed is revealed
//! after settlement, any party can recompute the digest and confirm the crash
//! multiplier was not altered post hoc. The message format
//! (`client_seed:nonce`), the 13-hex-character truncation, and the flooring
//! formula are the external verification contract and must never change.

use hmac::{Hmac, Mac};
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

/// Lowest possible crash multiplier, in hundredths (1.00x).
pub const MIN_CRASH_CENTI: u64 = 100;
/// Highest possible crash multiplier, in hundredths (1,000,000.00x).
pub const MAX_CRASH_CENTI: u64 = 100_000_000;

/// 13 hex characters = 52 bits of entropy, exactly representable in an f64.
const HEX_PREFIX_LEN: usize = 13;
/// Cap keeping the divisor in the multiplier formula away from zero.
const FLOAT_CAP: f64 = 0.999999999999;

/// Deterministic outcome derived from one (server seed, client seed, nonce)
/// triple.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Full lower-hex HMAC-SHA512 digest (128 characters).
    pub hex: String,
    /// Uniform draw in `[0, 1)` taken from the first 13 hex characters.
    pub float: f64,
    /// Crash multiplier in hundredths, in `[100, 100_000_000]`.
    pub crash_centi: u64,
}

/// Compute the outcome for a round. Pure function of its three inputs.
pub fn compute_outcome(server_seed: &str, client_seed: &str, nonce: u64) -> Outcome {
    let mut mac = HmacSha512::new_from_slice(server_seed.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(client_seed.as_bytes());
    mac.update(b":");
    mac.update(nonce.to_string().as_bytes());
    let hex = hex::encode(mac.finalize().into_bytes());

    let num = u64::from_str_radix(&hex[..HEX_PREFIX_LEN], 16).unwrap_or(0);
    let float = (num as f64 / 16f64.powi(HEX_PREFIX_LEN as i32)).min(FLOAT_CAP);

    Outcome {
        hex,
        float,
        crash_centi: multiplier_from_float(float),
    }
}

/// Map a uniform draw in `[0, 1)` to a crash multiplier in hundredths:
/// `floor(100 / (1 - float))`, floored never rounded, clamped to
/// `[MIN_CRASH_CENTI, MAX_CRASH_CENTI]`. Monotone non-decreasing in `float`.
pub fn multiplier_from_float(float: f64) -> u64 {
    let f = float.clamp(0.0, FLOAT_CAP);
    let raw = (100.0 / (1.0 - f)).floor() as u64;
    raw.clamp(MIN_CRASH_CENTI, MAX_CRASH_CENTI)
}

/// Recompute the outcome for a settled round and compare against the recorded
/// crash multiplier. This is the post-hoc verification any player runs once
/// the server seed is revealed.
pub fn verify(server_seed: &str, client_seed: &str, nonce: u64, expected_centi: u64) -> bool {
    compute_outcome(server_seed, client_seed, nonce).crash_centi == expected_centi
}
