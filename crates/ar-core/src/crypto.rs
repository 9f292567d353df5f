//! Hashing, token generation, and constant-time comparison.
//!
//! Confirmation tokens and runner tokens are 32 bytes of system entropy,
//! base64url-encoded without padding; only their sha-256 hex digest is ever
//! persisted. Comparisons against stored digests go through
//! [`constant_time_eq`] so the timing of a mismatch reveals nothing about
//! where it occurred.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use subtle::ConstantTimeEq;

use crate::error::CoreError;

/// Raw byte length of generated tokens and lease ids.
pub const TOKEN_LEN: usize = 32;

/// Lower-case hex sha-256 digest of the input.
pub fn sha256_hex(input: &str) -> String {
    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    let mut out = String::with_capacity(hash.as_ref().len() * 2);
    for byte in hash.as_ref() {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Generate a 32-byte random value encoded as unpadded base64url.
pub fn generate_token() -> Result<String, CoreError> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; TOKEN_LEN];
    rng.fill(&mut bytes)
        .map_err(|_| CoreError::internal("failed to draw system entropy"))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Generate a random lease id. Same material as a token; named separately
/// because leases are never shown to users.
pub fn generate_lease_id() -> Result<String, CoreError> {
    generate_token()
}

/// Compare two strings in time dependent only on the longer length.
///
/// A byte-wise XOR accumulator walks both buffers to `max(len(a), len(b))`,
/// folding the length difference into the accumulator, so neither an early
/// mismatch nor a length mismatch short-circuits.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let len = a.len().max(b.len());

    let mut diff = (a.len() ^ b.len()) as u8;
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= x ^ y;
    }
    diff.ct_eq(&0u8).into()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn sha256_empty_input() {
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn tokens_are_unique_and_urlsafe() {
        let t1 = generate_token().unwrap();
        let t2 = generate_token().unwrap();
        assert_ne!(t1, t2);
        // 32 bytes -> 43 base64url chars, no padding.
        assert_eq!(t1.len(), 43);
        assert!(!t1.contains('='));
        assert!(t1
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn constant_time_eq_agrees_with_eq() {
        assert!(constant_time_eq("", ""));
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
        assert!(!constant_time_eq("ab", "abc"));
        assert!(!constant_time_eq("", "x"));

        let token = generate_token().unwrap();
        assert!(constant_time_eq(&token, &token.clone()));
    }
}
