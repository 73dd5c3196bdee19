//! One-way hashing, salting and entropy primitives.
//!
//! Digests are `BASE64URL(SHA256(input))` without padding, which is always
//! [`HASH_LEN`] characters. The fixed length lets callers reject malformed
//! digests without recomputing anything.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Length of an encoded digest: 32 bytes in unpadded base64url.
pub const HASH_LEN: usize = 43;

/// Hash a plaintext into a fixed-length digest.
#[must_use]
pub fn hash(plaintext: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(plaintext.as_bytes()))
}

/// Check that `digest` is the hash of `plaintext`.
#[must_use]
pub fn verify_hash(plaintext: &str, digest: &str) -> bool {
    verify_format(digest) && constant_time_eq(hash(plaintext).as_bytes(), digest.as_bytes())
}

/// Cheap structural check: right length, base64url alphabet only.
#[must_use]
pub fn verify_format(digest: &str) -> bool {
    digest.len() == HASH_LEN
        && digest.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// `hash(salt ++ plaintext)`.
#[must_use]
pub fn salted_hash(plaintext: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(plaintext.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Check that `digest` is `salted_hash(plaintext, salt)`.
#[must_use]
pub fn verify_salted_hash(plaintext: &str, salt: &str, digest: &str) -> bool {
    verify_format(digest)
        && constant_time_eq(salted_hash(plaintext, salt).as_bytes(), digest.as_bytes())
}

/// `n` bytes from the thread-local CSPRNG, base64url-encoded without padding.
#[must_use]
pub fn random_bytes(n: usize) -> String {
    let mut bytes = vec![0u8; n];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compare two byte strings in constant time. Only the length leaks.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
