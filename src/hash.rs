//! SHA3-512 and HMAC-SHA3-512 primitives.
//!
//! HMAC here is the textbook construction (RFC 2104) instantiated with
//! SHA3-512: block size 136 bytes (the Keccak-512 rate), inner/outer pad
//! bytes `0x36`/`0x5C`. The `hmac` crate already implements this generically
//! over any `Digest`, so we use it directly rather than hand-rolling the
//! padding.

use hmac::{Hmac, Mac};
use sha3::{Digest, Sha3_256, Sha3_512};

pub const HASH_LEN: usize = 64;
pub const HASH_LEN_256: usize = 32;
pub const HMAC_BLOCK_SIZE: usize = 136;

pub type HmacSha3_512 = Hmac<Sha3_512>;

/// Used only by the key lifecycle's random-overwrite secure-erase pass
/// (§4.G); everything else in the core is SHA3-512.
#[must_use]
pub fn sha3_256(data: &[u8]) -> [u8; HASH_LEN_256] {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[must_use]
pub fn sha3_512(data: &[u8]) -> [u8; HASH_LEN] {
    let mut hasher = Sha3_512::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hashes an arbitrary number of concatenated byte slices without an
/// intermediate `Vec` allocation.
#[must_use]
pub fn sha3_512_concat(parts: &[&[u8]]) -> [u8; HASH_LEN] {
    let mut hasher = Sha3_512::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// HMAC-SHA3-512(key, message), producing a 64-byte tag.
///
/// # Panics
/// Never: `Hmac::new_from_slice` accepts keys of any length (short keys are
/// zero-padded, long keys are pre-hashed), per RFC 2104.
#[must_use]
pub fn hmac_sha3_512(key: &[u8], message: &[u8]) -> [u8; HASH_LEN] {
    let mut mac = <HmacSha3_512 as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// Constant-time comparison of two 64-byte tags.
///
/// Iterates the full length regardless of where the strings first differ,
/// accumulating the OR of byte-wise XORs, and only inspects the accumulator
/// once at the end. No early return on mismatch.
#[must_use]
pub fn constant_time_eq(a: &[u8; HASH_LEN], b: &[u8; HASH_LEN]) -> bool {
    let mut acc = 0u8;
    for i in 0..HASH_LEN {
        acc |= a[i] ^ b[i];
    }
    acc == 0
}
