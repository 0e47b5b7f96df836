//! Round-key and auth-key derivation from a master key and nonce (§4.C).

use crate::error::{EamsaError, Result};
use crate::hash::sha3_512_concat;

pub const NUM_ROUND_KEYS: usize = 11;
pub const SUBKEY_LEN: usize = 16;
pub const AUTH_KEY_LEN: usize = 32;
pub const MASTER_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 16;

/// The eleven 16-byte round subkeys used by the block transform.
#[derive(Clone)]
pub struct RoundKeySchedule {
    subkeys: [[u8; SUBKEY_LEN]; NUM_ROUND_KEYS],
}

impl RoundKeySchedule {
    #[must_use]
    pub fn subkey(&self, index: usize) -> &[u8; SUBKEY_LEN] {
        &self.subkeys[index % NUM_ROUND_KEYS]
    }
}

impl zeroize::Zeroize for RoundKeySchedule {
    fn zeroize(&mut self) {
        for sk in &mut self.subkeys {
            sk.zeroize();
        }
    }
}

impl Drop for RoundKeySchedule {
    fn drop(&mut self) {
        zeroize::Zeroize::zeroize(self);
    }
}

/// Derives the 11 round subkeys: `subkey_i = SHA3-512(be32(i+1) || master_key || nonce || shared_secret?)[0..16]`.
///
/// Returns `SelfTestFailed` if any two subkeys collide — expected with
/// overwhelming probability never to happen for a well-formed master key,
/// so a collision indicates a broken hash or key material and the design
/// requires treating it as fatal rather than silently proceeding.
pub fn derive_round_keys(
    master_key: &[u8; MASTER_KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    shared_secret: Option<&[u8]>,
) -> Result<RoundKeySchedule> {
    let mut subkeys = [[0u8; SUBKEY_LEN]; NUM_ROUND_KEYS];
    for (i, subkey) in subkeys.iter_mut().enumerate() {
        let counter = ((i as u32) + 1).to_be_bytes();
        let digest = match shared_secret {
            Some(secret) => sha3_512_concat(&[&counter, master_key.as_slice(), nonce.as_slice(), secret]),
            None => sha3_512_concat(&[&counter, master_key.as_slice(), nonce.as_slice()]),
        };
        subkey.copy_from_slice(&digest[..SUBKEY_LEN]);
    }

    for i in 0..NUM_ROUND_KEYS {
        for j in (i + 1)..NUM_ROUND_KEYS {
            if subkeys[i] == subkeys[j] {
                return Err(EamsaError::SelfTestFailed("round key collision in derived schedule"));
            }
        }
    }

    Ok(RoundKeySchedule { subkeys })
}

/// Derives the 32-byte auth key fed to HMAC: `SHA3-512("AUTH" || master_key || nonce)[0..32]`.
#[must_use]
pub fn derive_auth_key(master_key: &[u8; MASTER_KEY_LEN], nonce: &[u8; NONCE_LEN]) -> [u8; AUTH_KEY_LEN] {
    let digest = sha3_512_concat(&[b"AUTH", master_key.as_slice(), nonce.as_slice()]);
    let mut auth_key = [0u8; AUTH_KEY_LEN];
    auth_key.copy_from_slice(&digest[..AUTH_KEY_LEN]);
    auth_key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_keys_are_pairwise_distinct() {
        let key = [0u8; MASTER_KEY_LEN];
        let nonce = [0u8; NONCE_LEN];
        let schedule = derive_round_keys(&key, &nonce, None).expect("derive");
        for i in 0..NUM_ROUND_KEYS {
            for j in (i + 1)..NUM_ROUND_KEYS {
                assert_ne!(schedule.subkey(i), schedule.subkey(j));
            }
        }
        assert_ne!(schedule.subkey(0), schedule.subkey(10));
    }

    #[test]
    fn round_keys_are_deterministic() {
        let mut key = [0u8; MASTER_KEY_LEN];
        for (i, b) in key.iter_mut().enumerate() {
            *b = i as u8;
        }
        let mut nonce = [0u8; NONCE_LEN];
        for (i, b) in nonce.iter_mut().enumerate() {
            *b = i as u8;
        }
        let a = derive_round_keys(&key, &nonce, None).expect("derive");
        let b = derive_round_keys(&key, &nonce, None).expect("derive");
        for i in 0..NUM_ROUND_KEYS {
            assert_eq!(a.subkey(i), b.subkey(i));
        }
    }

    #[test]
    fn shared_secret_changes_the_schedule() {
        let key = [1u8; MASTER_KEY_LEN];
        let nonce = [2u8; NONCE_LEN];
        let a = derive_round_keys(&key, &nonce, None).expect("derive");
        let b = derive_round_keys(&key, &nonce, Some(b"extra")).expect("derive");
        assert_ne!(a.subkey(0), b.subkey(0));
    }

    #[test]
    fn auth_key_is_32_bytes_and_key_sensitive() {
        let nonce = [3u8; NONCE_LEN];
        let a = derive_auth_key(&[4u8; MASTER_KEY_LEN], &nonce);
        let b = derive_auth_key(&[5u8; MASTER_KEY_LEN], &nonce);
        assert_eq!(a.len(), AUTH_KEY_LEN);
        assert_ne!(a, b);
    }
}
