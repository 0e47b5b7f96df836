//! Startup known-answer tests (§4.I).
//!
//! No external oracle vectors are available for this construction (see
//! `DESIGN.md`), so this harness pins the testable properties §8
//! enumerates instead: table bijectivity, round-key distinctness,
//! deterministic encrypt/decrypt round-trips over a fixed vector set, and
//! tamper detection — run once at construction. A failure here is
//! permanent for the process (§4.I): `Eamsa512` records it and every
//! subsequent operation returns `SelfTestFailed`.

use crate::aead::{open, seal};
use crate::block::{decrypt_block, encrypt_block};
use crate::error::{EamsaError, Result};
use crate::kdf::{derive_auth_key, derive_round_keys, MASTER_KEY_LEN, NONCE_LEN, NUM_ROUND_KEYS};
use crate::sbox::{CipherTables, BLOCK_LEN};

struct Vector {
    key: [u8; MASTER_KEY_LEN],
    nonce: [u8; NONCE_LEN],
    plaintext: &'static [u8],
}

fn vectors() -> [Vector; 4] {
    let mut key_a = [0u8; MASTER_KEY_LEN];
    let mut key_b = [0u8; MASTER_KEY_LEN];
    for (i, b) in key_b.iter_mut().enumerate() {
        *b = i as u8;
    }
    let mut nonce_b = [0u8; NONCE_LEN];
    for (i, b) in nonce_b.iter_mut().enumerate() {
        *b = i as u8;
    }
    key_a.fill(0);

    [
        Vector {
            key: [0u8; MASTER_KEY_LEN],
            nonce: [0u8; NONCE_LEN],
            plaintext: &[0u8; 64],
        },
        Vector {
            key: key_b,
            nonce: nonce_b,
            plaintext: b"the quick brown fox jumps over the lazy dog",
        },
        Vector {
            key: [0xFFu8; MASTER_KEY_LEN],
            nonce: [0xAAu8; NONCE_LEN],
            plaintext: b"",
        },
        Vector {
            key: [0x42u8; MASTER_KEY_LEN],
            nonce: [0x99u8; NONCE_LEN],
            plaintext: &[0x5Au8; 200],
        },
    ]
}

/// Runs the full startup gate: table bijectivity (already enforced by
/// `CipherTables::build` returning `Err`), round-key distinctness for every
/// vector, block-transform invertibility, and encrypt/decrypt/tamper
/// round-trips through the full AEAD stack. Returns `Ok(())` only if every
/// check passes; the caller treats any `Err` as fatal and permanent.
pub fn run_self_test(tables: &CipherTables) -> Result<()> {
    for vector in vectors() {
        let round_keys = derive_round_keys(&vector.key, &vector.nonce, None)?;
        for i in 0..NUM_ROUND_KEYS {
            for j in (i + 1)..NUM_ROUND_KEYS {
                if round_keys.subkey(i) == round_keys.subkey(j) {
                    return Err(EamsaError::SelfTestFailed("round key collision in KAT vector"));
                }
            }
        }

        let mut probe = [0u8; BLOCK_LEN];
        for (i, b) in probe.iter_mut().enumerate() {
            *b = i as u8;
        }
        let ciphertext_block = encrypt_block(&probe, &round_keys, tables);
        if ciphertext_block == probe {
            return Err(EamsaError::SelfTestFailed("block transform is a fixed point on the KAT probe block"));
        }
        let recovered_block = decrypt_block(&ciphertext_block, &round_keys, tables);
        if recovered_block != probe {
            return Err(EamsaError::SelfTestFailed("block transform does not invert on the KAT probe block"));
        }

        let auth_key = derive_auth_key(&vector.key, &vector.nonce);
        let frame = seal(&vector.key, vector.nonce, &round_keys, &auth_key, tables, vector.plaintext);
        let recovered = open(&vector.key, &round_keys, &auth_key, tables, &frame).map_err(|_| {
            EamsaError::SelfTestFailed("AEAD round-trip failed to decrypt its own ciphertext")
        })?;
        if recovered != vector.plaintext {
            return Err(EamsaError::SelfTestFailed("AEAD round-trip produced the wrong plaintext"));
        }

        if !frame.ciphertext.is_empty() {
            let mut tampered = frame.clone();
            tampered.ciphertext[0] ^= 1;
            if open(&vector.key, &round_keys, &auth_key, tables, &tampered).is_ok() {
                return Err(EamsaError::SelfTestFailed("tampered ciphertext was accepted"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_test_passes_with_well_formed_tables() {
        let tables = CipherTables::build().expect("tables");
        run_self_test(&tables).expect("self-test");
    }
}
