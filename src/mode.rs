//! CBC mode with PKCS#7 padding over the 64-byte block transform (§4.E).

use crate::block::{decrypt_block, encrypt_block};
use crate::error::{EamsaError, Result};
use crate::hash::sha3_512_concat;
use crate::kdf::{RoundKeySchedule, MASTER_KEY_LEN, NONCE_LEN};
use crate::sbox::{CipherTables, BLOCK_LEN};

/// `IV = SHA3-512(nonce || master_key)`. The IV is never transmitted; both
/// sides re-derive it from the nonce carried in the frame and the key.
#[must_use]
pub fn derive_iv(nonce: &[u8; NONCE_LEN], master_key: &[u8; MASTER_KEY_LEN]) -> [u8; BLOCK_LEN] {
    sha3_512_concat(&[nonce.as_slice(), master_key.as_slice()])
}

/// PKCS#7 padding to a 64-byte boundary. Always adds at least one byte, so
/// an empty plaintext still produces one block of pure padding.
#[must_use]
pub fn pad(plaintext: &[u8]) -> Vec<u8> {
    let pad_len = BLOCK_LEN - (plaintext.len() % BLOCK_LEN);
    let mut out = Vec::with_capacity(plaintext.len() + pad_len);
    out.extend_from_slice(plaintext);
    out.resize(out.len() + pad_len, pad_len as u8);
    out
}

/// Validates and strips PKCS#7 padding. Runs the full check over every
/// candidate byte rather than short-circuiting, so a caller cannot learn
/// from timing where the padding diverged — failures here and HMAC
/// failures in the AEAD layer above both surface as `AuthFailure`.
pub fn unpad(data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() || data.len() % BLOCK_LEN != 0 {
        return Err(EamsaError::AuthFailure);
    }

    let pad_len = data[data.len() - 1] as usize;
    let mut ok = (1..=BLOCK_LEN).contains(&pad_len) as u8;
    if pad_len > data.len() {
        return Err(EamsaError::AuthFailure);
    }

    let start = data.len() - pad_len;
    for &b in &data[start..] {
        ok &= u8::from(b == pad_len as u8);
    }

    if ok == 0 {
        return Err(EamsaError::AuthFailure);
    }

    Ok(data[..start].to_vec())
}

/// Encrypts `plaintext` under CBC chaining, returning ciphertext whose
/// length is always a positive multiple of 64.
#[must_use]
pub fn cbc_encrypt(
    plaintext: &[u8],
    keys: &RoundKeySchedule,
    tables: &CipherTables,
    iv: &[u8; BLOCK_LEN],
) -> Vec<u8> {
    let padded = pad(plaintext);
    let mut out = Vec::with_capacity(padded.len());
    let mut prev = *iv;

    for chunk in padded.chunks_exact(BLOCK_LEN) {
        let mut block = [0u8; BLOCK_LEN];
        block.copy_from_slice(chunk);
        for j in 0..BLOCK_LEN {
            block[j] ^= prev[j];
        }
        let ciphertext_block = encrypt_block(&block, keys, tables);
        out.extend_from_slice(&ciphertext_block);
        prev = ciphertext_block;
    }

    out
}

/// Decrypts CBC ciphertext and strips padding. `ciphertext` must already be
/// a positive multiple of 64 bytes (checked by the AEAD framing layer
/// before this is called).
pub fn cbc_decrypt(
    ciphertext: &[u8],
    keys: &RoundKeySchedule,
    tables: &CipherTables,
    iv: &[u8; BLOCK_LEN],
) -> Result<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
        return Err(EamsaError::AuthFailure);
    }

    let mut padded = Vec::with_capacity(ciphertext.len());
    let mut prev = *iv;

    for chunk in ciphertext.chunks_exact(BLOCK_LEN) {
        let mut cblock = [0u8; BLOCK_LEN];
        cblock.copy_from_slice(chunk);
        let mut pblock = decrypt_block(&cblock, keys, tables);
        for j in 0..BLOCK_LEN {
            pblock[j] ^= prev[j];
        }
        padded.extend_from_slice(&pblock);
        prev = cblock;
    }

    unpad(&padded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::derive_round_keys;

    fn setup(byte: u8) -> (RoundKeySchedule, CipherTables, [u8; BLOCK_LEN]) {
        let key = [byte; MASTER_KEY_LEN];
        let nonce = [byte; NONCE_LEN];
        let keys = derive_round_keys(&key, &nonce, None).expect("derive");
        let tables = CipherTables::build().expect("tables");
        let iv = derive_iv(&nonce, &key);
        (keys, tables, iv)
    }

    #[test]
    fn pad_length_is_in_range_and_always_present() {
        for len in [0usize, 1, 63, 64, 65, 127, 128] {
            let data = vec![0xAB; len];
            let padded = pad(&data);
            assert_eq!(padded.len() % BLOCK_LEN, 0);
            assert!(padded.len() > data.len(), "padding must always be applied");
            let p = *padded.last().unwrap() as usize;
            assert!((1..=BLOCK_LEN).contains(&p));
        }
    }

    #[test]
    fn pad_then_unpad_round_trips() {
        for len in [0usize, 1, 40, 63, 64, 65, 200] {
            let data = vec![0x5A; len];
            let padded = pad(&data);
            let unpadded = unpad(&padded).expect("unpad");
            assert_eq!(unpadded, data);
        }
    }

    #[test]
    fn exact_block_multiple_gets_full_padding_block() {
        let data = vec![0u8; 64];
        let padded = pad(&data);
        assert_eq!(padded.len(), 128);
        assert!(padded[64..].iter().all(|&b| b == 64));
    }

    #[test]
    fn empty_plaintext_produces_one_block() {
        let padded = pad(&[]);
        assert_eq!(padded.len(), BLOCK_LEN);
        let unpadded = unpad(&padded).expect("unpad");
        assert!(unpadded.is_empty());
    }

    #[test]
    fn unpad_rejects_bad_padding_bytes() {
        let mut padded = pad(b"hello world, this is a test message");
        let last = padded.len() - 1;
        padded[last - 1] ^= 0xFF;
        assert!(unpad(&padded).is_err());
    }

    #[test]
    fn cbc_round_trips_for_various_lengths() {
        let (keys, tables, iv) = setup(0x77);
        for len in [0usize, 1, 40, 64, 100, 300] {
            let plaintext = (0..len).map(|i| i as u8).collect::<Vec<_>>();
            let ciphertext = cbc_encrypt(&plaintext, &keys, &tables, &iv);
            assert_eq!(ciphertext.len() % BLOCK_LEN, 0);
            let recovered = cbc_decrypt(&ciphertext, &keys, &tables, &iv).expect("decrypt");
            assert_eq!(recovered, plaintext);
        }
    }

    #[test]
    fn different_iv_changes_ciphertext() {
        let (keys, tables, iv1) = setup(0x01);
        let mut iv2 = iv1;
        iv2[0] ^= 1;
        let plaintext = b"same plaintext, different iv";
        let c1 = cbc_encrypt(plaintext, &keys, &tables, &iv1);
        let c2 = cbc_encrypt(plaintext, &keys, &tables, &iv2);
        assert_ne!(c1, c2);
    }
}
