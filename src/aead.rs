//! Encrypt-then-MAC framing over the CBC core (§4.F, §6): `ciphertext || nonce || tag`.

use crate::error::{EamsaError, Result};
use crate::hash::{constant_time_eq, hmac_sha3_512, HASH_LEN};
use crate::kdf::{RoundKeySchedule, AUTH_KEY_LEN, MASTER_KEY_LEN, NONCE_LEN};
use crate::mode::{cbc_decrypt, cbc_encrypt, derive_iv};
use crate::sbox::{CipherTables, BLOCK_LEN};

pub const TAG_LEN: usize = HASH_LEN;
pub const MIN_FRAME_LEN: usize = BLOCK_LEN + NONCE_LEN + TAG_LEN;

/// A parsed, length-validated `ciphertext || nonce || tag` frame.
#[derive(Clone)]
pub struct Frame {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    pub tag: [u8; TAG_LEN],
}

impl Frame {
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.ciphertext.len() + NONCE_LEN + TAG_LEN);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.tag);
        out
    }

    /// Validates overall length (`>= 80`) and that the ciphertext region is
    /// a positive multiple of 64 bytes before splitting it out (§4.F step 1-2).
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_FRAME_LEN {
            return Err(EamsaError::InvalidFrame {
                reason: "frame shorter than the minimum 80 bytes",
            });
        }
        let ciphertext_len = data.len() - NONCE_LEN - TAG_LEN;
        if ciphertext_len % BLOCK_LEN != 0 {
            return Err(EamsaError::InvalidFrame {
                reason: "ciphertext region is not a multiple of the 64-byte block size",
            });
        }

        let ciphertext = data[..ciphertext_len].to_vec();
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&data[ciphertext_len..ciphertext_len + NONCE_LEN]);
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&data[ciphertext_len + NONCE_LEN..]);

        Ok(Self { ciphertext, nonce, tag })
    }
}

/// Encrypts `plaintext` under `master_key`/`nonce` and authenticates the
/// result, returning the assembled frame.
#[must_use]
pub fn seal(
    master_key: &[u8; MASTER_KEY_LEN],
    nonce: [u8; NONCE_LEN],
    round_keys: &RoundKeySchedule,
    auth_key: &[u8; AUTH_KEY_LEN],
    tables: &CipherTables,
    plaintext: &[u8],
) -> Frame {
    let iv = derive_iv(&nonce, master_key);
    let ciphertext = cbc_encrypt(plaintext, round_keys, tables, &iv);

    let mut mac_input = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    mac_input.extend_from_slice(&nonce);
    mac_input.extend_from_slice(&ciphertext);
    let tag = hmac_sha3_512(auth_key, &mac_input);

    Frame { ciphertext, nonce, tag }
}

/// Verifies the frame's tag in constant time and, only on a match, decrypts
/// and strips padding. Never touches the plaintext buffer before the tag
/// has been accepted.
pub fn open(
    master_key: &[u8; MASTER_KEY_LEN],
    round_keys: &RoundKeySchedule,
    auth_key: &[u8; AUTH_KEY_LEN],
    tables: &CipherTables,
    frame: &Frame,
) -> Result<Vec<u8>> {
    let mut mac_input = Vec::with_capacity(NONCE_LEN + frame.ciphertext.len());
    mac_input.extend_from_slice(&frame.nonce);
    mac_input.extend_from_slice(&frame.ciphertext);
    let expected_tag = hmac_sha3_512(auth_key, &mac_input);

    if !constant_time_eq(&expected_tag, &frame.tag) {
        return Err(EamsaError::AuthFailure);
    }

    let iv = derive_iv(&frame.nonce, master_key);
    cbc_decrypt(&frame.ciphertext, round_keys, tables, &iv)
}
