//! The 64-byte block transform (§4.D): 16 SPN rounds plus final whitening.

use crate::kdf::RoundKeySchedule;
use crate::sbox::{CipherTables, BLOCK_LEN};

pub const ROUNDS: usize = 16;

#[inline]
fn round_constant(round: usize) -> u8 {
    0x55 ^ ((round & 0xFF) as u8)
}

#[inline]
fn expand_subkey(subkey: &[u8; 16], out: &mut [u8; BLOCK_LEN]) {
    for (j, b) in out.iter_mut().enumerate() {
        *b = subkey[j % 16];
    }
}

/// Forward transform: substitute, permute, mix in the round key, mix in the
/// round constant, 16 times, then whiten with subkey 10 expanded to the
/// full block width.
#[must_use]
pub fn encrypt_block(input: &[u8; BLOCK_LEN], keys: &RoundKeySchedule, tables: &CipherTables) -> [u8; BLOCK_LEN] {
    let mut state = *input;
    let mut expanded = [0u8; BLOCK_LEN];

    for round in 0..ROUNDS {
        for (j, b) in state.iter_mut().enumerate() {
            *b = tables.substitute(j, *b);
        }

        state = tables.permute(&state);

        expand_subkey(keys.subkey(round), &mut expanded);
        for j in 0..BLOCK_LEN {
            state[j] ^= expanded[j];
        }

        let rc = round_constant(round);
        for b in &mut state {
            *b ^= rc;
        }
    }

    expand_subkey(keys.subkey(10), &mut expanded);
    for j in 0..BLOCK_LEN {
        state[j] ^= expanded[j];
    }

    state
}

/// Inverse transform: undo whitening, then for each round from 15 down to
/// 0, undo the round constant, the round-key mix, the permutation, and the
/// substitution, in that order.
#[must_use]
pub fn decrypt_block(input: &[u8; BLOCK_LEN], keys: &RoundKeySchedule, tables: &CipherTables) -> [u8; BLOCK_LEN] {
    let mut state = *input;
    let mut expanded = [0u8; BLOCK_LEN];

    expand_subkey(keys.subkey(10), &mut expanded);
    for j in 0..BLOCK_LEN {
        state[j] ^= expanded[j];
    }

    for round in (0..ROUNDS).rev() {
        let rc = round_constant(round);
        for b in &mut state {
            *b ^= rc;
        }

        expand_subkey(keys.subkey(round), &mut expanded);
        for j in 0..BLOCK_LEN {
            state[j] ^= expanded[j];
        }

        state = tables.inverse_permute(&state);

        for (j, b) in state.iter_mut().enumerate() {
            *b = tables.inverse_substitute(j, *b);
        }
    }

    state
}
