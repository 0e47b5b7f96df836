//! Substitution and permutation tables for the block transform (§4.D).
//!
//! The design calls out that the original source only publishes a partial
//! S-box table and falsely claims the inverse S-box equals the forward one.
//! We resolve that the way the design directs: define eight complete,
//! bijective S-boxes from a named standard family and publish the inverse
//! tables alongside them, computed once at startup.
//!
//! Box 0 is the Rijndael (AES) S-box — a fully specified, widely published
//! 8-bit bijection. Boxes 1..7 are box 0 rotated left by `k` bits
//! (`rotl8(AES_SBOX[x], k)`). Composing a bijection with a bit rotation
//! (itself a bijection) keeps every box bijective, and the eight boxes are
//! pairwise distinct for k in 0..8.

pub const NUM_SBOXES: usize = 8;
pub const BLOCK_LEN: usize = 64;

#[rustfmt::skip]
const AES_SBOX: [u8; 256] = [
    0x63, 0x7c, 0x77, 0x7b, 0xf2, 0x6b, 0x6f, 0xc5, 0x30, 0x01, 0x67, 0x2b, 0xfe, 0xd7, 0xab, 0x76,
    0xca, 0x82, 0xc9, 0x7d, 0xfa, 0x59, 0x47, 0xf0, 0xad, 0xd4, 0xa2, 0xaf, 0x9c, 0xa4, 0x72, 0xc0,
    0xb7, 0xfd, 0x93, 0x26, 0x36, 0x3f, 0xf7, 0xcc, 0x34, 0xa5, 0xe5, 0xf1, 0x71, 0xd8, 0x31, 0x15,
    0x04, 0xc7, 0x23, 0xc3, 0x18, 0x96, 0x05, 0x9a, 0x07, 0x12, 0x80, 0xe2, 0xeb, 0x27, 0xb2, 0x75,
    0x09, 0x83, 0x2c, 0x1a, 0x1b, 0x6e, 0x5a, 0xa0, 0x52, 0x3b, 0xd6, 0xb3, 0x29, 0xe3, 0x2f, 0x84,
    0x53, 0xd1, 0x00, 0xed, 0x20, 0xfc, 0xb1, 0x5b, 0x6a, 0xcb, 0xbe, 0x39, 0x4a, 0x4c, 0x58, 0xcf,
    0xd0, 0xef, 0xaa, 0xfb, 0x43, 0x4d, 0x33, 0x85, 0x45, 0xf9, 0x02, 0x7f, 0x50, 0x3c, 0x9f, 0xa8,
    0x51, 0xa3, 0x40, 0x8f, 0x92, 0x9d, 0x38, 0xf5, 0xbc, 0xb6, 0xda, 0x21, 0x10, 0xff, 0xf3, 0xd2,
    0xcd, 0x0c, 0x13, 0xec, 0x5f, 0x97, 0x44, 0x17, 0xc4, 0xa7, 0x7e, 0x3d, 0x64, 0x5d, 0x19, 0x73,
    0x60, 0x81, 0x4f, 0xdc, 0x22, 0x2a, 0x90, 0x88, 0x46, 0xee, 0xb8, 0x14, 0xde, 0x5e, 0x0b, 0xdb,
    0xe0, 0x32, 0x3a, 0x0a, 0x49, 0x06, 0x24, 0x5c, 0xc2, 0xd3, 0xac, 0x62, 0x91, 0x95, 0xe4, 0x79,
    0xe7, 0xc8, 0x37, 0x6d, 0x8d, 0xd5, 0x4e, 0xa9, 0x6c, 0x56, 0xf4, 0xea, 0x65, 0x7a, 0xae, 0x08,
    0xba, 0x78, 0x25, 0x2e, 0x1c, 0xa6, 0xb4, 0xc6, 0xe8, 0xdd, 0x74, 0x1f, 0x4b, 0xbd, 0x8b, 0x8a,
    0x70, 0x3e, 0xb5, 0x66, 0x48, 0x03, 0xf6, 0x0e, 0x61, 0x35, 0x57, 0xb9, 0x86, 0xc1, 0x1d, 0x9e,
    0xe1, 0xf8, 0x98, 0x11, 0x69, 0xd9, 0x8e, 0x94, 0x9b, 0x1e, 0x87, 0xe9, 0xce, 0x55, 0x28, 0xdf,
    0x8c, 0xa1, 0x89, 0x0d, 0xbf, 0xe6, 0x42, 0x68, 0x41, 0x99, 0x2d, 0x0f, 0xb0, 0x54, 0xbb, 0x16,
];

const fn rotl8(x: u8, k: u32) -> u8 {
    x.rotate_left(k)
}

/// Immutable lookup tables built once and shared for the lifetime of the
/// process: the eight forward/inverse S-boxes and the forward/inverse byte
/// permutation used by the block transform.
#[derive(Debug)]
pub struct CipherTables {
    sbox: [[u8; 256]; NUM_SBOXES],
    inv_sbox: [[u8; 256]; NUM_SBOXES],
    perm: [usize; BLOCK_LEN],
    inv_perm: [usize; BLOCK_LEN],
}

impl CipherTables {
    /// Builds and validates the tables. Fails startup (per §4.D) rather than
    /// silently running with a non-bijective substitution layer.
    pub fn build() -> Result<Self, &'static str> {
        let mut sbox = [[0u8; 256]; NUM_SBOXES];
        for (k, box_k) in sbox.iter_mut().enumerate() {
            for x in 0..256usize {
                box_k[x] = rotl8(AES_SBOX[x], k as u32);
            }
        }

        let mut inv_sbox = [[0u8; 256]; NUM_SBOXES];
        for k in 0..NUM_SBOXES {
            if !invert_byte_permutation(&sbox[k], &mut inv_sbox[k]) {
                return Err("S-box is not bijective");
            }
        }

        let perm = build_transpose_permutation();
        let mut inv_perm = [0usize; BLOCK_LEN];
        if !invert_index_permutation(&perm, &mut inv_perm) {
            return Err("P-layer permutation is not bijective");
        }

        Ok(Self {
            sbox,
            inv_sbox,
            perm,
            inv_perm,
        })
    }

    #[inline]
    #[must_use]
    pub fn substitute(&self, j: usize, b: u8) -> u8 {
        self.sbox[j % NUM_SBOXES][b as usize]
    }

    #[inline]
    #[must_use]
    pub fn inverse_substitute(&self, j: usize, b: u8) -> u8 {
        self.inv_sbox[j % NUM_SBOXES][b as usize]
    }

    #[must_use]
    pub fn permute(&self, input: &[u8; BLOCK_LEN]) -> [u8; BLOCK_LEN] {
        let mut out = [0u8; BLOCK_LEN];
        for (j, &b) in input.iter().enumerate() {
            out[self.perm[j]] = b;
        }
        out
    }

    #[must_use]
    pub fn inverse_permute(&self, input: &[u8; BLOCK_LEN]) -> [u8; BLOCK_LEN] {
        let mut out = [0u8; BLOCK_LEN];
        for (j, &b) in input.iter().enumerate() {
            out[self.inv_perm[j]] = b;
        }
        out
    }
}

/// Resolves the design's "transpose-by-8" description (bit position
/// `i = 8r+c` maps to `8c+r`) at byte granularity: the 64-byte block is an
/// 8x8 matrix of bytes in row-major order, and the permutation transposes
/// it. Row/column indices (not individual bits) are what the formula's
/// range `8r+c` actually admits for a 64-element state — the "512-bit"
/// framing in the design's prose describes how positions are numbered
/// elsewhere, not the operative granularity of this layer.
fn build_transpose_permutation() -> [usize; BLOCK_LEN] {
    let mut perm = [0usize; BLOCK_LEN];
    for j in 0..BLOCK_LEN {
        let r = j / 8;
        let c = j % 8;
        perm[j] = 8 * c + r;
    }
    perm
}

fn invert_byte_permutation(forward: &[u8; 256], inverse: &mut [u8; 256]) -> bool {
    let mut seen = [false; 256];
    for (x, &y) in forward.iter().enumerate() {
        if seen[y as usize] {
            return false;
        }
        seen[y as usize] = true;
        inverse[y as usize] = x as u8;
    }
    true
}

fn invert_index_permutation(forward: &[usize; BLOCK_LEN], inverse: &mut [usize; BLOCK_LEN]) -> bool {
    let mut seen = [false; BLOCK_LEN];
    for (x, &y) in forward.iter().enumerate() {
        if y >= BLOCK_LEN || seen[y] {
            return false;
        }
        seen[y] = true;
        inverse[y] = x;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_sboxes_are_bijective() {
        let tables = CipherTables::build().expect("tables build");
        for k in 0..NUM_SBOXES {
            for x in 0..256usize {
                let y = tables.substitute(k, x as u8);
                assert_eq!(tables.inverse_substitute(k, y), x as u8);
            }
        }
    }

    #[test]
    fn sboxes_are_pairwise_distinct() {
        let tables = CipherTables::build().expect("tables build");
        for a in 0..NUM_SBOXES {
            for b in (a + 1)..NUM_SBOXES {
                assert_ne!(tables.sbox[a], tables.sbox[b]);
            }
        }
    }

    #[test]
    fn permutation_round_trips() {
        let tables = CipherTables::build().expect("tables build");
        let mut input = [0u8; BLOCK_LEN];
        for (i, b) in input.iter_mut().enumerate() {
            *b = i as u8;
        }
        let permuted = tables.permute(&input);
        let restored = tables.inverse_permute(&permuted);
        assert_eq!(restored, input);
        // A transpose of an 8x8 matrix is its own inverse.
        assert_eq!(tables.permute(&permuted), input);
    }
}
