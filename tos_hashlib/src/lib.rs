// Copyright (c) 2025 TOS Miner Developers
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

#![crate_name = "tos_hashlib"]

//! # TOS Hashlib - TosHash V3 core for mining and verification
//!
//! This library provides the TosHash V3 memory-hard hash function used by the
//! TOS miner for CPU mining and for host-side verification of GPU-reported
//! candidate nonces, together with the big-endian target comparison that
//! decides whether a hash constitutes a share.
//!
//! ## Main entry points
//!
//! - [`toshash::hash`] - digest a 112-byte block header
//! - [`toshash::hash_with_nonce`] - digest a header with a nonce substituted
//!   into the nonce slot (the verification primitive)
//! - [`meets_target`] - byte-wise big-endian hash/target comparison
//! - [`Scratchpad`] - the caller-owned 64 KiB working memory, allocated once
//!   per thread and reused for every hash
//!
//! ## Example
//!
//! ```rust
//! use tos_hashlib::{meets_target, toshash, Scratchpad, INPUT_SIZE};
//!
//! let header = [0u8; INPUT_SIZE];
//! let mut scratch = Scratchpad::new();
//!
//! let digest = toshash::hash_with_nonce(&header, 42, &mut scratch);
//! assert!(meets_target(&digest, &[0xff; 32]));
//! ```

use std::ops::{Deref, DerefMut};

pub mod error;
pub mod toshash;

pub use error::{Result, TosHashError};

/// Block header size in bytes (104 byte prefix + 8 byte nonce slot)
pub const INPUT_SIZE: usize = 112;

/// Output hash size in bytes
pub const HASH_SIZE: usize = 32;

/// Scratchpad size in 64-bit words (64 KiB)
pub const SCRATCHPAD_WORDS: usize = 8192;

/// 32-byte hash, compared big-endian (byte 0 is most significant)
pub type Hash256 = [u8; HASH_SIZE];

/// The 64 KiB working memory for one hashing thread.
///
/// Heap-allocated once, then reused in place by every hash call. Each
/// verification thread owns exactly one.
pub struct Scratchpad(Box<[u64; SCRATCHPAD_WORDS]>);

impl Scratchpad {
    pub fn new() -> Self {
        let words = vec![0u64; SCRATCHPAD_WORDS].into_boxed_slice();
        // Length is SCRATCHPAD_WORDS by construction
        let array: Box<[u64; SCRATCHPAD_WORDS]> = words.try_into().unwrap();
        Scratchpad(array)
    }
}

impl Default for Scratchpad {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for Scratchpad {
    type Target = [u64; SCRATCHPAD_WORDS];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Scratchpad {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Compare a hash against a target: `hash <= target` byte-wise, big-endian.
///
/// Equality meets the target.
pub fn meets_target(hash: &Hash256, target: &Hash256) -> bool {
    for i in 0..HASH_SIZE {
        if hash[i] < target[i] {
            return true;
        }
        if hash[i] > target[i] {
            return false;
        }
    }
    true
}

/// Render a hash as a lowercase hex string.
pub fn to_hex(hash: &Hash256) -> String {
    hex::encode(hash)
}

/// Parse a 64-character hex string into a hash.
///
/// # Errors
///
/// Returns `TosHashError::InvalidInput` on wrong length and
/// `TosHashError::HexDecodeError` on non-hex characters.
pub fn hash_from_hex(s: &str) -> Result<Hash256> {
    if s.len() != HASH_SIZE * 2 {
        return Err(TosHashError::InvalidInput(format!(
            "Expected {} hex characters, got {}",
            HASH_SIZE * 2,
            s.len()
        )));
    }
    let mut out = [0u8; HASH_SIZE];
    hex::decode_to_slice(s, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meets_target_less() {
        let mut hash = [0u8; 32];
        let mut target = [0u8; 32];
        hash[0] = 1;
        target[0] = 2;
        assert!(meets_target(&hash, &target));
        assert!(!meets_target(&target, &hash));
    }

    #[test]
    fn test_meets_target_equal() {
        let hash = [0xabu8; 32];
        assert!(meets_target(&hash, &hash));
    }

    #[test]
    fn test_meets_target_decides_on_first_differing_byte() {
        let mut hash = [0u8; 32];
        let mut target = [0u8; 32];
        // Equal prefix, hash smaller at byte 15, larger afterwards
        hash[15] = 1;
        target[15] = 2;
        hash[16] = 0xff;
        assert!(meets_target(&hash, &target));
    }

    #[test]
    fn test_hex_round_trip() {
        let mut hash = [0u8; 32];
        for (i, b) in hash.iter_mut().enumerate() {
            *b = i as u8;
        }
        let s = to_hex(&hash);
        assert_eq!(s.len(), 64);
        assert_eq!(hash_from_hex(&s).unwrap(), hash);
    }

    #[test]
    fn test_hash_from_hex_rejects_bad_length() {
        assert!(matches!(
            hash_from_hex("abcd"),
            Err(TosHashError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_hash_from_hex_rejects_bad_chars() {
        let s = "zz".repeat(32);
        assert!(matches!(
            hash_from_hex(&s),
            Err(TosHashError::HexDecodeError(_))
        ));
    }

    #[test]
    fn test_scratchpad_is_zeroed_and_writable() {
        let mut scratch = Scratchpad::new();
        assert!(scratch.iter().all(|&w| w == 0));
        scratch[0] = 42;
        scratch[SCRATCHPAD_WORDS - 1] = 7;
        assert_eq!(scratch[0], 42);
        assert_eq!(scratch[SCRATCHPAD_WORDS - 1], 7);
    }
}
