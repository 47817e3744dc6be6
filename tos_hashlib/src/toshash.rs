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

//! TosHash V3 core.
//!
//! A four-stage memory-hard hash over a 64 KiB scratchpad:
//!
//! 1. Blake3 seed of the 112-byte input, expanded into a 4-word state
//! 2. Sequential scratchpad fill from the rolling state
//! 3. Four full-memory passes with alternating direction and a carried word
//! 4. Eight strided mixing rounds, XOR-fold to 256 bits, Blake3 finalize
//!
//! The scratchpad is caller-owned and reused in place; a hash call performs
//! no heap allocation.

use crate::{Hash256, Scratchpad, INPUT_SIZE, SCRATCHPAD_WORDS};

/// Number of strided mixing rounds (stage 3)
pub const MIXING_ROUNDS: usize = 8;

/// Number of full-memory passes (stage 2)
pub const MEMORY_PASSES: usize = 4;

/// Multiplicative mixing constant
pub const MIX_CONST: u64 = 0x517c_c1b7_2722_0a95;

/// Strides for stage 3, indexed by `round % 4`
const STRIDES: [usize; 4] = [1, 64, 256, 1024];

#[inline]
fn mix(a: u64, b: u64, round: usize) -> u64 {
    let rot = ((round * 7) % 64) as u32;
    let x = a.wrapping_add(b);
    let y = a ^ b.rotate_left(rot);
    let z = x.wrapping_mul(MIX_CONST);
    z ^ y.rotate_right(rot / 2)
}

/// Stage 1: seed the 4-word state from a Blake3 hash of the input and fill
/// the scratchpad sequentially.
fn stage1_init(input: &[u8; INPUT_SIZE], scratch: &mut Scratchpad) {
    let seed = blake3::hash(input);
    let seed = seed.as_bytes();

    let mut state = [0u64; 4];
    for (i, word) in state.iter_mut().enumerate() {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&seed[i * 8..i * 8 + 8]);
        *word = u64::from_le_bytes(bytes);
    }

    for i in 0..SCRATCHPAD_WORDS {
        let idx = i % 4;
        state[idx] = mix(state[idx], state[(idx + 1) % 4], i);
        scratch[i] = state[idx];
    }
}

/// Stage 2: full-memory passes, alternating direction, carrying the previous
/// word of the pass as extra entropy. The first neighbor wraps modularly.
fn stage2_mix(scratch: &mut Scratchpad) {
    for pass in 0..MEMORY_PASSES {
        if pass % 2 == 0 {
            // Forward pass
            let mut carry = scratch[SCRATCHPAD_WORDS - 1];
            for i in 0..SCRATCHPAD_WORDS {
                let prev = if i > 0 {
                    scratch[i - 1]
                } else {
                    scratch[SCRATCHPAD_WORDS - 1]
                };
                scratch[i] = mix(scratch[i], prev ^ carry, pass);
                carry = scratch[i];
            }
        } else {
            // Backward pass
            let mut carry = scratch[0];
            for idx in (0..SCRATCHPAD_WORDS).rev() {
                let next = if idx < SCRATCHPAD_WORDS - 1 {
                    scratch[idx + 1]
                } else {
                    scratch[0]
                };
                scratch[idx] = mix(scratch[idx], next ^ carry, pass);
                carry = scratch[idx];
            }
        }
    }
}

/// Stage 3: strided rounds over the whole scratchpad.
fn stage3_strided(scratch: &mut Scratchpad) {
    for round in 0..MIXING_ROUNDS {
        let stride = STRIDES[round % 4];

        for i in 0..SCRATCHPAD_WORDS {
            let j = (i + stride) % SCRATCHPAD_WORDS;
            let k = (i + stride * 2) % SCRATCHPAD_WORDS;

            let b = scratch[j];
            let c = scratch[k];
            scratch[i] = mix(scratch[i], b ^ c, round);
        }
    }
}

/// Stage 4: XOR-fold the scratchpad to 256 bits and run the final Blake3.
fn stage4_finalize(scratch: &Scratchpad) -> Hash256 {
    let mut folded = [0u64; 4];
    for i in 0..SCRATCHPAD_WORDS {
        folded[i % 4] ^= scratch[i];
    }

    let mut bytes = [0u8; 32];
    for (i, word) in folded.iter().enumerate() {
        bytes[i * 8..i * 8 + 8].copy_from_slice(&word.to_le_bytes());
    }

    *blake3::hash(&bytes).as_bytes()
}

/// Compute the TosHash V3 digest of a 112-byte input.
///
/// The scratchpad is reused in place; contents on entry are irrelevant.
pub fn hash(input: &[u8; INPUT_SIZE], scratch: &mut Scratchpad) -> Hash256 {
    stage1_init(input, scratch);
    stage2_mix(scratch);
    stage3_strided(scratch);
    stage4_finalize(scratch)
}

/// Compute the digest of a header with `nonce` written little-endian into
/// the nonce slot (bytes 104..112). The caller's header is not modified.
pub fn hash_with_nonce(header: &[u8; INPUT_SIZE], nonce: u64, scratch: &mut Scratchpad) -> Hash256 {
    let mut input = *header;
    input[INPUT_SIZE - 8..].copy_from_slice(&nonce.to_le_bytes());
    hash(&input, scratch)
}

/// Measure hash throughput over `iterations` calls, in hashes per second.
pub fn benchmark(iterations: u64) -> f64 {
    let mut scratch = Scratchpad::new();
    let mut input = [0u8; INPUT_SIZE];

    let start = std::time::Instant::now();
    for i in 0..iterations {
        input[0] = (i & 0xff) as u8;
        input[1] = ((i >> 8) & 0xff) as u8;
        let _ = hash(&input, &mut scratch);
    }
    let seconds = start.elapsed().as_secs_f64();

    if seconds > 0.0 {
        iterations as f64 / seconds
    } else {
        0.0
    }
}
