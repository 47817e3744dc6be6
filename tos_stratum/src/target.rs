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

//! Pool-difficulty to 256-bit target derivation.
//!
//! The pdiff formula: `target = base_target / difficulty` where
//! `base_target = 0x00000000FFFF0000...00` (0xFFFF * 2^208). Known vectors:
//!
//! - difficulty 1   -> `00000000FFFF0000...00`
//! - difficulty 1.5 -> `00000000AAAA0000...00`
//! - difficulty 2   -> `000000007FFF8000...00`
//! - difficulty 256 -> `0000000000FFFF00...00`

use log::warn;
use tos_hashlib::{Hash256, HASH_SIZE};

/// Difficulties above this produce a near-zero target anyway; clamping keeps
/// the fixed-point arithmetic inside double precision.
pub const MAX_SAFE_DIFFICULTY: f64 = 1e15;

/// Special cases shared by both derivation paths. Returns `Some` when the
/// difficulty needs no division, otherwise the (possibly clamped)
/// difficulty to divide by.
fn special_cases(difficulty: f64) -> Result<f64, Hash256> {
    if difficulty <= 0.0 {
        // Difficulty 0 accepts anything
        return Err([0xff; HASH_SIZE]);
    }

    if difficulty < 1.0 {
        // Target would exceed the base target; pin to base to avoid
        // precision loss
        let mut target = [0u8; HASH_SIZE];
        target[4] = 0xff;
        target[5] = 0xff;
        return Err(target);
    }

    if difficulty > MAX_SAFE_DIFFICULTY {
        warn!(
            "Difficulty {} exceeds safe limit, clamping to {}",
            difficulty, MAX_SAFE_DIFFICULTY
        );
        return Ok(MAX_SAFE_DIFFICULTY);
    }

    Ok(difficulty)
}

/// The target must never collapse to identity zero.
fn ensure_nonzero(target: &mut Hash256) {
    if target.iter().all(|&b| b == 0) {
        target[HASH_SIZE - 1] = 1;
    }
}

/// Derive the pdiff target using 128-bit fixed-point long division.
///
/// The difficulty is scaled by 2^32 to preserve fractional precision; the
/// dividend is the base target scaled the same way (36 dividend bytes, with
/// output positions shifted back by 4).
pub fn difficulty_to_target(difficulty: f64) -> Hash256 {
    let difficulty = match special_cases(difficulty) {
        Ok(d) => d,
        Err(target) => return target,
    };

    let mut target = [0u8; HASH_SIZE];

    let mut diff_scaled = (difficulty * 4_294_967_296.0) as u128; // 2^32
    if diff_scaled == 0 {
        diff_scaled = 1;
    }

    let mut remainder: u128 = 0;
    for i in 0..36usize {
        // Dividend bytes: 0xFF at positions 4 and 5, zero elsewhere
        let dividend_byte: u8 = if i == 4 || i == 5 { 0xff } else { 0 };
        remainder = (remainder << 8) | dividend_byte as u128;

        let q = remainder / diff_scaled;

        // Output position is shifted by 4 due to the 2^32 scaling
        if i >= 4 {
            let pos = i - 4;
            if pos < HASH_SIZE {
                target[pos] = q.min(255) as u8;
            }
        }

        remainder %= diff_scaled;
    }

    ensure_nonzero(&mut target);
    target
}

/// Derive the pdiff target with double-precision per-byte reconstruction.
///
/// Fallback path for platforms without 128-bit integers; kept callable so
/// the two paths can be checked against each other.
pub fn difficulty_to_target_f64(difficulty: f64) -> Hash256 {
    let difficulty = match special_cases(difficulty) {
        Ok(d) => d,
        Err(target) => return target,
    };

    let mut target = [0u8; HASH_SIZE];
    let quotient = 65535.0 / difficulty;

    // byte[i] = floor(quotient * 2^(8*i - 40)) mod 256
    for (i, byte) in target.iter_mut().enumerate().skip(4) {
        let bit_shift = 8 * i as i32 - 40;
        let scaled = if bit_shift >= 0 {
            quotient * 2f64.powi(bit_shift)
        } else {
            quotient / 2f64.powi(-bit_shift)
        };

        let byte_val = scaled.floor().rem_euclid(256.0);
        *byte = byte_val.clamp(0.0, 255.0) as u8;
    }

    ensure_nonzero(&mut target);
    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use tos_hashlib::to_hex;

    fn target_hex(difficulty: f64) -> String {
        to_hex(&difficulty_to_target(difficulty))
    }

    #[test]
    fn test_difficulty_one_is_base_target() {
        assert_eq!(
            target_hex(1.0),
            "00000000ffff0000000000000000000000000000000000000000000000000000"
        );
    }

    #[test]
    fn test_difficulty_two() {
        assert_eq!(
            target_hex(2.0),
            "000000007fff8000000000000000000000000000000000000000000000000000"
        );
    }

    #[test]
    fn test_difficulty_one_point_five() {
        assert_eq!(
            target_hex(1.5),
            "00000000aaaa0000000000000000000000000000000000000000000000000000"
        );
    }

    #[test]
    fn test_difficulty_256_shifts_one_byte() {
        assert_eq!(
            target_hex(256.0),
            "0000000000ffff00000000000000000000000000000000000000000000000000"
        );
    }

    #[test]
    fn test_zero_difficulty_accepts_anything() {
        assert_eq!(difficulty_to_target(0.0), [0xff; 32]);
        assert_eq!(difficulty_to_target(-5.0), [0xff; 32]);
    }

    #[test]
    fn test_fractional_difficulty_pins_to_base() {
        assert_eq!(
            target_hex(0.5),
            "00000000ffff0000000000000000000000000000000000000000000000000000"
        );
    }

    #[test]
    fn test_huge_difficulty_clamped_and_nonzero() {
        let target = difficulty_to_target(1e30);
        assert_eq!(target, difficulty_to_target(MAX_SAFE_DIFFICULTY));
        assert!(target.iter().any(|&b| b != 0));
    }

    #[test]
    fn test_paths_agree_on_reference_vectors() {
        for d in [1.0, 2.0, 256.0, 65535.0, 65536.0, 1.5, 3.0] {
            assert_eq!(
                difficulty_to_target(d),
                difficulty_to_target_f64(d),
                "paths disagree for difficulty {}",
                d
            );
        }
    }

    #[test]
    fn test_monotone_decreasing_in_difficulty() {
        use tos_hashlib::meets_target;
        let easy = difficulty_to_target(1.0);
        let harder = difficulty_to_target(16.0);
        let hardest = difficulty_to_target(4096.0);

        assert!(meets_target(&harder, &easy));
        assert!(meets_target(&hardest, &harder));
        assert!(!meets_target(&easy, &hardest));
    }
}
