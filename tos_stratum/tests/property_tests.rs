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

//! Property-based tests for the work-package partitioning arithmetic and
//! the difficulty-to-target derivation.

use proptest::prelude::*;

use tos_hashlib::meets_target;
use tos_stratum::{
    difficulty_to_target, difficulty_to_target_f64, encode_extranonce2, WorkPackage,
};

fn work(start_nonce: u64, total_devices: u32) -> WorkPackage {
    WorkPackage {
        start_nonce,
        total_devices,
        valid: true,
        ..WorkPackage::default()
    }
}

proptest! {
    /// Device ranges never overlap for in-range start nonces
    #[test]
    fn device_ranges_disjoint(
        total in 2u32..=64,
        start_nonce in 0u64..1_000_000,
        a in 0u32..64,
        b in 0u32..64
    ) {
        let a = a % total;
        let b = b % total;
        prop_assume!(a != b);

        let w = work(start_nonce, total);
        let space = w.space_per_device();
        let (sa, sb) = (w.device_start_nonce(a), w.device_start_nonce(b));

        prop_assert!(sa.checked_add(space).map(|end| end <= sb).unwrap_or(false)
            || sb.checked_add(space).map(|end| end <= sa).unwrap_or(false));
    }

    /// The union of all ranges is contiguous from start_nonce
    #[test]
    fn device_ranges_tile_the_space(
        total in 1u32..=32,
        start_nonce in 0u64..1_000_000
    ) {
        let w = work(start_nonce, total);
        let space = w.space_per_device();

        for i in 1..total {
            prop_assert_eq!(
                w.device_start_nonce(i),
                w.device_start_nonce(i - 1).wrapping_add(space)
            );
        }
        prop_assert_eq!(w.device_start_nonce(0), start_nonce);
    }

    /// extranonce2 encoding round-trips the device offset plus local offset
    #[test]
    fn extranonce2_round_trip(
        total in 1u32..=16,
        device in 0u32..16,
        offset in 0u64..0xffff_ffff,
        size in 4u32..=8
    ) {
        let device = device % total;
        let mut w = work(0, total);
        w.extranonce2_size = size;

        let hex = w.extranonce2_hex(device, offset);
        prop_assert_eq!(hex.len(), size as usize * 2);

        let decoded = hex::decode(&hex).unwrap();
        let mut le = [0u8; 8];
        le[..decoded.len()].copy_from_slice(&decoded);
        let value = u64::from_le_bytes(le);

        let expected = w.device_offset(device).wrapping_add(offset);
        // Only the encoded width survives
        let mask = if size == 8 { u64::MAX } else { (1u64 << (size * 8)) - 1 };
        prop_assert_eq!(value, expected & mask);
    }

    /// encode_extranonce2 always emits exactly 2*size hex chars
    #[test]
    fn extranonce2_width_is_exact(value in any::<u64>(), size in 4u32..=8) {
        let hex = encode_extranonce2(value, size);
        prop_assert_eq!(hex.len(), size as usize * 2);
    }

    /// The two target derivation paths agree wherever the quotient is
    /// exactly representable in a double (powers of two, and the reference
    /// vector set covered in unit tests)
    #[test]
    fn target_paths_agree_on_powers_of_two(k in 0u32..40) {
        let d = 2f64.powi(k as i32);
        prop_assert_eq!(difficulty_to_target(d), difficulty_to_target_f64(d));
    }

    /// Higher difficulty never yields an easier target
    #[test]
    fn target_monotone_in_difficulty(d in 1u64..1_000_000) {
        let easier = difficulty_to_target(d as f64);
        let harder = difficulty_to_target((d * 2) as f64);
        prop_assert!(meets_target(&harder, &easier));
    }

    /// The derived target is never identity zero
    #[test]
    fn target_never_zero(d in prop::num::f64::POSITIVE) {
        let target = difficulty_to_target(d);
        prop_assert!(target.iter().any(|&b| b != 0));
    }
}
