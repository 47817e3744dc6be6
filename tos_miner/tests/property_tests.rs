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

//! Property-based tests for health classification and statistics.

use proptest::prelude::*;

use tos_miner::stats::MiningStats;
use tos_miner::worker::{classify_health, HealthStatus, MIN_SOLUTIONS_FOR_HEALTH};

fn severity(status: HealthStatus) -> u8 {
    match status {
        HealthStatus::Healthy => 0,
        HealthStatus::Degraded => 1,
        HealthStatus::Unhealthy => 2,
        HealthStatus::Failed => 3,
    }
}

proptest! {
    /// Below the judgment threshold the classification is always Healthy
    #[test]
    fn health_suppressed_below_threshold(
        valid in 0u64..MIN_SOLUTIONS_FOR_HEALTH,
        invalid in 0u64..MIN_SOLUTIONS_FOR_HEALTH,
        hw in 0u64..1000
    ) {
        prop_assume!(valid + invalid < MIN_SOLUTIONS_FOR_HEALTH);
        prop_assert_eq!(classify_health(valid, invalid, hw), HealthStatus::Healthy);
    }

    /// More hardware errors never improve the classification
    #[test]
    fn health_monotone_in_hardware_errors(
        valid in 0u64..1000,
        invalid in 0u64..1000,
        hw in 0u64..100
    ) {
        let before = classify_health(valid, invalid, hw);
        let after = classify_health(valid, invalid, hw + 1);
        prop_assert!(severity(after) >= severity(before));
    }

    /// More invalid solutions never improve the classification
    #[test]
    fn health_monotone_in_invalid_solutions(
        valid in 0u64..1000,
        invalid in MIN_SOLUTIONS_FOR_HEALTH..1000,
        hw in 0u64..100
    ) {
        let before = classify_health(valid, invalid, hw);
        let after = classify_health(valid, invalid + 1, hw);
        prop_assert!(severity(after) >= severity(before));
    }

    /// A clean device is always healthy once judged
    #[test]
    fn health_clean_device_is_healthy(valid in MIN_SOLUTIONS_FOR_HEALTH..100_000) {
        prop_assert_eq!(classify_health(valid, 0, 0), HealthStatus::Healthy);
    }

    /// Snapshots reflect exactly the recorded counts
    #[test]
    fn stats_snapshot_matches_recording(
        hashes in prop::collection::vec(1u64..10_000, 0..8),
        accepted in 0usize..20,
        rejected in 0usize..20,
        stale in 0usize..20
    ) {
        let stats = MiningStats::new();
        for h in &hashes {
            stats.add_hashes(*h);
        }
        for _ in 0..accepted {
            stats.record_accepted();
        }
        for _ in 0..rejected {
            stats.record_rejected();
        }
        for _ in 0..stale {
            stats.record_stale();
        }

        let snap = stats.snapshot();
        prop_assert_eq!(snap.hash_count, hashes.iter().sum::<u64>());
        prop_assert_eq!(snap.accepted_shares, accepted as u64);
        prop_assert_eq!(snap.rejected_shares, rejected as u64);
        prop_assert_eq!(snap.stale_shares, stale as u64);
    }
}
