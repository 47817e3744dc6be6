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

use std::sync::atomic::{AtomicU64, Ordering};

/// Mining statistics snapshot (copyable).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MiningStatsSnapshot {
    pub hash_count: u64,
    pub accepted_shares: u64,
    pub rejected_shares: u64,
    pub stale_shares: u64,
}

impl MiningStatsSnapshot {
    pub fn hash_rate(&self, seconds: f64) -> f64 {
        if seconds <= 0.0 {
            return 0.0;
        }
        self.hash_count as f64 / seconds
    }
}

/// Thread-safe mining statistics.
#[derive(Debug, Default)]
pub struct MiningStats {
    hash_count: AtomicU64,
    accepted_shares: AtomicU64,
    rejected_shares: AtomicU64,
    stale_shares: AtomicU64,
}

impl MiningStats {
    pub fn new() -> Self {
        MiningStats::default()
    }

    pub fn add_hashes(&self, count: u64) {
        self.hash_count.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_accepted(&self) {
        self.accepted_shares.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected_shares.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale(&self) {
        self.stale_shares.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.hash_count.store(0, Ordering::Relaxed);
        self.accepted_shares.store(0, Ordering::Relaxed);
        self.rejected_shares.store(0, Ordering::Relaxed);
        self.stale_shares.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MiningStatsSnapshot {
        MiningStatsSnapshot {
            hash_count: self.hash_count.load(Ordering::Relaxed),
            accepted_shares: self.accepted_shares.load(Ordering::Relaxed),
            rejected_shares: self.rejected_shares.load(Ordering::Relaxed),
            stale_shares: self.stale_shares.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = MiningStats::new();
        stats.add_hashes(100);
        stats.add_hashes(28);
        stats.record_accepted();
        stats.record_accepted();
        stats.record_rejected();
        stats.record_stale();

        let snap = stats.snapshot();
        assert_eq!(snap.hash_count, 128);
        assert_eq!(snap.accepted_shares, 2);
        assert_eq!(snap.rejected_shares, 1);
        assert_eq!(snap.stale_shares, 1);
    }

    #[test]
    fn test_reset_clears_everything() {
        let stats = MiningStats::new();
        stats.add_hashes(1);
        stats.record_accepted();
        stats.reset();
        assert_eq!(stats.snapshot(), MiningStatsSnapshot::default());
    }

    #[test]
    fn test_hash_rate_guards_zero_duration() {
        let snap = MiningStatsSnapshot {
            hash_count: 1000,
            ..Default::default()
        };
        assert_eq!(snap.hash_rate(0.0), 0.0);
        assert_eq!(snap.hash_rate(2.0), 500.0);
    }
}
