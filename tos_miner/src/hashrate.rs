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

//! Time-weighted hash-rate estimation.
//!
//! EMA with variable sample intervals: `alpha = 1 - exp(-dt / period)`.
//! Samples closer together than 100 ms are dropped as noise.

use std::time::{Duration, Instant};

/// Minimum interval between accepted samples.
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// A combined hash-rate snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HashRate {
    /// Instantaneous rate over the whole run (count / duration), noisy
    pub rate: f64,
    /// Smoothed EMA rate, stable
    pub ema: f64,
    /// Total hashes computed
    pub count: u64,
    /// Seconds since the worker started
    pub duration: f64,
}

impl HashRate {
    pub fn new(rate: f64, ema: f64, count: u64, duration: f64) -> Self {
        HashRate {
            rate,
            ema,
            count,
            duration,
        }
    }
}

/// EMA hash-rate calculator over a running total counter.
#[derive(Debug)]
pub struct HashRateCalculator {
    ema_period_secs: f64,
    last_count: u64,
    current_rate: f64,
    ema_rate: f64,
    initialized: bool,
    last_update: Instant,
}

impl HashRateCalculator {
    pub fn new(ema_period_secs: f64) -> Self {
        HashRateCalculator {
            ema_period_secs,
            last_count: 0,
            current_rate: 0.0,
            ema_rate: 0.0,
            initialized: false,
            last_update: Instant::now(),
        }
    }

    /// Feed the current running total of hashes computed since start.
    pub fn update(&mut self, total_count: u64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update);

        if elapsed < MIN_SAMPLE_INTERVAL {
            return;
        }

        let elapsed_secs = elapsed.as_secs_f64();
        let delta = total_count.saturating_sub(self.last_count);
        self.current_rate = delta as f64 / elapsed_secs;

        if !self.initialized {
            self.ema_rate = self.current_rate;
            self.initialized = true;
        } else {
            let alpha = 1.0 - (-elapsed_secs / self.ema_period_secs).exp();
            self.ema_rate = alpha * self.current_rate + (1.0 - alpha) * self.ema_rate;
        }

        self.last_count = total_count;
        self.last_update = now;
    }

    pub fn instant_rate(&self) -> f64 {
        self.current_rate
    }

    pub fn ema_rate(&self) -> f64 {
        self.ema_rate
    }

    /// EMA once initialized, instantaneous before that.
    pub fn effective_rate(&self) -> f64 {
        if self.initialized {
            self.ema_rate
        } else {
            self.current_rate
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn reset(&mut self) {
        self.reset_with(0);
    }

    /// Reset while keeping a starting count, for continuing after a pause.
    pub fn reset_with(&mut self, initial_count: u64) {
        self.last_count = initial_count;
        self.current_rate = 0.0;
        self.ema_rate = 0.0;
        self.initialized = false;
        self.last_update = Instant::now();
    }

    pub fn set_period(&mut self, seconds: f64) {
        self.ema_period_secs = seconds;
    }
}

impl Default for HashRateCalculator {
    fn default() -> Self {
        Self::new(30.0)
    }
}
