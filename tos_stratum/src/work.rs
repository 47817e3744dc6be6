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

//! Work package: the immutable snapshot of one mining job, including the
//! nonce-range partitioning across devices and the extranonce2 encoding for
//! pool submission.

use std::time::Instant;

use tos_hashlib::{Hash256, HASH_SIZE, INPUT_SIZE};

/// Maximum number of devices the nonce space is partitioned over. Larger
/// farms are clamped so each device still gets a usable range.
pub const MAX_DEVICES: u32 = 256;

/// A solution produced by a device worker after host-side verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    pub nonce: u64,
    pub hash: Hash256,
    /// Which device found this solution
    pub device_index: u32,
}

impl Solution {
    pub fn new(nonce: u64, hash: Hash256, device_index: u32) -> Self {
        Solution {
            nonce,
            hash,
            device_index,
        }
    }
}

/// A mining job received from the pool.
///
/// Contains everything needed to mine: the block header prefix, the target
/// any valid hash must satisfy, and the pool's extranonce state from which
/// the base nonce is derived.
#[derive(Debug, Clone)]
pub struct WorkPackage {
    /// Opaque pool-assigned job identifier; equality detects job changes
    pub job_id: String,

    /// Block header data, last 8 bytes are the nonce slot (little-endian)
    pub header: [u8; INPUT_SIZE],

    /// Upper bound any valid hash must satisfy (byte-wise, big-endian)
    pub target: Hash256,

    /// Block height, for logging only
    pub height: u64,

    /// Base nonce derived from the pool's extranonce1
    pub start_nonce: u64,

    /// Extranonce1 as received from the pool (hex, echoed on submission)
    pub extranonce1: String,

    /// Extranonce2 width in bytes, clamped to [4, 8] by the session
    pub extranonce2_size: u32,

    /// Number of devices the nonce space is partitioned over; set by the
    /// farm before distribution
    pub total_devices: u32,

    /// False on default-constructed instances
    pub valid: bool,

    /// When this work was received, for staleness checks
    pub received_time: Instant,
}

impl Default for WorkPackage {
    fn default() -> Self {
        WorkPackage {
            job_id: String::new(),
            header: [0u8; INPUT_SIZE],
            target: [0u8; HASH_SIZE],
            height: 0,
            start_nonce: 0,
            extranonce1: String::new(),
            extranonce2_size: 4,
            total_devices: 1,
            valid: false,
            received_time: Instant::now(),
        }
    }
}

impl WorkPackage {
    /// Reset to the default (invalid) state.
    pub fn reset(&mut self) {
        *self = WorkPackage::default();
    }

    /// Age of this work package in whole seconds.
    pub fn age_secs(&self) -> u64 {
        self.received_time.elapsed().as_secs()
    }

    /// True if this work is older than `threshold_secs`.
    pub fn is_stale(&self, threshold_secs: u64) -> bool {
        self.age_secs() > threshold_secs
    }

    fn clamped_devices(&self) -> u32 {
        self.total_devices.clamp(1, MAX_DEVICES)
    }

    /// Size of each device's nonce range: `floor(2^64 / total_devices)`,
    /// with the single-device case covering the whole space.
    pub fn space_per_device(&self) -> u64 {
        let clamped = self.clamped_devices();
        if clamped <= 1 {
            u64::MAX
        } else {
            ((1u128 << 64) / clamped as u128) as u64
        }
    }

    /// Nonce-space offset of a device relative to `start_nonce`. This is
    /// also the extranonce2 base for that device.
    pub fn device_offset(&self, device_index: u32) -> u64 {
        if self.total_devices <= 1 {
            return 0;
        }
        let clamped = self.clamped_devices();
        let index = device_index.min(clamped - 1);
        self.space_per_device().wrapping_mul(index as u64)
    }

    /// Starting nonce for a specific device. The nonce space is divided
    /// evenly; each device owns `[start, start + space_per_device)`.
    pub fn device_start_nonce(&self, device_index: u32) -> u64 {
        if self.total_devices <= 1 {
            return self.start_nonce;
        }

        let space = self.space_per_device();
        let offset = self.device_offset(device_index);

        // If start_nonce + offset would wrap, pin the device to the top of
        // the space so it still owns a full-sized range
        if self.start_nonce > u64::MAX - offset {
            return u64::MAX - space + 1;
        }
        self.start_nonce + offset
    }

    /// Extranonce2 hex for a nonce found at `nonce_offset` within device
    /// `device_index`'s range: `device_offset + nonce_offset`, serialized
    /// little-endian using exactly `extranonce2_size` bytes.
    pub fn extranonce2_hex(&self, device_index: u32, nonce_offset: u64) -> String {
        let en2 = self.device_offset(device_index).wrapping_add(nonce_offset);
        encode_extranonce2(en2, self.extranonce2_size)
    }

    /// Copy header bytes in, truncating to and zero-padding up to
    /// `INPUT_SIZE`.
    pub fn set_header(&mut self, data: &[u8]) {
        let len = data.len().min(INPUT_SIZE);
        self.header[..len].copy_from_slice(&data[..len]);
        for b in self.header[len..].iter_mut() {
            *b = 0;
        }
    }

    /// Write a nonce into the header's nonce slot (last 8 bytes,
    /// little-endian).
    pub fn set_nonce(&mut self, nonce: u64) {
        self.header[INPUT_SIZE - 8..].copy_from_slice(&nonce.to_le_bytes());
    }

    /// Read the nonce currently in the header.
    pub fn nonce_from_header(&self) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.header[INPUT_SIZE - 8..]);
        u64::from_le_bytes(bytes)
    }
}

/// Serialize an extranonce2 value little-endian using exactly `size` bytes
/// (2·size hex characters, never zero-stripped).
pub fn encode_extranonce2(value: u64, size: u32) -> String {
    let bytes = value.to_le_bytes();
    hex::encode(&bytes[..(size as usize).min(8)])
}

/// Decode a pool extranonce1 hex string into the base nonce: little-endian
/// interpretation of up to the first 8 bytes.
pub fn start_nonce_from_extranonce1(extranonce1: &str) -> u64 {
    let decoded = match hex::decode(extranonce1) {
        Ok(bytes) => bytes,
        Err(_) => return 0,
    };
    let mut le = [0u8; 8];
    let len = decoded.len().min(8);
    le[..len].copy_from_slice(&decoded[..len]);
    u64::from_le_bytes(le)
}
