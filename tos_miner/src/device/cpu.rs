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

//! CPU compute backend.
//!
//! One backend instance drives one worker thread. Batches are evaluated
//! synchronously when the worker waits on them, so the uniform batch-ring
//! protocol holds without device-side queues.

use std::collections::VecDeque;

use tos_hashlib::{meets_target, toshash, Hash256, Scratchpad, INPUT_SIZE};

use super::{DeviceDescriptor, DeviceError, DeviceKind};

/// Nonces scanned per batch. Small enough that new-work drains stay quick
/// on a memory-hard hash.
pub const CPU_BATCH_SIZE: u64 = 256;

const PIPELINE_DEPTH: usize = 2;

/// One descriptor per hardware thread; `thread_count` 0 means auto-detect.
pub fn enum_devices(thread_count: usize) -> Vec<DeviceDescriptor> {
    let threads = if thread_count > 0 {
        thread_count
    } else {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    };

    (0..threads)
        .map(|i| DeviceDescriptor {
            kind: DeviceKind::Cpu,
            index: i as u32,
            name: format!("CPU Thread {}", i),
            compute_units: 1,
            ..DeviceDescriptor::default()
        })
        .collect()
}

pub struct CpuBackend {
    header: [u8; INPUT_SIZE],
    target: Hash256,
    scratch: Scratchpad,
    pending: VecDeque<u64>,
    has_work: bool,
}

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend {
            header: [0u8; INPUT_SIZE],
            target: [0u8; 32],
            scratch: Scratchpad::new(),
            pending: VecDeque::new(),
            has_work: false,
        }
    }

    pub fn load_work(&mut self, header: &[u8; INPUT_SIZE], target: &Hash256) -> Result<(), DeviceError> {
        self.header = *header;
        self.target = *target;
        self.pending.clear();
        self.has_work = true;
        Ok(())
    }

    pub fn start_batch(&mut self, start_nonce: u64) -> Result<(), DeviceError> {
        if !self.has_work {
            return Err(DeviceError::Launch("no work loaded".to_string()));
        }
        if self.pending.len() >= PIPELINE_DEPTH {
            return Err(DeviceError::Launch("batch ring full".to_string()));
        }
        self.pending.push_back(start_nonce);
        Ok(())
    }

    pub fn wait_oldest(&mut self) -> Result<Vec<u64>, DeviceError> {
        let start = self
            .pending
            .pop_front()
            .ok_or_else(|| DeviceError::Sync("no batch in flight".to_string()))?;

        let mut candidates = Vec::new();
        for offset in 0..CPU_BATCH_SIZE {
            let nonce = start.wrapping_add(offset);
            let hash = toshash::hash_with_nonce(&self.header, nonce, &mut self.scratch);
            if meets_target(&hash, &self.target) {
                candidates.push(nonce);
            }
        }
        Ok(candidates)
    }

    pub fn batch_size(&self) -> u64 {
        CPU_BATCH_SIZE
    }

    pub fn pipeline_depth(&self) -> usize {
        PIPELINE_DEPTH
    }

    pub fn free(&mut self) {
        self.pending.clear();
        self.has_work = false;
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_devices_auto_and_fixed() {
        let auto = enum_devices(0);
        assert!(!auto.is_empty());

        let fixed = enum_devices(3);
        assert_eq!(fixed.len(), 3);
        assert_eq!(fixed[2].name, "CPU Thread 2");
    }

    #[test]
    fn test_batch_requires_work() {
        let mut backend = CpuBackend::new();
        assert!(matches!(
            backend.start_batch(0),
            Err(DeviceError::Launch(_))
        ));
        assert!(matches!(backend.wait_oldest(), Err(DeviceError::Sync(_))));
    }

    #[test]
    fn test_easy_target_finds_every_nonce() {
        let mut backend = CpuBackend::new();
        backend.load_work(&[0u8; INPUT_SIZE], &[0xff; 32]).unwrap();
        backend.start_batch(1000).unwrap();

        let candidates = backend.wait_oldest().unwrap();
        assert_eq!(candidates.len(), CPU_BATCH_SIZE as usize);
        assert_eq!(candidates[0], 1000);
        assert_eq!(*candidates.last().unwrap(), 1000 + CPU_BATCH_SIZE - 1);
    }

    #[test]
    fn test_impossible_target_finds_nothing() {
        let mut backend = CpuBackend::new();
        backend.load_work(&[0u8; INPUT_SIZE], &[0x00; 32]).unwrap();
        backend.start_batch(0).unwrap();

        // All-zero target: astronomically unlikely any hash meets it
        let candidates = backend.wait_oldest().unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_ring_depth_enforced() {
        let mut backend = CpuBackend::new();
        backend.load_work(&[0u8; INPUT_SIZE], &[0xff; 32]).unwrap();
        backend.start_batch(0).unwrap();
        backend.start_batch(CPU_BATCH_SIZE).unwrap();
        assert!(backend.start_batch(CPU_BATCH_SIZE * 2).is_err());

        // Draining one frees a slot
        backend.wait_oldest().unwrap();
        assert!(backend.start_batch(CPU_BATCH_SIZE * 2).is_ok());
    }

    #[test]
    fn test_load_work_drops_in_flight_batches() {
        let mut backend = CpuBackend::new();
        backend.load_work(&[0u8; INPUT_SIZE], &[0xff; 32]).unwrap();
        backend.start_batch(0).unwrap();
        backend.load_work(&[1u8; INPUT_SIZE], &[0xff; 32]).unwrap();
        assert!(matches!(backend.wait_oldest(), Err(DeviceError::Sync(_))));
    }
}
