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

//! CUDA compute backend (GPU family A).
//!
//! A ring of streams keeps several batches in flight; the worker waits on
//! the oldest stream and reads its output buffer back. Output layout per
//! batch: `[count, (nonce_lo, nonce_hi) x MAX_OUTPUTS_PER_BATCH]` as u32.
//!
//! The search kernel is precompiled PTX, loaded at init from the path in
//! `TOS_CUDA_PTX` (default `kernels/toshash.ptx`).

use std::collections::VecDeque;

use cust::launch;
use cust::memory::{CopyDestination, DeviceBuffer};
use cust::module::Module;
use cust::prelude::{Context, Device, Stream, StreamFlags};
use log::info;

use super::{DeviceDescriptor, DeviceError, DeviceKind, MAX_OUTPUTS_PER_BATCH};

const NUM_STREAMS: usize = 4;

/// Threads per block is 1: the kernel keeps the full 64 KiB scratchpad in
/// shared memory per thread.
const BLOCK_SIZE: u32 = 1;

const DEFAULT_GRID_SIZE: u32 = 8192;

const OUTPUT_WORDS: usize = 1 + MAX_OUTPUTS_PER_BATCH * 2;

fn ptx_path() -> String {
    std::env::var("TOS_CUDA_PTX").unwrap_or_else(|_| "kernels/toshash.ptx".to_string())
}

pub fn enum_devices() -> Vec<DeviceDescriptor> {
    let mut devices = Vec::new();

    if cust::init(cust::CudaFlags::empty()).is_err() {
        return devices;
    }
    let count = match Device::num_devices() {
        Ok(count) => count,
        Err(_) => return devices,
    };

    for i in 0..count {
        let device = match Device::get_device(i) {
            Ok(device) => device,
            Err(_) => continue,
        };

        let name = device.name().unwrap_or_else(|_| format!("CUDA {}", i));
        let total_memory = device.total_memory().unwrap_or(0) as u64;
        let sm_count = device
            .get_attribute(cust::device::DeviceAttribute::MultiprocessorCount)
            .unwrap_or(0) as u32;
        let major = device
            .get_attribute(cust::device::DeviceAttribute::ComputeCapabilityMajor)
            .unwrap_or(0);
        let minor = device
            .get_attribute(cust::device::DeviceAttribute::ComputeCapabilityMinor)
            .unwrap_or(0);

        devices.push(DeviceDescriptor {
            kind: DeviceKind::Cuda,
            index: i,
            name,
            total_memory,
            compute_units: sm_count,
            cuda_device_index: i as i32,
            cuda_compute_major: major,
            cuda_compute_minor: minor,
            ..DeviceDescriptor::default()
        });
    }

    devices
}

struct InFlight {
    slot: usize,
    start_nonce: u64,
}

pub struct CudaBackend {
    _context: Context,
    module: Module,
    streams: Vec<Stream>,
    outputs: Vec<DeviceBuffer<u32>>,
    d_header: DeviceBuffer<u8>,
    d_target: DeviceBuffer<u8>,
    grid_size: u32,
    pending: VecDeque<InFlight>,
    next_slot: usize,
    name: String,
}

impl CudaBackend {
    pub fn init(descriptor: &DeviceDescriptor) -> Result<Self, DeviceError> {
        cust::init(cust::CudaFlags::empty())
            .map_err(|e| DeviceError::Init(format!("CUDA init: {}", e)))?;

        let device = Device::get_device(descriptor.cuda_device_index as u32)
            .map_err(|e| DeviceError::Init(format!("device {}: {}", descriptor.index, e)))?;
        let context = Context::new(device)
            .map_err(|e| DeviceError::Init(format!("context: {}", e)))?;

        let ptx = std::fs::read_to_string(ptx_path())
            .map_err(|e| DeviceError::Init(format!("read '{}': {}", ptx_path(), e)))?;
        let module = Module::from_ptx(&ptx, &[])
            .map_err(|e| DeviceError::Init(format!("module load: {}", e)))?;

        let mut streams = Vec::with_capacity(NUM_STREAMS);
        let mut outputs = Vec::with_capacity(NUM_STREAMS);
        for _ in 0..NUM_STREAMS {
            streams.push(
                Stream::new(StreamFlags::NON_BLOCKING, None)
                    .map_err(|e| DeviceError::Init(format!("stream: {}", e)))?,
            );
            outputs.push(
                DeviceBuffer::zeroed(OUTPUT_WORDS)
                    .map_err(|e| DeviceError::Init(format!("output buffer: {}", e)))?,
            );
        }

        let d_header = DeviceBuffer::zeroed(112)
            .map_err(|e| DeviceError::Init(format!("header buffer: {}", e)))?;
        let d_target = DeviceBuffer::zeroed(32)
            .map_err(|e| DeviceError::Init(format!("target buffer: {}", e)))?;

        // Scale the grid with the SM count; the 64 KiB shared memory
        // requirement limits occupancy to about one block per SM
        let grid_size = if descriptor.compute_units > 0 {
            (descriptor.compute_units * 256).clamp(4096, 65536)
        } else {
            DEFAULT_GRID_SIZE
        };

        let name = descriptor.short_name();
        info!(
            "{}: initialized with {} streams (grid: {}, block: {})",
            name, NUM_STREAMS, grid_size, BLOCK_SIZE
        );

        Ok(CudaBackend {
            _context: context,
            module,
            streams,
            outputs,
            d_header,
            d_target,
            grid_size,
            pending: VecDeque::new(),
            next_slot: 0,
            name,
        })
    }

    pub fn load_work(
        &mut self,
        header: &[u8; 112],
        target: &tos_hashlib::Hash256,
    ) -> Result<(), DeviceError> {
        // Drain the ring before touching device-side constants
        while let Some(batch) = self.pending.pop_front() {
            self.streams[batch.slot]
                .synchronize()
                .map_err(|e| DeviceError::Sync(format!("drain: {}", e)))?;
        }

        self.d_header
            .copy_from(&header[..])
            .map_err(|e| DeviceError::Launch(format!("header upload: {}", e)))?;
        self.d_target
            .copy_from(&target[..])
            .map_err(|e| DeviceError::Launch(format!("target upload: {}", e)))?;
        self.next_slot = 0;
        Ok(())
    }

    pub fn start_batch(&mut self, start_nonce: u64) -> Result<(), DeviceError> {
        if self.pending.len() >= NUM_STREAMS {
            return Err(DeviceError::Launch("batch ring full".to_string()));
        }

        let slot = self.next_slot;
        let stream = &self.streams[slot];

        let zero = [0u32; 1];
        self.outputs[slot]
            .index(0..1)
            .copy_from(&zero[..])
            .map_err(|e| DeviceError::Launch(format!("output reset: {}", e)))?;

        let function = self
            .module
            .get_function("toshash_search")
            .map_err(|e| DeviceError::Launch(format!("kernel lookup: {}", e)))?;

        unsafe {
            launch!(
                function<<<self.grid_size, BLOCK_SIZE, 0, stream>>>(
                    self.d_header.as_device_ptr(),
                    self.d_target.as_device_ptr(),
                    self.outputs[slot].as_device_ptr(),
                    start_nonce
                )
            )
            .map_err(|e| DeviceError::Launch(format!("kernel launch: {}", e)))?;
        }

        self.pending.push_back(InFlight { slot, start_nonce });
        self.next_slot = (self.next_slot + 1) % NUM_STREAMS;
        Ok(())
    }

    pub fn wait_oldest(&mut self) -> Result<Vec<u64>, DeviceError> {
        let batch = self
            .pending
            .pop_front()
            .ok_or_else(|| DeviceError::Sync("no batch in flight".to_string()))?;

        self.streams[batch.slot]
            .synchronize()
            .map_err(|e| DeviceError::Sync(format!("stream sync: {}", e)))?;

        let mut host = vec![0u32; OUTPUT_WORDS];
        self.outputs[batch.slot]
            .copy_to(&mut host)
            .map_err(|e| DeviceError::Read(format!("output read: {}", e)))?;

        Ok(parse_outputs(&self.name, &host, batch.start_nonce))
    }

    pub fn batch_size(&self) -> u64 {
        (self.grid_size * BLOCK_SIZE) as u64
    }

    pub fn pipeline_depth(&self) -> usize {
        NUM_STREAMS
    }

    pub fn free(&mut self) {
        for batch in self.pending.drain(..) {
            let _ = self.streams[batch.slot].synchronize();
        }
        self.streams.clear();
        self.outputs.clear();
    }
}

/// Decode `[count, (lo, hi) x N]`; counts past the buffer are capped.
fn parse_outputs(name: &str, words: &[u32], _start_nonce: u64) -> Vec<u64> {
    let mut count = words[0] as usize;
    if count > MAX_OUTPUTS_PER_BATCH {
        log::warn!(
            "{}: device returned invalid solution count {}, capping to {}",
            name,
            count,
            MAX_OUTPUTS_PER_BATCH
        );
        count = MAX_OUTPUTS_PER_BATCH;
    }

    let mut nonces = Vec::with_capacity(count);
    for i in 0..count {
        let lo = words[1 + i * 2] as u64;
        let hi = words[1 + i * 2 + 1] as u64;
        let nonce = lo | (hi << 32);
        if nonce == 0 || nonce == u64::MAX {
            log::warn!("{}: suspicious nonce value {}, skipping", name, nonce);
            continue;
        }
        nonces.push(nonce);
    }
    nonces
}
