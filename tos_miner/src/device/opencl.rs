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

//! OpenCL compute backend (GPU family B).
//!
//! Double-buffered pipeline: while the worker drains the oldest batch's
//! event, the other buffer's batch keeps executing. Output layout matches
//! the CUDA backend: `[count, (nonce_lo, nonce_hi) x MAX_OUTPUTS_PER_BATCH]`.
//!
//! Kernel source is loaded at init from the path in `TOS_OPENCL_KERNEL`
//! (default `kernels/toshash.cl`) and built per device.

use std::collections::VecDeque;

use log::info;
use ocl::{Buffer, Device, Event, Kernel, Platform, ProQue};

use super::{DeviceDescriptor, DeviceError, DeviceKind, MAX_OUTPUTS_PER_BATCH};

const BUFFER_COUNT: usize = 2;

const DEFAULT_GLOBAL_WORK_SIZE: usize = 16384;

const OUTPUT_WORDS: usize = 1 + MAX_OUTPUTS_PER_BATCH * 2;

fn kernel_path() -> String {
    std::env::var("TOS_OPENCL_KERNEL").unwrap_or_else(|_| "kernels/toshash.cl".to_string())
}

pub fn enum_devices() -> Vec<DeviceDescriptor> {
    let mut devices = Vec::new();

    for (platform_index, platform) in Platform::list().into_iter().enumerate() {
        let platform_name = platform.name().unwrap_or_default();
        let list = match Device::list_all(platform) {
            Ok(list) => list,
            Err(_) => continue,
        };

        for (device_index, device) in list.into_iter().enumerate() {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("OpenCL {}:{}", platform_index, device_index));
            let compute_units = device
                .info(ocl::enums::DeviceInfo::MaxComputeUnits)
                .ok()
                .and_then(|v| match v {
                    ocl::enums::DeviceInfoResult::MaxComputeUnits(n) => Some(n),
                    _ => None,
                })
                .unwrap_or(0);
            let total_memory = device
                .info(ocl::enums::DeviceInfo::GlobalMemSize)
                .ok()
                .and_then(|v| match v {
                    ocl::enums::DeviceInfoResult::GlobalMemSize(n) => Some(n),
                    _ => None,
                })
                .unwrap_or(0);

            devices.push(DeviceDescriptor {
                kind: DeviceKind::OpenCl,
                index: devices.len() as u32,
                name,
                total_memory,
                compute_units,
                cl_platform_name: platform_name.clone(),
                cl_platform_index: platform_index as u32,
                cl_device_index: device_index as u32,
                ..DeviceDescriptor::default()
            });
        }
    }

    devices
}

struct InFlight {
    slot: usize,
    start_nonce: u64,
    event: Event,
}

pub struct OpenClBackend {
    pro_que: ProQue,
    outputs: Vec<Buffer<u32>>,
    header_buf: Buffer<u8>,
    target_buf: Buffer<u8>,
    global_work_size: usize,
    pending: VecDeque<InFlight>,
    next_slot: usize,
    name: String,
}

impl OpenClBackend {
    pub fn init(descriptor: &DeviceDescriptor) -> Result<Self, DeviceError> {
        let platforms = Platform::list();
        let platform = platforms
            .get(descriptor.cl_platform_index as usize)
            .copied()
            .ok_or_else(|| {
                DeviceError::Init(format!(
                    "OpenCL platform {} not found",
                    descriptor.cl_platform_index
                ))
            })?;
        let device_list = Device::list_all(platform)
            .map_err(|e| DeviceError::Init(format!("device list: {}", e)))?;
        let device = device_list
            .get(descriptor.cl_device_index as usize)
            .copied()
            .ok_or_else(|| {
                DeviceError::Init(format!(
                    "OpenCL device {} not found on platform {}",
                    descriptor.cl_device_index, descriptor.cl_platform_index
                ))
            })?;

        let src = std::fs::read_to_string(kernel_path())
            .map_err(|e| DeviceError::Init(format!("read '{}': {}", kernel_path(), e)))?;

        let global_work_size = if descriptor.compute_units > 0 {
            (descriptor.compute_units as usize * 512).clamp(4096, 131_072)
        } else {
            DEFAULT_GLOBAL_WORK_SIZE
        };

        let pro_que = ProQue::builder()
            .platform(platform)
            .device(device)
            .src(src)
            .dims(global_work_size)
            .build()
            .map_err(|e| DeviceError::Init(format!("kernel build: {}", e)))?;

        let mut outputs = Vec::with_capacity(BUFFER_COUNT);
        for _ in 0..BUFFER_COUNT {
            outputs.push(
                Buffer::<u32>::builder()
                    .queue(pro_que.queue().clone())
                    .len(OUTPUT_WORDS)
                    .fill_val(0u32)
                    .build()
                    .map_err(|e| DeviceError::Init(format!("output buffer: {}", e)))?,
            );
        }

        let header_buf = Buffer::<u8>::builder()
            .queue(pro_que.queue().clone())
            .len(112)
            .build()
            .map_err(|e| DeviceError::Init(format!("header buffer: {}", e)))?;
        let target_buf = Buffer::<u8>::builder()
            .queue(pro_que.queue().clone())
            .len(32)
            .build()
            .map_err(|e| DeviceError::Init(format!("target buffer: {}", e)))?;

        let name = descriptor.short_name();
        info!(
            "{}: kernel compiled (global work size: {}, double buffered)",
            name, global_work_size
        );

        Ok(OpenClBackend {
            pro_que,
            outputs,
            header_buf,
            target_buf,
            global_work_size,
            pending: VecDeque::new(),
            next_slot: 0,
            name,
        })
    }

    fn build_kernel(&self, slot: usize, start_nonce: u64) -> Result<Kernel, DeviceError> {
        self.pro_que
            .kernel_builder("toshash_search")
            .arg(&self.header_buf)
            .arg(&self.target_buf)
            .arg(&self.outputs[slot])
            .arg(start_nonce)
            .build()
            .map_err(|e| DeviceError::Launch(format!("kernel args: {}", e)))
    }

    pub fn load_work(
        &mut self,
        header: &[u8; 112],
        target: &tos_hashlib::Hash256,
    ) -> Result<(), DeviceError> {
        // Drain in-flight batches; their results belong to the old job
        while let Some(batch) = self.pending.pop_front() {
            batch
                .event
                .wait_for()
                .map_err(|e| DeviceError::Sync(format!("drain: {}", e)))?;
        }

        self.header_buf
            .write(&header[..])
            .enq()
            .map_err(|e| DeviceError::Launch(format!("header upload: {}", e)))?;
        self.target_buf
            .write(&target[..])
            .enq()
            .map_err(|e| DeviceError::Launch(format!("target upload: {}", e)))?;
        self.next_slot = 0;
        Ok(())
    }

    pub fn start_batch(&mut self, start_nonce: u64) -> Result<(), DeviceError> {
        if self.pending.len() >= BUFFER_COUNT {
            return Err(DeviceError::Launch("batch ring full".to_string()));
        }

        let slot = self.next_slot;

        let zero = [0u32; 1];
        self.outputs[slot]
            .write(&zero[..])
            .len(1)
            .enq()
            .map_err(|e| DeviceError::Launch(format!("output reset: {}", e)))?;

        let kernel = self.build_kernel(slot, start_nonce)?;
        let mut event = Event::empty();
        unsafe {
            kernel
                .cmd()
                .enew(&mut event)
                .enq()
                .map_err(|e| DeviceError::Launch(format!("kernel enqueue: {}", e)))?;
        }

        self.pending.push_back(InFlight {
            slot,
            start_nonce,
            event,
        });
        self.next_slot = (self.next_slot + 1) % BUFFER_COUNT;
        Ok(())
    }

    pub fn wait_oldest(&mut self) -> Result<Vec<u64>, DeviceError> {
        let batch = self
            .pending
            .pop_front()
            .ok_or_else(|| DeviceError::Sync("no batch in flight".to_string()))?;

        // Wait only for this batch's event so the younger batch keeps
        // executing
        batch
            .event
            .wait_for()
            .map_err(|e| DeviceError::Sync(format!("event wait: {}", e)))?;

        let mut host = vec![0u32; OUTPUT_WORDS];
        self.outputs[batch.slot]
            .read(&mut host)
            .enq()
            .map_err(|e| DeviceError::Read(format!("output read: {}", e)))?;

        Ok(parse_outputs(&self.name, &host, batch.start_nonce))
    }

    pub fn batch_size(&self) -> u64 {
        self.global_work_size as u64
    }

    pub fn pipeline_depth(&self) -> usize {
        BUFFER_COUNT
    }

    pub fn free(&mut self) {
        for batch in self.pending.drain(..) {
            let _ = batch.event.wait_for();
        }
        let _ = self.pro_que.queue().finish();
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
