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

//! Compute backends.
//!
//! A closed sum type over the supported device families with a uniform
//! batch capability: load work, issue a batch of candidate nonces, wait for
//! the oldest in-flight batch and collect the candidates it reported. GPU
//! families are compiled in behind the `cuda` and `opencl` features.

pub mod cpu;

#[cfg(feature = "cuda")]
pub mod cuda;

#[cfg(feature = "opencl")]
pub mod opencl;

use thiserror::Error;
use tos_hashlib::Hash256;

use cpu::CpuBackend;

/// Candidate cap per batch; a device reporting more is suspect.
pub const MAX_OUTPUTS_PER_BATCH: usize = 64;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Device init failed: {0}")]
    Init(String),

    #[error("Batch launch failed: {0}")]
    Launch(String),

    #[error("Batch wait failed: {0}")]
    Sync(String),

    #[error("Result readback failed: {0}")]
    Read(String),
}

/// Device family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Cpu,
    Cuda,
    OpenCl,
}

/// A mining device, as enumerated. Read-only after enumeration.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub kind: DeviceKind,

    /// Index within the kind (e.g. GPU ordinal)
    pub index: u32,

    /// Display name
    pub name: String,

    /// Total device memory in bytes (0 for CPU)
    pub total_memory: u64,

    /// Compute units / multiprocessors
    pub compute_units: u32,

    // OpenCL addressing
    pub cl_platform_name: String,
    pub cl_platform_index: u32,
    pub cl_device_index: u32,

    // CUDA addressing
    pub cuda_device_index: i32,
    pub cuda_compute_major: i32,
    pub cuda_compute_minor: i32,
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        DeviceDescriptor {
            kind: DeviceKind::Cpu,
            index: 0,
            name: String::new(),
            total_memory: 0,
            compute_units: 0,
            cl_platform_name: String::new(),
            cl_platform_index: 0,
            cl_device_index: 0,
            cuda_device_index: -1,
            cuda_compute_major: 0,
            cuda_compute_minor: 0,
        }
    }
}

impl DeviceDescriptor {
    /// Short name for logging: CPU0, CU1, CL2.
    pub fn short_name(&self) -> String {
        match self.kind {
            DeviceKind::Cpu => format!("CPU{}", self.index),
            DeviceKind::Cuda => format!("CU{}", self.index),
            DeviceKind::OpenCl => format!("CL{}", self.index),
        }
    }
}

/// Enumerate available devices across the requested families.
pub fn enumerate_devices(
    include_cpu: bool,
    include_cuda: bool,
    include_opencl: bool,
) -> Vec<DeviceDescriptor> {
    let mut devices = Vec::new();

    if include_cpu {
        devices.extend(cpu::enum_devices(0));
    }

    #[cfg(feature = "cuda")]
    if include_cuda {
        devices.extend(cuda::enum_devices());
    }
    #[cfg(not(feature = "cuda"))]
    if include_cuda {
        log::warn!("CUDA requested but this build has no CUDA support");
    }

    #[cfg(feature = "opencl")]
    if include_opencl {
        devices.extend(opencl::enum_devices());
    }
    #[cfg(not(feature = "opencl"))]
    if include_opencl {
        log::warn!("OpenCL requested but this build has no OpenCL support");
    }

    devices
}

/// One initialized compute backend.
pub enum DeviceBackend {
    Cpu(CpuBackend),
    #[cfg(feature = "cuda")]
    Cuda(cuda::CudaBackend),
    #[cfg(feature = "opencl")]
    OpenCl(opencl::OpenClBackend),
}

impl DeviceBackend {
    /// Acquire the device, compile kernels, allocate buffers.
    pub fn init(descriptor: &DeviceDescriptor) -> Result<Self, DeviceError> {
        match descriptor.kind {
            DeviceKind::Cpu => Ok(DeviceBackend::Cpu(CpuBackend::new())),
            #[cfg(feature = "cuda")]
            DeviceKind::Cuda => Ok(DeviceBackend::Cuda(cuda::CudaBackend::init(descriptor)?)),
            #[cfg(feature = "opencl")]
            DeviceKind::OpenCl => Ok(DeviceBackend::OpenCl(opencl::OpenClBackend::init(
                descriptor,
            )?)),
            #[allow(unreachable_patterns)]
            other => Err(DeviceError::Init(format!(
                "no backend compiled in for {:?}",
                other
            ))),
        }
    }

    /// Reload device-side constants for a new job.
    pub fn load_work(&mut self, header: &[u8; 112], target: &Hash256) -> Result<(), DeviceError> {
        match self {
            DeviceBackend::Cpu(backend) => backend.load_work(header, target),
            #[cfg(feature = "cuda")]
            DeviceBackend::Cuda(backend) => backend.load_work(header, target),
            #[cfg(feature = "opencl")]
            DeviceBackend::OpenCl(backend) => backend.load_work(header, target),
        }
    }

    /// Issue a batch of `batch_size()` candidates starting at `start_nonce`.
    pub fn start_batch(&mut self, start_nonce: u64) -> Result<(), DeviceError> {
        match self {
            DeviceBackend::Cpu(backend) => backend.start_batch(start_nonce),
            #[cfg(feature = "cuda")]
            DeviceBackend::Cuda(backend) => backend.start_batch(start_nonce),
            #[cfg(feature = "opencl")]
            DeviceBackend::OpenCl(backend) => backend.start_batch(start_nonce),
        }
    }

    /// Block on the oldest in-flight batch; return its candidate nonces.
    pub fn wait_oldest(&mut self) -> Result<Vec<u64>, DeviceError> {
        match self {
            DeviceBackend::Cpu(backend) => backend.wait_oldest(),
            #[cfg(feature = "cuda")]
            DeviceBackend::Cuda(backend) => backend.wait_oldest(),
            #[cfg(feature = "opencl")]
            DeviceBackend::OpenCl(backend) => backend.wait_oldest(),
        }
    }

    /// Candidates evaluated per batch.
    pub fn batch_size(&self) -> u64 {
        match self {
            DeviceBackend::Cpu(backend) => backend.batch_size(),
            #[cfg(feature = "cuda")]
            DeviceBackend::Cuda(backend) => backend.batch_size(),
            #[cfg(feature = "opencl")]
            DeviceBackend::OpenCl(backend) => backend.batch_size(),
        }
    }

    /// Overlap depth of the batch ring.
    pub fn pipeline_depth(&self) -> usize {
        match self {
            DeviceBackend::Cpu(backend) => backend.pipeline_depth(),
            #[cfg(feature = "cuda")]
            DeviceBackend::Cuda(backend) => backend.pipeline_depth(),
            #[cfg(feature = "opencl")]
            DeviceBackend::OpenCl(backend) => backend.pipeline_depth(),
        }
    }

    /// Release device resources; the backend is unusable afterwards and
    /// must be re-initialized.
    pub fn free(&mut self) {
        match self {
            DeviceBackend::Cpu(backend) => backend.free(),
            #[cfg(feature = "cuda")]
            DeviceBackend::Cuda(backend) => backend.free(),
            #[cfg(feature = "opencl")]
            DeviceBackend::OpenCl(backend) => backend.free(),
        }
    }
}
