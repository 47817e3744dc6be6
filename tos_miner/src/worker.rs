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

//! Device worker.
//!
//! One long-running thread per compute device. The worker keeps a ring of
//! in-flight batches on its backend, verifies every candidate nonce on the
//! host before emitting it, suppresses duplicates, tracks device health,
//! and attempts one recovery cycle after repeated device errors.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use log::{debug, error, info, warn};

use tos_hashlib::{meets_target, toshash, Scratchpad};
use tos_stratum::{Solution, WorkPackage};

use crate::device::{DeviceBackend, DeviceDescriptor, DeviceError, MAX_OUTPUTS_PER_BATCH};
use crate::hashrate::{HashRate, HashRateCalculator};

/// Errors in a row before the worker attempts device recovery.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Duplicate-nonce cache cap; overflow flushes the whole cache.
pub const MAX_SUBMITTED_NONCES: usize = 1000;

/// Health judgments are suppressed below this many resolved candidates.
pub const MIN_SOLUTIONS_FOR_HEALTH: u64 = 5;

const PAUSE_SLEEP: Duration = Duration::from_millis(100);

/// Solutions leave the worker as `(solution, job_id)` over this channel.
pub type SolutionSender = Sender<(Solution, String)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Failed,
}

/// Per-device health record.
#[derive(Debug, Clone)]
pub struct DeviceHealth {
    pub status: HealthStatus,
    pub valid_solutions: u64,
    pub invalid_solutions: u64,
    pub duplicate_solutions: u64,
    pub hardware_errors: u64,
    pub last_solution_time: Option<Instant>,
}

impl Default for DeviceHealth {
    fn default() -> Self {
        DeviceHealth {
            status: HealthStatus::Healthy,
            valid_solutions: 0,
            invalid_solutions: 0,
            duplicate_solutions: 0,
            hardware_errors: 0,
            last_solution_time: None,
        }
    }
}

impl DeviceHealth {
    pub fn validity_rate(&self) -> f64 {
        let total = self.valid_solutions + self.invalid_solutions;
        if total == 0 {
            return 1.0;
        }
        self.valid_solutions as f64 / total as f64
    }
}

/// Health classification from the raw counters. Judgment is withheld until
/// at least [`MIN_SOLUTIONS_FOR_HEALTH`] candidates have been resolved.
pub fn classify_health(valid: u64, invalid: u64, hardware_errors: u64) -> HealthStatus {
    let total = valid + invalid;
    if total < MIN_SOLUTIONS_FOR_HEALTH {
        return HealthStatus::Healthy;
    }

    let validity = valid as f64 / total as f64;
    if hardware_errors > 50 || validity < 0.5 {
        HealthStatus::Failed
    } else if validity < 0.80 || hardware_errors > 20 {
        HealthStatus::Unhealthy
    } else if validity < 0.95 || hardware_errors > 5 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

struct WorkerShared {
    index: u32,
    name: String,
    running: AtomicBool,
    paused: AtomicBool,
    new_work: AtomicBool,
    failed: AtomicBool,
    work: Mutex<WorkPackage>,
    hash_count: AtomicU64,
    start_time: Mutex<Instant>,
    rate: Mutex<HashRateCalculator>,
    submitted_nonces: Mutex<HashSet<u64>>,
    health: Mutex<DeviceHealth>,
    consecutive_errors: AtomicU32,
    solution_tx: Mutex<Option<SolutionSender>>,
}

/// A device worker. Construction is cheap; `init()` acquires the device.
pub struct Worker {
    descriptor: DeviceDescriptor,
    backend: Arc<Mutex<Option<DeviceBackend>>>,
    shared: Arc<WorkerShared>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Worker {
    pub fn new(index: u32, descriptor: DeviceDescriptor) -> Self {
        let name = descriptor.short_name();
        Worker {
            descriptor,
            backend: Arc::new(Mutex::new(None)),
            shared: Arc::new(WorkerShared {
                index,
                name,
                running: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                new_work: AtomicBool::new(false),
                failed: AtomicBool::new(false),
                work: Mutex::new(WorkPackage::default()),
                hash_count: AtomicU64::new(0),
                start_time: Mutex::new(Instant::now()),
                rate: Mutex::new(HashRateCalculator::default()),
                submitted_nonces: Mutex::new(HashSet::new()),
                health: Mutex::new(DeviceHealth::default()),
                consecutive_errors: AtomicU32::new(0),
                solution_tx: Mutex::new(None),
            }),
            thread: Mutex::new(None),
        }
    }

    pub fn index(&self) -> u32 {
        self.shared.index
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Acquire the device and allocate its buffers. Idempotent.
    pub fn init(&self) -> bool {
        let mut backend = self.backend.lock().unwrap();
        if backend.is_some() {
            return true;
        }
        match DeviceBackend::init(&self.descriptor) {
            Ok(fresh) => {
                *backend = Some(fresh);
                self.shared.failed.store(false, Ordering::SeqCst);
                info!("{}: initialized", self.shared.name);
                true
            }
            Err(e) => {
                error!("{}: init failed: {}", self.shared.name, e);
                false
            }
        }
    }

    /// Spawn the mining thread. Requires a successful `init()`.
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let backend = match self.backend.lock().unwrap().take() {
            Some(backend) => backend,
            None => {
                error!("{}: start without init", self.shared.name);
                self.shared.running.store(false, Ordering::SeqCst);
                self.shared.failed.store(true, Ordering::SeqCst);
                return;
            }
        };

        self.shared.paused.store(false, Ordering::SeqCst);
        self.shared.hash_count.store(0, Ordering::SeqCst);
        *self.shared.start_time.lock().unwrap() = Instant::now();
        self.shared.rate.lock().unwrap().reset();

        let shared = self.shared.clone();
        let descriptor = self.descriptor.clone();
        let backend_slot = self.backend.clone();

        let spawned = thread::Builder::new()
            .name(self.shared.name.clone())
            .spawn(move || {
                info!("{} started", shared.name);
                if let Some(backend) = mine_loop(&shared, backend, &descriptor) {
                    // Keep the device for a later restart
                    *backend_slot.lock().unwrap() = Some(backend);
                }
                info!("{} stopped", shared.name);
            });

        match spawned {
            Ok(handle) => *self.thread.lock().unwrap() = Some(handle),
            Err(e) => {
                error!("{}: failed to spawn mining thread: {}", self.shared.name, e);
                self.shared.running.store(false, Ordering::SeqCst);
                self.shared.failed.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Cooperative stop: outstanding device work is drained, the thread is
    /// joined.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shared.paused.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Stop issuing batches and drain the ring; resources stay allocated.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// True once recovery has failed and the worker gave up.
    pub fn has_failed(&self) -> bool {
        self.shared.failed.load(Ordering::SeqCst)
    }

    /// Hand the worker new work. Never blocks on the mining thread. The
    /// duplicate cache is flushed when the job id changes.
    pub fn set_work(&self, work: &WorkPackage) {
        let job_changed = {
            let mut current = self.shared.work.lock().unwrap();
            let changed = current.job_id != work.job_id;
            *current = work.clone();
            changed
        };

        if job_changed {
            self.shared.submitted_nonces.lock().unwrap().clear();
        }
        self.shared.new_work.store(true, Ordering::SeqCst);
    }

    /// Install the upward solution channel.
    pub fn set_solution_sender(&self, tx: SolutionSender) {
        *self.shared.solution_tx.lock().unwrap() = Some(tx);
    }

    pub fn hash_rate(&self) -> HashRate {
        let count = self.shared.hash_count.load(Ordering::SeqCst);
        let duration = self.shared.start_time.lock().unwrap().elapsed().as_secs_f64();
        let instant = if duration > 0.0 {
            count as f64 / duration
        } else {
            0.0
        };
        let ema = self.shared.rate.lock().unwrap().ema_rate();
        HashRate::new(instant, ema, count, duration)
    }

    pub fn reset_hash_count(&self) {
        self.shared.hash_count.store(0, Ordering::SeqCst);
        *self.shared.start_time.lock().unwrap() = Instant::now();
        self.shared.rate.lock().unwrap().reset();
    }

    pub fn health(&self) -> DeviceHealth {
        self.shared.health.lock().unwrap().clone()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Drain every in-flight batch, discarding candidates.
fn drain_ring(backend: &mut DeviceBackend, in_flight: &mut usize) {
    while *in_flight > 0 {
        *in_flight -= 1;
        if backend.wait_oldest().is_err() {
            break;
        }
    }
    *in_flight = 0;
}

/// Record a device error; on the recovery threshold, free and re-init the
/// device and replay the current work. Returns false when recovery failed
/// and the worker must give up.
fn note_device_error(
    shared: &WorkerShared,
    backend: &mut DeviceBackend,
    descriptor: &DeviceDescriptor,
    err: &DeviceError,
) -> bool {
    warn!("{}: device error: {}", shared.name, err);
    {
        let mut health = shared.health.lock().unwrap();
        health.hardware_errors += 1;
        update_health_status(&mut health, &shared.name);
    }

    let errors = shared.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
    if errors < MAX_CONSECUTIVE_ERRORS {
        return true;
    }

    error!(
        "{}: too many consecutive errors ({}), attempting recovery...",
        shared.name, errors
    );
    shared.consecutive_errors.store(0, Ordering::SeqCst);

    backend.free();
    match DeviceBackend::init(descriptor) {
        Ok(fresh) => {
            *backend = fresh;
            // Replay the current work on the next loop iteration
            shared.new_work.store(true, Ordering::SeqCst);
            info!("{}: recovery successful", shared.name);
            true
        }
        Err(e) => {
            error!("{}: recovery failed, stopping: {}", shared.name, e);
            false
        }
    }
}

/// The worker loop. Returns the backend for reuse on a clean stop, `None`
/// when the device died.
fn mine_loop(
    shared: &WorkerShared,
    mut backend: DeviceBackend,
    descriptor: &DeviceDescriptor,
) -> Option<DeviceBackend> {
    let mut scratch = Scratchpad::new();
    let mut in_flight = 0usize;
    let mut nonce = 0u64;
    let mut work = WorkPackage::default();

    while shared.running.load(Ordering::SeqCst) {
        let batch_size = backend.batch_size();

        if shared.paused.load(Ordering::SeqCst) {
            drain_ring(&mut backend, &mut in_flight);
            thread::sleep(PAUSE_SLEEP);
            continue;
        }

        if shared.new_work.swap(false, Ordering::SeqCst) {
            // Results still in flight belong to the old job
            drain_ring(&mut backend, &mut in_flight);

            work = shared.work.lock().unwrap().clone();
            if !work.valid {
                thread::sleep(PAUSE_SLEEP);
                continue;
            }

            if let Err(e) = backend.load_work(&work.header, &work.target) {
                if !note_device_error(shared, &mut backend, descriptor, &e) {
                    shared.failed.store(true, Ordering::SeqCst);
                    shared.running.store(false, Ordering::SeqCst);
                    return None;
                }
                continue;
            }

            nonce = work.device_start_nonce(shared.index);
            debug!(
                "{}: job {} starting at nonce {:#018x}",
                shared.name, work.job_id, nonce
            );
        }

        if !work.valid {
            thread::sleep(PAUSE_SLEEP);
            continue;
        }

        // Ring full: resolve the oldest batch before issuing the next
        if in_flight >= backend.pipeline_depth() {
            match backend.wait_oldest() {
                Ok(candidates) => {
                    in_flight -= 1;
                    shared.consecutive_errors.store(0, Ordering::SeqCst);

                    for candidate in candidates.into_iter().take(MAX_OUTPUTS_PER_BATCH) {
                        verify_candidate(shared, &work, candidate, &mut scratch);
                    }

                    let total =
                        shared.hash_count.fetch_add(batch_size, Ordering::SeqCst) + batch_size;
                    shared.rate.lock().unwrap().update(total);
                }
                Err(e) => {
                    in_flight = 0;
                    if !note_device_error(shared, &mut backend, descriptor, &e) {
                        shared.failed.store(true, Ordering::SeqCst);
                        shared.running.store(false, Ordering::SeqCst);
                        return None;
                    }
                    thread::sleep(PAUSE_SLEEP);
                    continue;
                }
            }
        }

        match backend.start_batch(nonce) {
            Ok(()) => {
                in_flight += 1;
                nonce = nonce.wrapping_add(batch_size);
            }
            Err(e) => {
                in_flight = 0;
                if !note_device_error(shared, &mut backend, descriptor, &e) {
                    shared.failed.store(true, Ordering::SeqCst);
                    shared.running.store(false, Ordering::SeqCst);
                    return None;
                }
                thread::sleep(PAUSE_SLEEP);
            }
        }
    }

    drain_ring(&mut backend, &mut in_flight);
    Some(backend)
}

/// Resolve one device-reported candidate: duplicate check, range check,
/// host recomputation, emit upward on success.
fn verify_candidate(shared: &WorkerShared, work: &WorkPackage, nonce: u64, scratch: &mut Scratchpad) {
    // Duplicate check before the expensive hash
    if shared.submitted_nonces.lock().unwrap().contains(&nonce) {
        warn!("{}: duplicate nonce {} (device fault?)", shared.name, nonce);
        let mut health = shared.health.lock().unwrap();
        health.duplicate_solutions += 1;
        return;
    }

    // A candidate outside this worker's range is a suspected device fault;
    // rejected without hashing
    if work.total_devices > 1 {
        let range_start = work.device_start_nonce(shared.index);
        let range_end = range_start.wrapping_add(work.space_per_device());
        let in_range = if range_end > range_start {
            nonce >= range_start && nonce < range_end
        } else {
            nonce >= range_start
        };
        if !in_range {
            warn!(
                "{}: nonce {} outside device range [{}, {}) - possible device fault",
                shared.name, nonce, range_start, range_end
            );
            let mut health = shared.health.lock().unwrap();
            health.hardware_errors += 1;
            update_health_status(&mut health, &shared.name);
            return;
        }
    }

    let hash = toshash::hash_with_nonce(&work.header, nonce, scratch);

    if meets_target(&hash, &work.target) {
        {
            let mut submitted = shared.submitted_nonces.lock().unwrap();
            if submitted.len() >= MAX_SUBMITTED_NONCES {
                // Wholesale flush, simplicity over LRU
                submitted.clear();
            }
            submitted.insert(nonce);
        }
        {
            let mut health = shared.health.lock().unwrap();
            health.valid_solutions += 1;
            health.last_solution_time = Some(Instant::now());
            update_health_status(&mut health, &shared.name);
        }

        info!("{}: verified solution nonce={}", shared.name, nonce);

        if let Some(tx) = shared.solution_tx.lock().unwrap().as_ref() {
            // A send error means the farm is gone; the loop will be told
            // to stop shortly
            let _ = tx.send((Solution::new(nonce, hash, shared.index), work.job_id.clone()));
        }
    } else {
        {
            let mut health = shared.health.lock().unwrap();
            health.invalid_solutions += 1;
            update_health_status(&mut health, &shared.name);
        }
        warn!("{}: invalid solution discarded (nonce={})", shared.name, nonce);
    }
}

fn update_health_status(health: &mut DeviceHealth, name: &str) {
    let status = classify_health(
        health.valid_solutions,
        health.invalid_solutions,
        health.hardware_errors,
    );
    if status != health.status {
        match status {
            HealthStatus::Failed => error!(
                "{}: device marked as FAILED (validity={:.1}%, errors={})",
                name,
                health.validity_rate() * 100.0,
                health.hardware_errors
            ),
            HealthStatus::Unhealthy => warn!(
                "{}: device health UNHEALTHY (validity={:.1}%)",
                name,
                health.validity_rate() * 100.0
            ),
            HealthStatus::Degraded => debug!(
                "{}: device health degraded (validity={:.1}%)",
                name,
                health.validity_rate() * 100.0
            ),
            HealthStatus::Healthy => {}
        }
    }
    health.status = status;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceKind;
    use crossbeam_channel::unbounded;

    fn cpu_worker(index: u32) -> Worker {
        let descriptor = DeviceDescriptor {
            kind: DeviceKind::Cpu,
            index,
            name: format!("CPU Thread {}", index),
            ..DeviceDescriptor::default()
        };
        Worker::new(index, descriptor)
    }

    fn easy_work(job_id: &str, total_devices: u32) -> WorkPackage {
        WorkPackage {
            job_id: job_id.to_string(),
            target: [0xff; 32],
            total_devices,
            valid: true,
            ..WorkPackage::default()
        }
    }

    #[test]
    fn test_classify_health_table() {
        // Judgment suppressed until 5 resolved candidates
        assert_eq!(classify_health(0, 0, 0), HealthStatus::Healthy);
        assert_eq!(classify_health(1, 3, 100), HealthStatus::Healthy);

        assert_eq!(classify_health(100, 0, 0), HealthStatus::Healthy);
        assert_eq!(classify_health(100, 0, 5), HealthStatus::Healthy);

        // validity in [0.80, 0.95) or a few hardware errors: degraded
        assert_eq!(classify_health(90, 10, 0), HealthStatus::Degraded);
        assert_eq!(classify_health(100, 0, 6), HealthStatus::Degraded);

        // validity in [0.50, 0.80) or >20 hardware errors: unhealthy
        assert_eq!(classify_health(70, 30, 0), HealthStatus::Unhealthy);
        assert_eq!(classify_health(100, 0, 21), HealthStatus::Unhealthy);

        // validity < 0.50 or >50 hardware errors: failed
        assert_eq!(classify_health(10, 40, 0), HealthStatus::Failed);
        assert_eq!(classify_health(100, 0, 51), HealthStatus::Failed);
    }

    #[test]
    fn test_health_boundaries() {
        // Exactly 0.95 with few errors is healthy
        assert_eq!(classify_health(95, 5, 0), HealthStatus::Healthy);
        // Exactly 0.80 with moderate errors is degraded, not unhealthy
        assert_eq!(classify_health(80, 20, 0), HealthStatus::Degraded);
        // Exactly 0.50 is unhealthy, not failed
        assert_eq!(classify_health(50, 50, 0), HealthStatus::Unhealthy);
    }

    #[test]
    fn test_worker_init_idempotent() {
        let worker = cpu_worker(0);
        assert!(worker.init());
        assert!(worker.init());
    }

    #[test]
    fn test_worker_mines_and_emits_verified_solutions() {
        let worker = cpu_worker(0);
        let (tx, rx) = unbounded();
        worker.set_solution_sender(tx);

        assert!(worker.init());
        worker.set_work(&easy_work("job-a", 1));
        worker.start();

        // Max target: every candidate verifies
        let (solution, job_id) = rx
            .recv_timeout(Duration::from_secs(30))
            .expect("solution emitted");
        worker.stop();

        assert_eq!(job_id, "job-a");
        assert_eq!(solution.device_index, 0);
        // The emitted hash is the host-recomputed one
        let mut scratch = Scratchpad::new();
        let work = easy_work("job-a", 1);
        assert_eq!(
            toshash::hash_with_nonce(&work.header, solution.nonce, &mut scratch),
            solution.hash
        );

        assert!(worker.health().valid_solutions > 0);
        assert!(worker.hash_rate().count > 0);
    }

    #[test]
    fn test_worker_never_emits_duplicate_nonce_per_job() {
        let worker = cpu_worker(0);
        let (tx, rx) = unbounded();
        worker.set_solution_sender(tx);

        assert!(worker.init());
        worker.set_work(&easy_work("job-b", 1));
        worker.start();

        let mut seen = HashSet::new();
        let mut received = 0;
        while received < 64 {
            let (solution, _) = rx
                .recv_timeout(Duration::from_secs(60))
                .expect("solutions flowing");
            assert!(seen.insert(solution.nonce), "duplicate nonce emitted");
            received += 1;
        }
        worker.stop();
    }

    #[test]
    fn test_pause_stops_emission() {
        let worker = cpu_worker(0);
        let (tx, rx) = unbounded();
        worker.set_solution_sender(tx);

        assert!(worker.init());
        worker.set_work(&easy_work("job-c", 1));
        worker.start();

        // Let it produce, then pause; the ring drains and emission stops
        let _ = rx.recv_timeout(Duration::from_secs(30)).expect("mining");
        worker.pause();
        while rx.recv_timeout(Duration::from_secs(3)).is_ok() {}
        assert!(worker.is_paused());

        worker.resume();
        assert!(rx.recv_timeout(Duration::from_secs(30)).is_ok());
        worker.stop();
    }

    #[test]
    fn test_job_change_resets_duplicate_cache() {
        let worker = cpu_worker(0);
        worker
            .shared
            .submitted_nonces
            .lock()
            .unwrap()
            .extend([1u64, 2, 3]);

        worker.set_work(&easy_work("job-d", 1));
        assert!(worker.shared.submitted_nonces.lock().unwrap().is_empty());

        // Same job id again: cache survives
        worker
            .shared
            .submitted_nonces
            .lock()
            .unwrap()
            .insert(42);
        worker.set_work(&easy_work("job-d", 1));
        assert!(worker.shared.submitted_nonces.lock().unwrap().contains(&42));
    }

    #[test]
    fn test_verify_rejects_out_of_range_nonce() {
        let worker = cpu_worker(0);
        let work = easy_work("job-e", 4);
        let mut scratch = Scratchpad::new();

        // Device 0 owns [0, 2^62); a nonce far above is device 3 territory
        let foreign = work.device_start_nonce(3) + 10;
        verify_candidate(&worker.shared, &work, foreign, &mut scratch);

        let health = worker.health();
        assert_eq!(health.hardware_errors, 1);
        assert_eq!(health.valid_solutions, 0);
    }

    #[test]
    fn test_verify_counts_invalid_candidate() {
        let worker = cpu_worker(0);
        let mut work = easy_work("job-f", 1);
        work.target = [0x00; 32]; // nothing meets this
        let mut scratch = Scratchpad::new();

        verify_candidate(&worker.shared, &work, 12345, &mut scratch);

        let health = worker.health();
        assert_eq!(health.invalid_solutions, 1);
        assert_eq!(health.valid_solutions, 0);
    }

    #[test]
    fn test_verify_counts_duplicate() {
        let worker = cpu_worker(0);
        let work = easy_work("job-g", 1);
        let mut scratch = Scratchpad::new();

        verify_candidate(&worker.shared, &work, 7, &mut scratch);
        verify_candidate(&worker.shared, &work, 7, &mut scratch);

        let health = worker.health();
        assert_eq!(health.valid_solutions, 1);
        assert_eq!(health.duplicate_solutions, 1);
    }

    #[test]
    fn test_duplicate_cache_flushes_wholesale_at_cap() {
        let worker = cpu_worker(0);
        {
            let mut submitted = worker.shared.submitted_nonces.lock().unwrap();
            for n in 0..MAX_SUBMITTED_NONCES as u64 {
                submitted.insert(n);
            }
        }

        let work = easy_work("job-h", 1);
        let mut scratch = Scratchpad::new();
        verify_candidate(&worker.shared, &work, u64::MAX / 2, &mut scratch);

        // Cache was cleared and now holds only the new nonce
        let submitted = worker.shared.submitted_nonces.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        assert!(submitted.contains(&(u64::MAX / 2)));
    }
}
