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

//! Farm coordinator.
//!
//! Owns the device workers, partitions each work package across them,
//! isolates failed devices, retains a previous-work fallback, and
//! multiplexes worker solution channels into the installed sink (which the
//! binary wires to the pool session's submit entry point).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{error, info, warn};

use tos_stratum::{Solution, WorkPackage};

use crate::device::{self, DeviceDescriptor};
use crate::hashrate::HashRate;
use crate::stats::{MiningStats, MiningStatsSnapshot};
use crate::worker::{DeviceHealth, Worker};

/// Fallback work older than this is not worth redistributing.
pub const FALLBACK_MAX_AGE: u64 = 30;

/// Receives every verified solution together with its job id.
pub type FarmSolutionCallback = Box<dyn Fn(&Solution, &str) + Send + Sync>;

pub struct Farm {
    workers: Mutex<Vec<Worker>>,
    failed: Mutex<HashSet<u32>>,

    running: Arc<AtomicBool>,
    paused: AtomicBool,

    current_work: Mutex<WorkPackage>,
    previous_work: Mutex<WorkPackage>,

    stats: MiningStats,
    start_time: Mutex<Instant>,

    solution_tx: Mutex<Option<Sender<(Solution, String)>>>,
    solution_sink: Arc<Mutex<Option<FarmSolutionCallback>>>,
    aggregator: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Default for Farm {
    fn default() -> Self {
        Self::new()
    }
}

impl Farm {
    pub fn new() -> Self {
        Farm {
            workers: Mutex::new(Vec::new()),
            failed: Mutex::new(HashSet::new()),
            running: Arc::new(AtomicBool::new(false)),
            paused: AtomicBool::new(false),
            current_work: Mutex::new(WorkPackage::default()),
            previous_work: Mutex::new(WorkPackage::default()),
            stats: MiningStats::new(),
            start_time: Mutex::new(Instant::now()),
            solution_tx: Mutex::new(None),
            solution_sink: Arc::new(Mutex::new(None)),
            aggregator: Mutex::new(None),
        }
    }

    /// Enumerate available devices across the requested families.
    pub fn enumerate_devices(
        include_cpu: bool,
        include_cuda: bool,
        include_opencl: bool,
    ) -> Vec<DeviceDescriptor> {
        device::enumerate_devices(include_cpu, include_cuda, include_opencl)
    }

    /// Append a worker for `descriptor`; its index is its position in the
    /// list and stays stable for its lifetime. Returns the index.
    pub fn add_device(&self, descriptor: DeviceDescriptor) -> u32 {
        let mut workers = self.workers.lock().unwrap();
        let index = workers.len() as u32;
        workers.push(Worker::new(index, descriptor));
        index
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().unwrap().len()
    }

    /// Workers not in the failed set.
    pub fn active_worker_count(&self) -> usize {
        self.sweep_failed_workers();
        let total = self.workers.lock().unwrap().len();
        total.saturating_sub(self.failed.lock().unwrap().len())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Install the sink the aggregator forwards solutions into.
    pub fn set_solution_sink(&self, sink: FarmSolutionCallback) {
        *self.solution_sink.lock().unwrap() = Some(sink);
    }

    /// Initialize all workers (in parallel) and start the ones that came
    /// up. Returns true if at least one worker is mining.
    pub fn start(&self) -> bool {
        if self.running.load(Ordering::SeqCst) {
            return true;
        }

        let workers = self.workers.lock().unwrap();
        if workers.is_empty() {
            error!("No workers to start");
            return false;
        }

        info!("Starting farm with {} worker(s)", workers.len());
        *self.start_time.lock().unwrap() = Instant::now();
        self.stats.reset();

        let (tx, rx) = unbounded();
        *self.solution_tx.lock().unwrap() = Some(tx.clone());
        for worker in workers.iter() {
            worker.set_solution_sender(tx.clone());
        }

        // Fan out the (potentially slow) device init calls
        let init_results: Vec<bool> = thread::scope(|scope| {
            let handles: Vec<_> = workers
                .iter()
                .map(|worker| scope.spawn(move || worker.init()))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or(false))
                .collect()
        });

        let mut started = 0;
        for (worker, init_ok) in workers.iter().zip(init_results) {
            if init_ok {
                worker.start();
                started += 1;
            } else {
                error!("Failed to initialize {}", worker.name());
                self.failed.lock().unwrap().insert(worker.index());
            }
        }
        drop(workers);

        if started == 0 {
            error!("Failed to start any workers");
            return false;
        }

        self.running.store(true, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);

        let running = self.running.clone();
        let sink = self.solution_sink.clone();
        let handle = thread::Builder::new()
            .name("farm-aggregator".to_string())
            .spawn(move || aggregator_loop(rx, running, sink))
            .expect("spawn farm aggregator");
        *self.aggregator.lock().unwrap() = Some(handle);

        info!("Farm started with {} active worker(s)", started);
        true
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("Stopping farm...");
        self.paused.store(false, Ordering::SeqCst);

        for worker in self.workers.lock().unwrap().iter() {
            worker.stop();
        }

        if let Some(handle) = self.aggregator.lock().unwrap().take() {
            let _ = handle.join();
        }

        info!("Farm stopped");
    }

    pub fn pause(&self) {
        if !self.running.load(Ordering::SeqCst) || self.paused.swap(true, Ordering::SeqCst) {
            return;
        }
        for worker in self.workers.lock().unwrap().iter() {
            worker.pause();
        }
        info!("Farm paused");
    }

    pub fn resume(&self) {
        if !self.running.load(Ordering::SeqCst) || !self.paused.swap(false, Ordering::SeqCst) {
            return;
        }
        for worker in self.workers.lock().unwrap().iter() {
            worker.resume();
        }
        info!("Farm resumed");
    }

    /// Distribute new work: the active worker count becomes the package's
    /// device total, a still-valid current package is retained as the
    /// fallback, and every non-failed worker gets the new package.
    pub fn set_work(&self, work: &WorkPackage) {
        let mut package = work.clone();
        package.total_devices = self.active_worker_count().max(1) as u32;

        {
            let mut current = self.current_work.lock().unwrap();
            if current.valid {
                *self.previous_work.lock().unwrap() = current.clone();
            }
            *current = package.clone();
        }

        self.distribute(&package);
        info!(
            "New work: job={} height={} devices={}",
            package.job_id, package.height, package.total_devices
        );
    }

    fn distribute(&self, package: &WorkPackage) {
        let workers = self.workers.lock().unwrap();
        let failed = self.failed.lock().unwrap();
        for worker in workers.iter() {
            if !failed.contains(&worker.index()) {
                worker.set_work(package);
            }
        }
    }

    pub fn current_work(&self) -> WorkPackage {
        self.current_work.lock().unwrap().clone()
    }

    /// Drop the current work (e.g. the pool invalidated it or went away).
    pub fn invalidate_current_work(&self) {
        self.current_work.lock().unwrap().valid = false;
    }

    /// If the current work is invalid and the previous package is still
    /// fresh (< [`FALLBACK_MAX_AGE`] seconds), redistribute it. The
    /// previous slot is consumed.
    pub fn activate_fallback_work(&self) -> bool {
        if self.current_work.lock().unwrap().valid {
            return false;
        }

        let mut fallback = {
            let mut previous = self.previous_work.lock().unwrap();
            if !previous.valid || previous.is_stale(FALLBACK_MAX_AGE) {
                return false;
            }
            let fallback = previous.clone();
            previous.reset();
            fallback
        };

        fallback.total_devices = self.active_worker_count().max(1) as u32;
        *self.current_work.lock().unwrap() = fallback.clone();
        self.distribute(&fallback);

        warn!(
            "Activated fallback work: job={} (age {}s)",
            fallback.job_id,
            fallback.age_secs()
        );
        true
    }

    /// Move a worker into the failed set; it receives no further work.
    pub fn mark_failed(&self, index: u32) {
        if self.failed.lock().unwrap().insert(index) {
            warn!("Worker {} isolated as failed", index);
        }
    }

    /// Try to bring failed workers back: re-init, restart, and rejoin the
    /// distribution set on success. Returns how many recovered.
    pub fn recover_failed(&self) -> usize {
        let indices: Vec<u32> = self.failed.lock().unwrap().iter().copied().collect();
        if indices.is_empty() {
            return 0;
        }

        let mut recovered = 0;
        let workers = self.workers.lock().unwrap();
        for index in indices {
            let Some(worker) = workers.get(index as usize) else {
                continue;
            };
            if worker.init() {
                worker.start();
                self.failed.lock().unwrap().remove(&index);
                info!("Worker {} recovered", index);
                recovered += 1;
            }
        }
        recovered
    }

    pub fn failed_workers(&self) -> Vec<u32> {
        self.sweep_failed_workers();
        let mut failed: Vec<u32> = self.failed.lock().unwrap().iter().copied().collect();
        failed.sort_unstable();
        failed
    }

    /// Pick up workers whose threads gave up since the last look.
    fn sweep_failed_workers(&self) {
        let workers = self.workers.lock().unwrap();
        let mut failed = self.failed.lock().unwrap();
        for worker in workers.iter() {
            if worker.has_failed() {
                if failed.insert(worker.index()) {
                    warn!("Worker {} isolated as failed", worker.index());
                }
            }
        }
    }

    /// Combined hash rate across all workers.
    pub fn hash_rate(&self) -> HashRate {
        let duration = self.start_time.lock().unwrap().elapsed().as_secs_f64();

        let workers = self.workers.lock().unwrap();
        let mut rate = 0.0;
        let mut ema = 0.0;
        let mut count = 0u64;
        for worker in workers.iter() {
            let hr = worker.hash_rate();
            rate += hr.rate;
            ema += hr.ema;
            count += hr.count;
        }

        HashRate::new(rate, ema, count, duration)
    }

    pub fn worker_hash_rate(&self, index: u32) -> Option<HashRate> {
        self.workers
            .lock()
            .unwrap()
            .get(index as usize)
            .map(Worker::hash_rate)
    }

    pub fn worker_health(&self, index: u32) -> Option<DeviceHealth> {
        self.workers
            .lock()
            .unwrap()
            .get(index as usize)
            .map(Worker::health)
    }

    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        self.workers
            .lock()
            .unwrap()
            .iter()
            .map(|worker| worker.descriptor().clone())
            .collect()
    }

    pub fn record_accepted_share(&self) {
        self.stats.record_accepted();
    }

    pub fn record_rejected_share(&self) {
        self.stats.record_rejected();
    }

    pub fn record_stale_share(&self) {
        self.stats.record_stale();
    }

    /// Snapshot of share counters plus the summed worker hash counts.
    pub fn stats(&self) -> MiningStatsSnapshot {
        let mut snapshot = self.stats.snapshot();
        snapshot.hash_count = self
            .workers
            .lock()
            .unwrap()
            .iter()
            .map(|worker| worker.hash_rate().count)
            .sum();
        snapshot
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
        *self.start_time.lock().unwrap() = Instant::now();
        for worker in self.workers.lock().unwrap().iter() {
            worker.reset_hash_count();
        }
    }
}

impl Drop for Farm {
    fn drop(&mut self) {
        self.stop();
    }
}

fn aggregator_loop(
    rx: Receiver<(Solution, String)>,
    running: Arc<AtomicBool>,
    sink: Arc<Mutex<Option<FarmSolutionCallback>>>,
) {
    loop {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok((solution, job_id)) => {
                info!(
                    "Solution found! nonce={} job={} device={}",
                    solution.nonce, job_id, solution.device_index
                );
                if let Some(callback) = sink.lock().unwrap().as_ref() {
                    callback(&solution, &job_id);
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceKind;
    use std::time::Duration;

    fn cpu_descriptor(index: u32) -> DeviceDescriptor {
        DeviceDescriptor {
            kind: DeviceKind::Cpu,
            index,
            name: format!("CPU Thread {}", index),
            ..DeviceDescriptor::default()
        }
    }

    fn valid_work(job_id: &str) -> WorkPackage {
        WorkPackage {
            job_id: job_id.to_string(),
            target: [0x00; 32], // nothing verifies; keeps tests quiet
            valid: true,
            ..WorkPackage::default()
        }
    }

    #[test]
    fn test_add_device_assigns_stable_indices() {
        let farm = Farm::new();
        assert_eq!(farm.add_device(cpu_descriptor(0)), 0);
        assert_eq!(farm.add_device(cpu_descriptor(1)), 1);
        assert_eq!(farm.worker_count(), 2);
        assert_eq!(farm.active_worker_count(), 2);
    }

    #[test]
    fn test_start_requires_workers() {
        let farm = Farm::new();
        assert!(!farm.start());
    }

    #[test]
    fn test_set_work_partitions_over_active_workers() {
        let farm = Farm::new();
        farm.add_device(cpu_descriptor(0));
        farm.add_device(cpu_descriptor(1));
        farm.add_device(cpu_descriptor(2));

        farm.mark_failed(2);
        farm.set_work(&valid_work("job-1"));

        assert_eq!(farm.current_work().total_devices, 2);
        assert_eq!(farm.failed_workers(), vec![2]);
    }

    #[test]
    fn test_previous_work_retained_on_replacement() {
        let farm = Farm::new();
        farm.add_device(cpu_descriptor(0));

        farm.set_work(&valid_work("job-1"));
        farm.set_work(&valid_work("job-2"));

        assert_eq!(farm.current_work().job_id, "job-2");
        assert_eq!(farm.previous_work.lock().unwrap().job_id, "job-1");
        assert!(farm.previous_work.lock().unwrap().valid);
    }

    #[test]
    fn test_fallback_activation() {
        let farm = Farm::new();
        farm.add_device(cpu_descriptor(0));

        farm.set_work(&valid_work("job-1"));
        farm.set_work(&valid_work("job-2"));

        // Current still valid: no fallback
        assert!(!farm.activate_fallback_work());

        farm.invalidate_current_work();
        assert!(farm.activate_fallback_work());
        assert_eq!(farm.current_work().job_id, "job-1");
        assert!(farm.current_work().valid);
        // The previous slot was consumed
        assert!(!farm.previous_work.lock().unwrap().valid);

        // Nothing left to fall back to
        farm.invalidate_current_work();
        assert!(!farm.activate_fallback_work());
    }

    #[test]
    fn test_fallback_rejects_stale_previous() {
        let farm = Farm::new();
        farm.add_device(cpu_descriptor(0));

        farm.set_work(&valid_work("job-1"));
        farm.set_work(&valid_work("job-2"));
        farm.invalidate_current_work();

        // Age the fallback past the limit
        farm.previous_work.lock().unwrap().received_time =
            Instant::now() - Duration::from_secs(FALLBACK_MAX_AGE + 5);

        assert!(!farm.activate_fallback_work());
    }

    #[test]
    fn test_mark_and_recover_failed() {
        let farm = Farm::new();
        farm.add_device(cpu_descriptor(0));
        farm.add_device(cpu_descriptor(1));

        farm.mark_failed(0);
        assert_eq!(farm.active_worker_count(), 1);

        let recovered = farm.recover_failed();
        assert_eq!(recovered, 1);
        assert_eq!(farm.active_worker_count(), 2);
        assert!(farm.failed_workers().is_empty());

        // Recovered worker threads are running; shut them down
        farm.workers.lock().unwrap()[0].stop();
    }

    #[test]
    fn test_share_stats_recording() {
        let farm = Farm::new();
        farm.record_accepted_share();
        farm.record_accepted_share();
        farm.record_rejected_share();
        farm.record_stale_share();

        let stats = farm.stats();
        assert_eq!(stats.accepted_shares, 2);
        assert_eq!(stats.rejected_shares, 1);
        assert_eq!(stats.stale_shares, 1);

        farm.reset_stats();
        assert_eq!(farm.stats(), MiningStatsSnapshot::default());
    }

    #[test]
    fn test_start_stop_lifecycle() {
        let farm = Farm::new();
        farm.add_device(cpu_descriptor(0));
        farm.add_device(cpu_descriptor(1));

        assert!(farm.start());
        assert!(farm.is_running());
        // Idempotent
        assert!(farm.start());

        farm.set_work(&valid_work("job-x"));

        farm.pause();
        assert!(farm.is_paused());
        farm.resume();
        assert!(!farm.is_paused());

        farm.stop();
        assert!(!farm.is_running());
    }
}
