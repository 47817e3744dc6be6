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

use std::sync::Arc;
use std::time::Duration;

use clap::{Arg, ArgAction, Command};
use log::{error, info, warn};

use tos_miner::config::{load_cfg, Cfg};
use tos_miner::device::DeviceKind;
use tos_miner::farm::Farm;
use tos_miner::{control, logger};
use tos_stratum::{parse_protocol, StratumSession};

const CRATE_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

#[tokio::main]
async fn main() {
    let arg = Command::new("TOS Miner")
        .version(env!("CARGO_PKG_VERSION"))
        .about(CRATE_DESCRIPTION)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Location of the config file")
                .default_value("miner_config.yaml"),
        )
        .arg(
            Arg::new("benchmark")
                .long("benchmark")
                .value_name("ITERATIONS")
                .help("Benchmark the hash core and exit")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("list-devices")
                .long("list-devices")
                .action(ArgAction::SetTrue)
                .help("Enumerate compute devices and exit"),
        );

    let matches = arg.get_matches();
    let config = matches.get_one::<String>("config").unwrap();
    let cfg = load_cfg(config);
    logger::init_logger(&cfg);

    info!("TOS Miner {}", env!("CARGO_PKG_VERSION"));
    info!("{}", CRATE_DESCRIPTION);

    if let Some(&iterations) = matches.get_one::<u64>("benchmark") {
        run_benchmark(iterations);
        return;
    }

    if matches.get_flag("list-devices") {
        list_devices(&cfg);
        return;
    }

    run_miner(cfg).await;
}

fn run_benchmark(iterations: u64) {
    info!("Benchmarking TosHash V3 ({} iterations)...", iterations);
    let rate = tos_hashlib::toshash::benchmark(iterations.max(1));
    info!("Hash rate: {:.2} H/s", rate);
}

fn list_devices(cfg: &Cfg) {
    let devices = Farm::enumerate_devices(cfg.cpu_enabled, cfg.cuda_enabled, cfg.opencl_enabled);
    if devices.is_empty() {
        warn!("No devices found");
        return;
    }
    for device in &devices {
        match device.kind {
            DeviceKind::Cpu => info!("{}: {}", device.short_name(), device.name),
            DeviceKind::Cuda => info!(
                "{}: {} (SM {}.{}, {} MB, {} SMs)",
                device.short_name(),
                device.name,
                device.cuda_compute_major,
                device.cuda_compute_minor,
                device.total_memory / (1024 * 1024),
                device.compute_units
            ),
            DeviceKind::OpenCl => info!(
                "{}: {} [{}] ({} MB, {} CUs)",
                device.short_name(),
                device.name,
                device.cl_platform_name,
                device.total_memory / (1024 * 1024),
                device.compute_units
            ),
        }
    }
}

async fn run_miner(cfg: Cfg) {
    control::clear_stop_request();

    // Build the farm
    let farm = Arc::new(Farm::new());
    let mut devices =
        Farm::enumerate_devices(cfg.cpu_enabled, cfg.cuda_enabled, cfg.opencl_enabled);
    if cfg.cpu_threads > 0 {
        let mut kept_cpu = 0;
        devices.retain(|d| {
            if d.kind == DeviceKind::Cpu {
                kept_cpu += 1;
                kept_cpu <= cfg.cpu_threads
            } else {
                true
            }
        });
    }
    if devices.is_empty() {
        error!("No usable devices, exiting");
        std::process::exit(1);
    }
    for device in devices {
        farm.add_device(device);
    }

    // Build the pool session
    let session = Arc::new(StratumSession::new());
    session.set_protocol(parse_protocol(&cfg.protocol));
    session.set_tls_verification(cfg.tls_strict);
    session.set_reconnect_delay(cfg.reconnect_delay);

    let primary = &cfg.pools[0];
    session.set_credentials(&primary.user, &primary.pass);

    // Pool session -> farm: new work fans out to all workers
    {
        let farm = farm.clone();
        session.set_work_callback(Box::new(move |work| {
            farm.set_work(&work);
        }));
    }

    // Farm -> pool session: verified solutions are submitted upstream
    {
        let session = session.clone();
        farm.set_solution_sink(Box::new(move |solution, job_id| {
            session.submit_solution(solution, job_id);
        }));
    }

    // Share results feed the farm statistics
    {
        let farm = farm.clone();
        session.set_share_callback(Box::new(move |accepted, reason| {
            if accepted {
                farm.record_accepted_share();
            } else if reason.to_lowercase().contains("stale")
                || reason.to_lowercase().contains("job not found")
            {
                farm.record_stale_share();
            } else {
                farm.record_rejected_share();
            }
        }));
    }

    // A connection drop pauses mining and invalidates the in-hand job;
    // after reconnect the retained fallback package bridges the gap until
    // the pool sends fresh work
    {
        let farm = farm.clone();
        session.set_connection_callback(Box::new(move |connected| {
            if connected {
                info!("Pool connection established");
                farm.resume();
                farm.activate_fallback_work();
            } else {
                warn!("Pool connection lost");
                farm.invalidate_current_work();
                farm.pause();
            }
        }));
    }

    if !farm.start() {
        error!("Failed to start any mining device, exiting");
        std::process::exit(1);
    }

    if let Err(e) = session.connect_url(&cfg.pools[0].url) {
        error!("{}", e);
        farm.stop();
        std::process::exit(1);
    }
    for failover in cfg.pools.iter().skip(1) {
        if let Err(e) = session.add_failover_url(&failover.url) {
            error!("Skipping failover '{}': {}", failover.url, e);
        }
    }

    // Stats ticker until Ctrl-C or a stop request
    let mut ticker = tokio::time::interval(Duration::from_secs(10));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await; // immediate first tick

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down...");
                control::request_stop();
            }
            _ = ticker.tick() => {
                let rate = farm.hash_rate();
                let stats = farm.stats();
                info!(
                    "Speed: {:.2} H/s (ema {:.2}) | Shares: {}A/{}R/{}S | Active: {}/{}",
                    rate.rate,
                    rate.ema,
                    stats.accepted_shares,
                    stats.rejected_shares,
                    stats.stale_shares,
                    farm.active_worker_count(),
                    farm.worker_count()
                );
            }
        }

        if control::is_stop_requested() {
            break;
        }
    }

    // Let in-flight shares resolve, then tear everything down
    let completed = session.graceful_disconnect(5000);
    if completed > 0 {
        info!("{} pending share(s) resolved before disconnect", completed);
    }
    farm.stop();

    let stats = farm.stats();
    info!(
        "Session totals: {} hashes, {} accepted, {} rejected, {} stale",
        stats.hash_count, stats.accepted_shares, stats.rejected_shares, stats.stale_shares
    );
}
