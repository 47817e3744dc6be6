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

//! Stratum pool session.
//!
//! A single serialized conversation with one of N configured pools over
//! line-framed JSON-RPC. One dedicated I/O thread owns the socket read side
//! and all timers; writes are mutex-serialized so share submissions from
//! multiple workers interleave cleanly on the wire.
//!
//! State machine:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Subscribed -> Authorized
//!                                   ^____________|____________|
//!          (any error / pool-requested reconnect / timeout -> Disconnected)
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serde_json::{json, Value};

use tos_hashlib::{Hash256, HASH_SIZE, INPUT_SIZE};

use crate::protocol::errors::{Result, StratumError};
use crate::protocol::types::{
    error_message, parse_incoming, Incoming, PendingRequest, PoolEndpoint, RpcRequest,
    SessionState, StratumProtocol, CLIENT_AGENT,
};
use crate::target::difficulty_to_target;
use crate::transport::{self, LineBuffer, WriteHalf};
use crate::work::{encode_extranonce2, start_nonce_from_extranonce1, Solution, WorkPackage};

/// Keepalive ping interval while authorized.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// A request without a response for this long is evicted.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How often timed-out requests are garbage-collected.
pub const REQUEST_CLEANUP_INTERVAL: Duration = Duration::from_secs(10);

/// No new work for this long while authorized forces a reconnect.
pub const WORK_TIMEOUT: Duration = Duration::from_secs(60);

/// The session stops for good after this many consecutive failed attempts.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Socket read timeout; doubles as the timer service tick.
const READ_TICK: Duration = Duration::from_millis(500);

/// Exponential backoff before reconnect attempt `attempts`:
/// `base * 2^min(attempts, 5)` seconds.
pub fn reconnect_backoff(base_delay_secs: u64, attempts: u32) -> u64 {
    base_delay_secs * (1u64 << attempts.min(5))
}

pub type WorkCallback = Box<dyn Fn(WorkPackage) + Send + Sync>;
pub type ShareCallback = Box<dyn Fn(bool, &str) + Send + Sync>;
pub type ConnectionCallback = Box<dyn Fn(bool) + Send + Sync>;

struct Inner {
    running: AtomicBool,
    state: AtomicU8,

    pools: Mutex<Vec<PoolEndpoint>>,
    current_pool_index: AtomicUsize,
    user: Mutex<String>,
    pass: Mutex<String>,
    protocol: Mutex<StratumProtocol>,
    tls_strict: AtomicBool,
    auto_reconnect: AtomicBool,
    reconnect_delay_secs: AtomicU64,
    reconnect_attempts: AtomicU32,

    writer: Mutex<Option<WriteHalf>>,
    request_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingRequest>>,
    /// Set by handlers that want the read loop to tear the connection down
    reconnect_requested: AtomicBool,

    current_work: Mutex<WorkPackage>,
    difficulty: Mutex<f64>,
    target: Mutex<Hash256>,
    has_pool_target: AtomicBool,
    session_id: Mutex<String>,
    extranonce1: Mutex<String>,
    extranonce2_size: AtomicU32,
    last_work_time: Mutex<Instant>,

    accepted_shares: AtomicU64,
    rejected_shares: AtomicU64,
    last_error: Mutex<String>,

    work_callback: Mutex<Option<WorkCallback>>,
    share_callback: Mutex<Option<ShareCallback>>,
    connection_callback: Mutex<Option<ConnectionCallback>>,
}

/// The pool session handle. Cheap to share; all methods take `&self`.
pub struct StratumSession {
    inner: Arc<Inner>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Default for StratumSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StratumSession {
    pub fn new() -> Self {
        StratumSession {
            inner: Arc::new(Inner {
                running: AtomicBool::new(false),
                state: AtomicU8::new(SessionState::Disconnected as u8),
                pools: Mutex::new(Vec::new()),
                current_pool_index: AtomicUsize::new(0),
                user: Mutex::new(String::new()),
                pass: Mutex::new(String::new()),
                protocol: Mutex::new(StratumProtocol::Stratum),
                tls_strict: AtomicBool::new(false),
                auto_reconnect: AtomicBool::new(true),
                reconnect_delay_secs: AtomicU64::new(5),
                reconnect_attempts: AtomicU32::new(0),
                writer: Mutex::new(None),
                request_id: AtomicU64::new(1),
                pending: Mutex::new(HashMap::new()),
                reconnect_requested: AtomicBool::new(false),
                current_work: Mutex::new(WorkPackage::default()),
                difficulty: Mutex::new(1.0),
                // Default to max target (difficulty 1 semantics until told)
                target: Mutex::new([0xff; HASH_SIZE]),
                has_pool_target: AtomicBool::new(false),
                session_id: Mutex::new(String::new()),
                extranonce1: Mutex::new(String::new()),
                extranonce2_size: AtomicU32::new(4),
                last_work_time: Mutex::new(Instant::now()),
                accepted_shares: AtomicU64::new(0),
                rejected_shares: AtomicU64::new(0),
                last_error: Mutex::new(String::new()),
                work_callback: Mutex::new(None),
                share_callback: Mutex::new(None),
                connection_callback: Mutex::new(None),
            }),
            thread: Mutex::new(None),
        }
    }

    // ----- configuration ---------------------------------------------------

    pub fn set_credentials(&self, user: &str, pass: &str) {
        *self.inner.user.lock().unwrap() = user.to_string();
        *self.inner.pass.lock().unwrap() = pass.to_string();
        for pool in self.inner.pools.lock().unwrap().iter_mut() {
            pool.user = user.to_string();
            pool.pass = pass.to_string();
        }
    }

    pub fn set_protocol(&self, protocol: StratumProtocol) {
        *self.inner.protocol.lock().unwrap() = protocol;
    }

    pub fn protocol(&self) -> StratumProtocol {
        *self.inner.protocol.lock().unwrap()
    }

    /// Strict mode verifies server certificates; permissive mode accepts
    /// any certificate (pools often run self-signed).
    pub fn set_tls_verification(&self, strict: bool) {
        self.inner.tls_strict.store(strict, Ordering::SeqCst);
    }

    pub fn is_tls_strict(&self) -> bool {
        self.inner.tls_strict.load(Ordering::SeqCst)
    }

    pub fn set_auto_reconnect(&self, enable: bool) {
        self.inner.auto_reconnect.store(enable, Ordering::SeqCst);
    }

    pub fn set_reconnect_delay(&self, seconds: u64) {
        self.inner
            .reconnect_delay_secs
            .store(seconds.max(1), Ordering::SeqCst);
    }

    pub fn add_failover(&self, host: &str, port: u16, use_tls: bool) {
        let mut endpoint = PoolEndpoint::new(host, port, use_tls);
        endpoint.user = self.inner.user.lock().unwrap().clone();
        endpoint.pass = self.inner.pass.lock().unwrap().clone();
        self.inner.pools.lock().unwrap().push(endpoint);
    }

    pub fn add_failover_url(&self, url: &str) -> Result<()> {
        let (host, port, use_tls) = transport::parse_pool_url(url)?;
        self.add_failover(&host, port, use_tls);
        Ok(())
    }

    pub fn set_work_callback(&self, callback: WorkCallback) {
        *self.inner.work_callback.lock().unwrap() = Some(callback);
    }

    pub fn set_share_callback(&self, callback: ShareCallback) {
        *self.inner.share_callback.lock().unwrap() = Some(callback);
    }

    pub fn set_connection_callback(&self, callback: ConnectionCallback) {
        *self.inner.connection_callback.lock().unwrap() = Some(callback);
    }

    // ----- lifecycle -------------------------------------------------------

    /// Connect to a pool. Spawns the I/O thread; returns once the thread is
    /// launched, not once the handshake completes.
    pub fn connect(&self, host: &str, port: u16, use_tls: bool) -> Result<()> {
        if use_tls && !transport::is_tls_supported() {
            return Err(StratumError::Config(
                "TLS not supported (built without the 'tls' feature)".to_string(),
            ));
        }

        if self.inner.running.load(Ordering::SeqCst) {
            self.disconnect();
        }

        {
            let mut endpoint = PoolEndpoint::new(host, port, use_tls);
            endpoint.user = self.inner.user.lock().unwrap().clone();
            endpoint.pass = self.inner.pass.lock().unwrap().clone();

            let mut pools = self.inner.pools.lock().unwrap();
            if pools.is_empty() {
                pools.push(endpoint);
            } else {
                pools[0] = endpoint;
            }
        }
        self.inner.current_pool_index.store(0, Ordering::SeqCst);
        self.inner.reconnect_attempts.store(0, Ordering::SeqCst);
        self.inner.reconnect_requested.store(false, Ordering::SeqCst);
        set_state(&self.inner, SessionState::Connecting);
        self.inner.running.store(true, Ordering::SeqCst);

        let inner = self.inner.clone();
        let handle = thread::Builder::new()
            .name("stratum-io".to_string())
            .spawn(move || io_thread(inner))?;
        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Connect from a `stratum+tcp://` or `stratum+ssl://` URL.
    pub fn connect_url(&self, url: &str) -> Result<()> {
        let (host, port, use_tls) = transport::parse_pool_url(url)?;
        if use_tls {
            info!("Using TLS/SSL connection");
        }
        self.connect(&host, port, use_tls)
    }

    /// Stop the session: shuts down the I/O thread, drops the socket and
    /// clears callbacks' view of the connection.
    pub fn disconnect(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        set_state(&self.inner, SessionState::Disconnected);

        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }

        *self.inner.writer.lock().unwrap() = None;
        self.inner.pending.lock().unwrap().clear();
        notify_connection(&self.inner, false);
    }

    /// Wait up to `timeout_ms` for pending share submissions to resolve,
    /// polling every 100 ms, then disconnect. Returns how many resolved.
    pub fn graceful_disconnect(&self, timeout_ms: u64) -> usize {
        if self.state() == SessionState::Disconnected {
            return 0;
        }

        let initial = self.pending_request_count();
        if initial > 0 {
            info!("Waiting for {} pending share(s) to complete...", initial);
        }

        let check_interval = Duration::from_millis(100);
        let mut waited = Duration::ZERO;
        let timeout = Duration::from_millis(timeout_ms);

        while waited < timeout {
            if self.pending_request_count() == 0 {
                break;
            }
            thread::sleep(check_interval);
            waited += check_interval;
        }

        let remaining = self.pending_request_count();
        let completed = initial.saturating_sub(remaining);
        if remaining > 0 {
            warn!(
                "Timeout waiting for {} pending request(s), disconnecting anyway",
                remaining
            );
        } else if initial > 0 {
            info!("All pending requests completed");
        }

        self.disconnect();
        completed
    }

    // ----- inspection ------------------------------------------------------

    pub fn state(&self) -> SessionState {
        SessionState::from(self.inner.state.load(Ordering::SeqCst))
    }

    pub fn is_connected(&self) -> bool {
        self.state() >= SessionState::Connected
    }

    pub fn is_authorized(&self) -> bool {
        self.state() == SessionState::Authorized
    }

    pub fn pending_request_count(&self) -> usize {
        self.inner.pending.lock().unwrap().len()
    }

    pub fn difficulty(&self) -> f64 {
        *self.inner.difficulty.lock().unwrap()
    }

    pub fn accepted_shares(&self) -> u64 {
        self.inner.accepted_shares.load(Ordering::SeqCst)
    }

    pub fn rejected_shares(&self) -> u64 {
        self.inner.rejected_shares.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> String {
        self.inner.last_error.lock().unwrap().clone()
    }

    pub fn current_work(&self) -> WorkPackage {
        self.inner.current_work.lock().unwrap().clone()
    }

    // ----- submission ------------------------------------------------------

    /// Submit a verified solution for `job_id`. Callable from any thread;
    /// the socket write is mutex-serialized.
    pub fn submit_solution(&self, solution: &Solution, job_id: &str) {
        if !self.is_authorized() {
            warn!("Cannot submit: not authorized");
            return;
        }

        let work = self.current_work();
        let en2_size = self.inner.extranonce2_size.load(Ordering::SeqCst);

        // extranonce2 = nonce - start_nonce, little-endian, exact width
        let en2_value = solution.nonce.wrapping_sub(work.start_nonce);
        let en2_hex = encode_extranonce2(en2_value, en2_size);

        // Nonce big-endian, padded to 16 hex chars
        let nonce_hex = format!("{:016x}", solution.nonce);

        let user = self.inner.user.lock().unwrap().clone();
        let params = json!([user, job_id, en2_hex, nonce_hex]);

        match send_request(&self.inner, "mining.submit", params) {
            Ok(id) => {
                info!(
                    "Submitting share (job={}, dev={}, en2={}, nonce={})",
                    job_id, solution.device_index, en2_hex, nonce_hex
                );
                self.inner.pending.lock().unwrap().insert(
                    id,
                    PendingRequest {
                        method: "mining.submit".to_string(),
                        sent_at: Instant::now(),
                    },
                );
            }
            Err(e) => error!("Share submission send failed: {}", e),
        }
    }
}

impl Drop for StratumSession {
    fn drop(&mut self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

// ----- I/O thread ----------------------------------------------------------

fn set_state(inner: &Inner, state: SessionState) {
    inner.state.store(state as u8, Ordering::SeqCst);
}

fn state_of(inner: &Inner) -> SessionState {
    SessionState::from(inner.state.load(Ordering::SeqCst))
}

fn notify_connection(inner: &Inner, connected: bool) {
    if let Some(cb) = inner.connection_callback.lock().unwrap().as_ref() {
        cb(connected);
    }
}

fn notify_share(inner: &Inner, accepted: bool, reason: &str) {
    if let Some(cb) = inner.share_callback.lock().unwrap().as_ref() {
        cb(accepted, reason);
    }
}

fn record_error(inner: &Inner, err: &StratumError) {
    *inner.last_error.lock().unwrap() = err.to_string();
}

fn io_thread(inner: Arc<Inner>) {
    while inner.running.load(Ordering::SeqCst) {
        set_state(&inner, SessionState::Connecting);

        match run_connection(&inner) {
            Ok(()) => {
                // Clean stop requested
                break;
            }
            Err(e) => {
                record_error(&inner, &e);
                error!("Pool connection error: {}", e);
            }
        }

        // Tear down this connection
        *inner.writer.lock().unwrap() = None;
        inner.pending.lock().unwrap().clear();
        set_state(&inner, SessionState::Disconnected);
        notify_connection(&inner, false);

        if !inner.running.load(Ordering::SeqCst) || !inner.auto_reconnect.load(Ordering::SeqCst) {
            break;
        }

        let mut attempts = inner.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;

        // Try the next configured pool once half the attempt budget is gone
        let pool_count = inner.pools.lock().unwrap().len();
        if attempts >= MAX_RECONNECT_ATTEMPTS / 2 && pool_count > 1 {
            let next =
                (inner.current_pool_index.load(Ordering::SeqCst) + 1) % pool_count;
            inner.current_pool_index.store(next, Ordering::SeqCst);
            info!("Switching to failover pool {}/{}", next + 1, pool_count);
            inner.reconnect_attempts.store(0, Ordering::SeqCst);
            attempts = 0;
        }

        if attempts >= MAX_RECONNECT_ATTEMPTS {
            error!("Max reconnect attempts reached");
            inner.running.store(false, Ordering::SeqCst);
            break;
        }

        let delay = reconnect_backoff(inner.reconnect_delay_secs.load(Ordering::SeqCst), attempts);
        info!("Reconnecting in {} seconds...", delay);

        // Sleep in slices so disconnect() stays responsive
        let deadline = Instant::now() + Duration::from_secs(delay);
        while Instant::now() < deadline && inner.running.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
        }
    }

    set_state(&inner, SessionState::Disconnected);
}

/// Drive one connection from dial to the error (or clean stop) that ends it.
fn run_connection(inner: &Inner) -> Result<()> {
    let endpoint = {
        let pools = inner.pools.lock().unwrap();
        if pools.is_empty() {
            return Err(StratumError::Config("No pool configured".to_string()));
        }
        let index = inner.current_pool_index.load(Ordering::SeqCst) % pools.len();
        pools[index].clone()
    };

    info!(
        "Connecting to {}:{} ({})...",
        endpoint.host,
        endpoint.port,
        if endpoint.use_tls { "TLS" } else { "TCP" }
    );

    let connection = transport::connect(
        &endpoint,
        inner.tls_strict.load(Ordering::SeqCst),
        READ_TICK,
    )?;
    *inner.writer.lock().unwrap() = Some(connection.writer.clone());

    info!("Connected to {}:{}", endpoint.host, endpoint.port);
    set_state(inner, SessionState::Connected);
    inner.reconnect_attempts.store(0, Ordering::SeqCst);
    inner.reconnect_requested.store(false, Ordering::SeqCst);
    notify_connection(inner, true);

    *inner.last_work_time.lock().unwrap() = Instant::now();

    subscribe(inner)?;

    let mut reader = connection.reader;
    let mut lines = LineBuffer::new();
    let mut chunk = [0u8; 4096];

    let mut next_keepalive = Instant::now() + KEEPALIVE_INTERVAL;
    let mut next_cleanup = Instant::now() + REQUEST_CLEANUP_INTERVAL;

    loop {
        if !inner.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        if inner.reconnect_requested.swap(false, Ordering::SeqCst) {
            return Err(StratumError::Protocol("reconnect requested".to_string()));
        }

        match reader.read_chunk(&mut chunk) {
            Ok(0) => {
                return Err(StratumError::Transport(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed by pool",
                )));
            }
            Ok(n) => {
                let complete = match lines.push_chunk(&chunk[..n]) {
                    Ok(complete) => complete,
                    Err(e) => {
                        lines.clear();
                        return Err(e);
                    }
                };
                for line in complete {
                    process_line(inner, &line);
                }
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                // Timer tick, fall through
            }
            Err(e) => return Err(e.into()),
        }

        let now = Instant::now();

        if now >= next_cleanup {
            cleanup_pending(inner)?;
            next_cleanup = now + REQUEST_CLEANUP_INTERVAL;
        }

        if now >= next_keepalive {
            if state_of(inner) == SessionState::Authorized {
                // Pools that don't know mining.ping just ignore it
                let _ = send_request(inner, "mining.ping", json!([]));
            }
            next_keepalive = now + KEEPALIVE_INTERVAL;
        }

        if state_of(inner) == SessionState::Authorized {
            let elapsed = inner.last_work_time.lock().unwrap().elapsed();
            if elapsed >= WORK_TIMEOUT {
                warn!(
                    "No new work received for {} seconds, reconnecting...",
                    elapsed.as_secs()
                );
                return Err(StratumError::Protocol("work timeout".to_string()));
            }
        }
    }
}

fn send_request(inner: &Inner, method: &str, params: Value) -> Result<u64> {
    let writer = {
        let guard = inner.writer.lock().unwrap();
        match guard.as_ref() {
            Some(writer) => writer.clone(),
            None => {
                return Err(StratumError::Transport(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "not connected",
                )))
            }
        }
    };

    let id = inner.request_id.fetch_add(1, Ordering::SeqCst);
    let request = RpcRequest { id, method, params };
    let line = request.to_line();
    debug!("Send: {}", line);

    writer.write_line(&line)?;
    Ok(id)
}

fn track_request(inner: &Inner, id: u64, method: &str) {
    inner.pending.lock().unwrap().insert(
        id,
        PendingRequest {
            method: method.to_string(),
            sent_at: Instant::now(),
        },
    );
}

fn subscribe(inner: &Inner) -> Result<()> {
    let protocol = *inner.protocol.lock().unwrap();

    let params = match protocol {
        StratumProtocol::EthProxy => {
            // ETHPROXY has no subscribe phase, go straight to login
            set_state(inner, SessionState::Subscribed);
            return authorize(inner);
        }
        StratumProtocol::EthereumStratum => json!([CLIENT_AGENT, "EthereumStratum/1.0.0"]),
        StratumProtocol::StratumV2 => {
            warn!("Stratum V2 not yet fully implemented, falling back to V1");
            json!([CLIENT_AGENT])
        }
        StratumProtocol::Stratum => json!([CLIENT_AGENT]),
    };

    let id = send_request(inner, "mining.subscribe", params)?;
    track_request(inner, id, "mining.subscribe");
    Ok(())
}

fn authorize(inner: &Inner) -> Result<()> {
    let (pool_user, pool_pass) = {
        let pools = inner.pools.lock().unwrap();
        let index = inner.current_pool_index.load(Ordering::SeqCst) % pools.len().max(1);
        match pools.get(index) {
            Some(pool) => (pool.user.clone(), pool.pass.clone()),
            None => (String::new(), String::new()),
        }
    };
    let user = if pool_user.is_empty() {
        inner.user.lock().unwrap().clone()
    } else {
        pool_user
    };
    let pass = if pool_pass.is_empty() {
        inner.pass.lock().unwrap().clone()
    } else {
        pool_pass
    };

    let protocol = *inner.protocol.lock().unwrap();
    let (method, params) = match protocol {
        StratumProtocol::EthProxy => {
            let params = if !pass.is_empty() && pass != "x" {
                json!([user, pass])
            } else {
                json!([user])
            };
            ("eth_submitLogin", params)
        }
        _ => ("mining.authorize", json!([user, pass])),
    };

    let id = send_request(inner, method, params)?;
    track_request(inner, id, method);
    Ok(())
}

fn process_line(inner: &Inner, line: &str) {
    debug!("Recv: {}", line);

    let incoming = match parse_incoming(line) {
        Ok(incoming) => incoming,
        Err(e) => {
            // One bad frame must not kill the session
            warn!("Ignoring malformed message: {}", e);
            return;
        }
    };

    match incoming {
        Incoming::Response { id, result, error } => handle_response(inner, id, result, error),
        Incoming::Notification { method, params } => handle_notification(inner, &method, params),
    }
}

fn handle_response(inner: &Inner, id: u64, result: Value, error: Value) {
    let method = inner
        .pending
        .lock()
        .unwrap()
        .remove(&id)
        .map(|req| req.method)
        .unwrap_or_default();

    let error_msg = error_message(&error);

    match method.as_str() {
        "mining.subscribe" => {
            if let Some(msg) = error_msg {
                error!("Subscription failed: {}", msg);
                inner.reconnect_requested.store(true, Ordering::SeqCst);
                return;
            }
            handle_subscribe_result(inner, &result);
        }
        "mining.authorize" | "eth_submitLogin" => {
            if let Some(msg) = error_msg {
                error!("Authorization failed: {}", msg);
                inner.reconnect_requested.store(true, Ordering::SeqCst);
                return;
            }
            let authorized = result.as_bool().unwrap_or(true);
            if authorized {
                let user = inner.user.lock().unwrap().clone();
                info!("Authorized with pool as {}", user);
                set_state(inner, SessionState::Authorized);
            } else {
                error!("Authorization rejected");
                inner.reconnect_requested.store(true, Ordering::SeqCst);
            }
        }
        "mining.submit" => {
            if let Some(msg) = error_msg {
                warn!("Share rejected: {}", msg);
                inner.rejected_shares.fetch_add(1, Ordering::SeqCst);
                notify_share(inner, false, &msg);
            } else if result.as_bool().unwrap_or(false) {
                info!("Share accepted!");
                inner.accepted_shares.fetch_add(1, Ordering::SeqCst);
                notify_share(inner, true, "");
            } else {
                warn!("Share rejected");
                inner.rejected_shares.fetch_add(1, Ordering::SeqCst);
                notify_share(inner, false, "rejected");
            }
        }
        // Untracked id (e.g. keepalive): nothing to resolve
        _ => {}
    }
}

/// Parse the subscribe result. Accepts both shapes:
/// nested `[[["mining.notify","id"], ...], extranonce1, extranonce2_size]`
/// and flat `[["mining.notify","id"], extranonce1, extranonce2_size]`.
fn handle_subscribe_result(inner: &Inner, result: &Value) {
    let arr = match result.as_array() {
        Some(arr) if arr.len() >= 2 => arr,
        _ => {
            warn!("Unexpected subscribe result shape: {}", result);
            return;
        }
    };

    if let Some(subs) = arr[0].as_array() {
        if !subs.is_empty() {
            if subs[0].is_array() {
                // Nested: session id from the first subscription pair
                if let Some(pair) = subs[0].as_array() {
                    if pair.len() >= 2 {
                        if let Some(sid) = pair[1].as_str() {
                            *inner.session_id.lock().unwrap() = sid.to_string();
                        }
                    }
                }
            } else if subs[0].is_string() && subs.len() >= 2 {
                // Flat: ["mining.notify", "id"]
                if let Some(sid) = subs[1].as_str() {
                    *inner.session_id.lock().unwrap() = sid.to_string();
                }
            }
        }
    }

    if let Some(en1) = arr[1].as_str() {
        *inner.extranonce1.lock().unwrap() = en1.to_string();
    }

    if arr.len() >= 3 {
        if let Some(size) = arr[2].as_u64() {
            // Below 4 bytes miners collide on nonces rapidly; above 8 we
            // cannot represent the offset in a u64
            let clamped = if size < 4 {
                warn!("Pool extranonce2_size={} is too small, using minimum of 4", size);
                4
            } else if size > 8 {
                warn!("Pool extranonce2_size={} exceeds maximum, using 8", size);
                8
            } else {
                size
            };
            inner
                .extranonce2_size
                .store(clamped as u32, Ordering::SeqCst);
        }
    }

    info!(
        "Subscribed (session={}, extranonce1={}, extranonce2_size={})",
        inner.session_id.lock().unwrap(),
        inner.extranonce1.lock().unwrap(),
        inner.extranonce2_size.load(Ordering::SeqCst)
    );
    set_state(inner, SessionState::Subscribed);

    if let Err(e) = authorize(inner) {
        error!("Authorize send failed: {}", e);
        inner.reconnect_requested.store(true, Ordering::SeqCst);
    }
}

fn handle_notification(inner: &Inner, method: &str, params: Value) {
    match method {
        "mining.notify" => handle_mining_notify(inner, &params),
        "mining.set_difficulty" | "mining.set_target" => handle_set_difficulty(inner, &params),
        "client.show_message" => {
            if let Some(msg) = params.get(0).and_then(Value::as_str) {
                info!("Pool message: {}", msg);
            }
        }
        "client.reconnect" => {
            info!("Pool requested reconnect");
            inner.reconnect_requested.store(true, Ordering::SeqCst);
        }
        other => debug!("Unknown notification: {}", other),
    }
}

/// Handle `mining.notify`. Two accepted shapes:
///
/// - compact: `[job_id, header_hex, target_hex, height, clean_jobs]`
/// - standard: `[job_id, prev_hash, coinbase1, coinbase2, merkle[], version,
///   nbits, ntime, clean_jobs]`; only job_id and prev_hash are consumed
fn handle_mining_notify(inner: &Inner, params: &Value) {
    let arr = match params.as_array() {
        Some(arr) if arr.len() >= 2 => arr,
        _ => {
            error!("Invalid mining.notify params");
            return;
        }
    };

    let job_id = match arr[0].as_str() {
        Some(id) => id.to_string(),
        None => {
            error!("mining.notify job id is not a string");
            return;
        }
    };

    let mut work = WorkPackage {
        job_id,
        ..WorkPackage::default()
    };
    let mut pool_sent_target = false;
    let mut clean_jobs = false;

    if arr.len() >= 5 && arr[4].is_boolean() {
        // Compact shape
        let header_hex = arr[1].as_str().unwrap_or_default();
        let target_hex = arr[2].as_str().unwrap_or_default();
        work.height = arr[3].as_u64().unwrap_or(0);
        clean_jobs = arr[4].as_bool().unwrap_or(false);

        match hex::decode(header_hex) {
            Ok(bytes) => work.set_header(&bytes),
            Err(e) => {
                error!("Failed to parse header hex: {}", e);
                return;
            }
        }

        if target_hex.len() >= HASH_SIZE * 2 {
            match hex::decode(&target_hex[..HASH_SIZE * 2]) {
                Ok(bytes) => {
                    work.target.copy_from_slice(&bytes);
                    pool_sent_target = true;
                    debug!("Using pool-sent target (256-bit)");
                }
                Err(e) => {
                    error!("Failed to parse target hex: {}", e);
                    return;
                }
            }
        } else if !target_hex.is_empty() {
            // Partial target: most significant bytes first, zero-padded right
            match hex::decode(target_hex) {
                Ok(bytes) => {
                    work.target = [0u8; HASH_SIZE];
                    work.target[..bytes.len().min(HASH_SIZE)]
                        .copy_from_slice(&bytes[..bytes.len().min(HASH_SIZE)]);
                    pool_sent_target = true;
                    debug!("Using pool-sent partial target");
                }
                Err(e) => {
                    error!("Failed to parse target hex: {}", e);
                    return;
                }
            }
        } else {
            work.target = *inner.target.lock().unwrap();
        }
    } else {
        // Standard shape: only job_id and prev_hash are consumed
        let prev_hash = arr[1].as_str().unwrap_or_default();
        if let Ok(bytes) = hex::decode(prev_hash) {
            let len = bytes.len().min(32).min(INPUT_SIZE);
            work.header[..len].copy_from_slice(&bytes[..len]);
        }
        work.target = *inner.target.lock().unwrap();
        work.height = 0;
    }

    // Pool-sent targets stay authoritative until the next notify
    inner
        .has_pool_target
        .store(pool_sent_target, Ordering::SeqCst);
    if pool_sent_target {
        *inner.target.lock().unwrap() = work.target;
    }

    // Extranonce state for nonce allocation and submission
    let extranonce1 = inner.extranonce1.lock().unwrap().clone();
    work.start_nonce = start_nonce_from_extranonce1(&extranonce1);
    work.extranonce1 = extranonce1;
    work.extranonce2_size = inner.extranonce2_size.load(Ordering::SeqCst);

    // The farm overwrites this with its active worker count
    work.total_devices = 1;
    work.received_time = Instant::now();
    work.valid = true;

    *inner.last_work_time.lock().unwrap() = Instant::now();

    {
        let mut current = inner.current_work.lock().unwrap();
        if current.valid && current.job_id != work.job_id {
            let old_age = current.age_secs();
            if old_age > 30 {
                warn!("Previous job {} was {}s old", current.job_id, old_age);
            }
        }
        *current = work.clone();
    }

    if let Some(cb) = inner.work_callback.lock().unwrap().as_ref() {
        cb(work.clone());
    }

    if clean_jobs {
        info!("New job (clean): {}", work.job_id);
    }
    info!("New job: {} (height={})", work.job_id, work.height);
}

fn handle_set_difficulty(inner: &Inner, params: &Value) {
    let difficulty = match params.get(0).and_then(Value::as_f64) {
        Some(d) => d,
        None => {
            error!("Invalid set_difficulty params");
            return;
        }
    };

    *inner.difficulty.lock().unwrap() = difficulty;

    let derived = difficulty_to_target(difficulty);

    // A pool-sent explicit target takes precedence over derived targets
    if !inner.has_pool_target.load(Ordering::SeqCst) {
        *inner.target.lock().unwrap() = derived;
        info!("Difficulty set to {} (using derived target)", difficulty);

        let mut work = inner.current_work.lock().unwrap();
        if work.valid {
            work.target = derived;
        }
    } else {
        info!("Difficulty set to {} (keeping pool target)", difficulty);
    }
}

/// Evict pending requests older than [`REQUEST_TIMEOUT`]; timed-out share
/// submissions count as rejected. Three or more simultaneous timeouts mean
/// the connection is probably dead.
fn cleanup_pending(inner: &Inner) -> Result<()> {
    let now = Instant::now();
    let mut timed_out = Vec::new();

    {
        let mut pending = inner.pending.lock().unwrap();
        pending.retain(|id, req| {
            if now.duration_since(req.sent_at) >= REQUEST_TIMEOUT {
                warn!(
                    "Request {} ({}) timed out after {}s",
                    id,
                    req.method,
                    now.duration_since(req.sent_at).as_secs()
                );
                timed_out.push(req.method.clone());
                false
            } else {
                true
            }
        });
    }

    for method in &timed_out {
        if method == "mining.submit" {
            inner.rejected_shares.fetch_add(1, Ordering::SeqCst);
            notify_share(inner, false, "timeout");
        }
    }

    if timed_out.len() >= 3 {
        return Err(StratumError::Protocol(
            "multiple request timeouts - connection may be stale".to_string(),
        ));
    }
    Ok(())
}
