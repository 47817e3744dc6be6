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

#![crate_name = "tos_stratum"]

//! # TOS Stratum - pool session and work model
//!
//! This crate implements the TOS miner's conversation with a mining pool:
//! a single line-framed JSON-RPC session over TCP (or TLS with the `tls`
//! feature), the work package model with nonce-space partitioning across
//! devices, and the pool-difficulty to 256-bit target derivation.
//!
//! The [`StratumSession`] runs its socket I/O and all protocol timers on one
//! dedicated thread; work, share results and connection changes are pushed
//! out through installable callbacks, and verified solutions are submitted
//! back in from any thread.

pub mod protocol;
pub mod session;
pub mod target;
pub mod transport;
pub mod work;

pub use protocol::errors::{Result, StratumError, MAX_LINE_LENGTH};
pub use protocol::types::{
    parse_protocol, PendingRequest, PoolEndpoint, SessionState, StratumProtocol, CLIENT_AGENT,
};
pub use session::{
    reconnect_backoff, ConnectionCallback, ShareCallback, StratumSession, WorkCallback,
    KEEPALIVE_INTERVAL, MAX_RECONNECT_ATTEMPTS, REQUEST_TIMEOUT, WORK_TIMEOUT,
};
pub use target::{difficulty_to_target, difficulty_to_target_f64, MAX_SAFE_DIFFICULTY};
pub use transport::{is_tls_supported, parse_pool_url};
pub use work::{
    encode_extranonce2, start_nonce_from_extranonce1, Solution, WorkPackage, MAX_DEVICES,
};
