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

//! Wire-level types for the Stratum family of line-framed JSON-RPC
//! protocols, plus the session-level enums shared with the miner.

use std::time::Instant;

use serde::Serialize;
use serde_json::Value;

use super::errors::{Result, StratumError};

/// Client identification sent in `mining.subscribe`.
pub const CLIENT_AGENT: &str = concat!("tos-miner/", env!("CARGO_PKG_VERSION"));

/// Stratum protocol variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StratumProtocol {
    /// Standard stratum (TOS native)
    Stratum,
    /// ETHPROXY - simplified proxy protocol, no subscribe phase
    EthProxy,
    /// ETHEREUMSTRATUM - Nicehash variant
    EthereumStratum,
    /// Stratum V2 - stub, falls back to V1 with a warning
    StratumV2,
}

/// Parse a protocol name from configuration. Unknown names map to the
/// standard variant.
pub fn parse_protocol(s: &str) -> StratumProtocol {
    match s.to_lowercase().as_str() {
        "ethproxy" => StratumProtocol::EthProxy,
        "ethereumstratum" => StratumProtocol::EthereumStratum,
        "stratumv2" | "stratum2" => StratumProtocol::StratumV2,
        _ => StratumProtocol::Stratum,
    }
}

/// Connection state, ordered by progress through the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Subscribed = 3,
    Authorized = 4,
}

impl From<u8> for SessionState {
    fn from(v: u8) -> Self {
        match v {
            1 => SessionState::Connecting,
            2 => SessionState::Connected,
            3 => SessionState::Subscribed,
            4 => SessionState::Authorized,
            _ => SessionState::Disconnected,
        }
    }
}

/// One configured pool endpoint (primary or failover).
#[derive(Debug, Clone)]
pub struct PoolEndpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub use_tls: bool,
}

impl PoolEndpoint {
    pub fn new(host: impl Into<String>, port: u16, use_tls: bool) -> Self {
        PoolEndpoint {
            host: host.into(),
            port,
            user: String::new(),
            pass: String::new(),
            use_tls,
        }
    }
}

/// A sent request awaiting its response.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub method: String,
    pub sent_at: Instant,
}

/// Outbound JSON-RPC request frame: `{id, method, params}`.
#[derive(Debug, Serialize)]
pub struct RpcRequest<'a> {
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

impl<'a> RpcRequest<'a> {
    pub fn to_line(&self) -> String {
        // Serialization of this shape cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A classified inbound message.
#[derive(Debug)]
pub enum Incoming {
    /// Response to one of our requests: `{id, result, error?}`
    Response {
        id: u64,
        result: Value,
        error: Value,
    },
    /// Server-initiated notification: `{method, params}`, id absent or null
    Notification { method: String, params: Value },
}

/// Parse one line into a response or a notification.
///
/// # Errors
///
/// `StratumError::Json` on malformed JSON, `StratumError::Protocol` on a
/// well-formed object that is neither shape.
pub fn parse_incoming(line: &str) -> Result<Incoming> {
    let msg: Value = serde_json::from_str(line)?;

    let has_id = msg.get("id").map(|id| !id.is_null()).unwrap_or(false);
    let method = msg.get("method").and_then(Value::as_str);

    if has_id && method.is_none() {
        let id = msg
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| StratumError::Protocol(format!("non-numeric response id: {}", msg)))?;
        return Ok(Incoming::Response {
            id,
            result: msg.get("result").cloned().unwrap_or(Value::Null),
            error: msg.get("error").cloned().unwrap_or(Value::Null),
        });
    }

    if let Some(method) = method {
        return Ok(Incoming::Notification {
            method: method.to_string(),
            params: msg.get("params").cloned().unwrap_or(Value::Null),
        });
    }

    Err(StratumError::Protocol(format!(
        "unknown message shape: {}",
        line
    )))
}

/// Extract a human-readable message from a JSON-RPC `error` value, which
/// pools send as `null`, a string, an object with a `message` field, or an
/// array whose element 1 carries the message.
pub fn error_message(error: &Value) -> Option<String> {
    if error.is_null() {
        return None;
    }
    if let Some(s) = error.as_str() {
        return Some(s.to_string());
    }
    if let Some(arr) = error.as_array() {
        if arr.len() > 1 {
            if let Some(s) = arr[1].as_str() {
                return Some(s.to_string());
            }
        }
    }
    if let Some(obj) = error.as_object() {
        if let Some(s) = obj.get("message").and_then(Value::as_str) {
            return Some(s.to_string());
        }
    }
    Some("Unknown error".to_string())
}
