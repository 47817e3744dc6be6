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

use thiserror::Error;

/// Maximum accepted length of one JSON-RPC line. A frame that grows past
/// this without a terminator is a transport error.
pub const MAX_LINE_LENGTH: usize = 65_536;

#[derive(Error, Debug)]
pub enum StratumError {
    /// Malformed pool URL, unknown protocol variant, missing credentials.
    /// Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connect/read/write failures. Recoverable via reconnect.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// TLS handshake or certificate verification failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// A frame exceeded [`MAX_LINE_LENGTH`] without a line terminator.
    #[error("Line exceeds {MAX_LINE_LENGTH} bytes without terminator")]
    LineTooLong,

    /// Unexpected message shape, rejected subscribe/authorize, pool-side
    /// reconnect demand, stalled work feed.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Malformed JSON on the wire.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StratumError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_detail() {
        let err = StratumError::Config("no pools configured".to_string());
        assert!(err.to_string().contains("no pools configured"));

        let err = StratumError::LineTooLong;
        assert!(err.to_string().contains("65536"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: StratumError = io.into();
        assert!(matches!(err, StratumError::Transport(_)));
    }
}
