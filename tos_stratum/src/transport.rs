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

//! Pool transport: URL parsing, TCP/TLS connection establishment, and
//! capped line framing over the raw byte stream.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use log::debug;
use regex::Regex;

use crate::protocol::errors::{Result, StratumError, MAX_LINE_LENGTH};
use crate::protocol::types::PoolEndpoint;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Parse a pool URL of the form `stratum+tcp://host:port` or
/// `stratum+ssl://host:port`.
///
/// # Errors
///
/// `StratumError::Config` when the URL does not match the grammar.
pub fn parse_pool_url(url: &str) -> Result<(String, u16, bool)> {
    static URL_RE: OnceLock<Regex> = OnceLock::new();
    let re = URL_RE.get_or_init(|| {
        Regex::new(r"^stratum\+(tcp|ssl)://([^:/]+):(\d+)$").expect("static regex")
    });

    let caps = re.captures(url).ok_or_else(|| {
        StratumError::Config(format!(
            "Invalid pool URL '{}'. Expected stratum+tcp://host:port or stratum+ssl://host:port",
            url
        ))
    })?;

    let use_tls = &caps[1] == "ssl";
    let host = caps[2].to_string();
    let port: u16 = caps[3]
        .parse()
        .map_err(|_| StratumError::Config(format!("Invalid port in pool URL '{}'", url)))?;

    Ok((host, port, use_tls))
}

/// Reading half of a pool connection, owned by the session's I/O thread.
pub(crate) enum ReadHalf {
    Tcp(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Arc<Mutex<native_tls::TlsStream<TcpStream>>>),
}

impl ReadHalf {
    /// Read a chunk, blocking up to the socket read timeout. A timeout
    /// surfaces as `WouldBlock`/`TimedOut`, which the caller treats as a
    /// timer tick, not an error.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            ReadHalf::Tcp(stream) => stream.read(buf),
            #[cfg(feature = "tls")]
            ReadHalf::Tls(shared) => match shared.lock() {
                Ok(mut stream) => stream.read(buf),
                Err(_) => Err(std::io::Error::other("TLS stream lock poisoned")),
            },
        }
    }
}

/// Writing half of a pool connection. Cloneable; a mutex serializes the
/// actual socket writes so submissions from multiple workers interleave
/// cleanly on the wire.
#[derive(Clone)]
pub(crate) enum WriteHalf {
    Tcp(Arc<Mutex<TcpStream>>),
    #[cfg(feature = "tls")]
    Tls(Arc<Mutex<native_tls::TlsStream<TcpStream>>>),
}

impl WriteHalf {
    pub fn write_line(&self, line: &str) -> std::io::Result<()> {
        fn write_all(w: &mut impl Write, line: &str) -> std::io::Result<()> {
            w.write_all(line.as_bytes())?;
            w.write_all(b"\n")?;
            w.flush()
        }

        match self {
            WriteHalf::Tcp(shared) => {
                let mut stream = shared
                    .lock()
                    .map_err(|_| std::io::Error::other("socket lock poisoned"))?;
                write_all(&mut *stream, line)
            }
            #[cfg(feature = "tls")]
            WriteHalf::Tls(shared) => {
                let mut stream = shared
                    .lock()
                    .map_err(|_| std::io::Error::other("TLS stream lock poisoned"))?;
                write_all(&mut *stream, line)
            }
        }
    }
}

pub(crate) struct Connection {
    pub reader: ReadHalf,
    pub writer: WriteHalf,
}

/// Establish a connection to a pool endpoint. `read_timeout` bounds each
/// blocking read so the I/O loop can service its timers.
pub(crate) fn connect(
    endpoint: &PoolEndpoint,
    tls_strict: bool,
    read_timeout: Duration,
) -> Result<Connection> {
    let addrs: Vec<_> = (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()?
        .collect();
    if addrs.is_empty() {
        return Err(StratumError::Config(format!(
            "Could not resolve pool host '{}'",
            endpoint.host
        )));
    }

    let mut last_err: Option<std::io::Error> = None;
    let mut stream = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(s) => {
                stream = Some(s);
                break;
            }
            Err(e) => last_err = Some(e),
        }
    }
    let stream = match stream {
        Some(s) => s,
        None => {
            return Err(StratumError::Transport(last_err.unwrap_or_else(|| {
                std::io::Error::other("no addresses to connect to")
            })))
        }
    };

    stream.set_nodelay(true)?;

    if endpoint.use_tls {
        // The read timeout is applied after the handshake completes
        return connect_tls(endpoint, stream, tls_strict, read_timeout);
    }

    stream.set_read_timeout(Some(read_timeout))?;
    debug!("TCP connection established to {}:{}", endpoint.host, endpoint.port);
    let write_stream = stream.try_clone()?;
    Ok(Connection {
        reader: ReadHalf::Tcp(stream),
        writer: WriteHalf::Tcp(Arc::new(Mutex::new(write_stream))),
    })
}

#[cfg(feature = "tls")]
fn connect_tls(
    endpoint: &PoolEndpoint,
    stream: TcpStream,
    strict: bool,
    read_timeout: Duration,
) -> Result<Connection> {
    let mut builder = native_tls::TlsConnector::builder();
    if strict {
        log::info!("TLS strict verification enabled");
    } else {
        // Pools commonly run self-signed certificates
        debug!("TLS permissive mode (accepting any certificate)");
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    }
    let connector = builder
        .build()
        .map_err(|e| StratumError::Tls(e.to_string()))?;

    let tls = connector
        .connect(&endpoint.host, stream)
        .map_err(|e| StratumError::Tls(format!("TLS handshake failed: {}", e)))?;
    tls.get_ref().set_read_timeout(Some(read_timeout))?;

    log::info!(
        "TLS connection established to {}:{}",
        endpoint.host, endpoint.port
    );

    let shared = Arc::new(Mutex::new(tls));
    Ok(Connection {
        reader: ReadHalf::Tls(shared.clone()),
        writer: WriteHalf::Tls(shared),
    })
}

#[cfg(not(feature = "tls"))]
fn connect_tls(
    _endpoint: &PoolEndpoint,
    _stream: TcpStream,
    _strict: bool,
    _read_timeout: Duration,
) -> Result<Connection> {
    Err(StratumError::Config(
        "TLS not supported (built without the 'tls' feature)".to_string(),
    ))
}

/// True when this build can speak `stratum+ssl://`.
pub fn is_tls_supported() -> bool {
    cfg!(feature = "tls")
}

/// Accumulates raw chunks and yields complete `\n`-terminated lines, with
/// trailing `\r` stripped. Enforces [`MAX_LINE_LENGTH`].
pub(crate) struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        LineBuffer { buf: Vec::new() }
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<Vec<String>> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            if pos > MAX_LINE_LENGTH {
                return Err(StratumError::LineTooLong);
            }
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop(); // '\n'
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if !line.is_empty() {
                lines.push(String::from_utf8_lossy(&line).into_owned());
            }
        }

        if self.buf.len() > MAX_LINE_LENGTH {
            return Err(StratumError::LineTooLong);
        }

        Ok(lines)
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
