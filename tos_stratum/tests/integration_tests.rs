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

//! Integration tests for tos_stratum against an in-process mock pool.
//!
//! Each test starts a TcpListener, accepts the session's connection, and
//! scripts the server side of the JSON-RPC conversation line by line.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use tos_stratum::{SessionState, Solution, StratumSession, WorkPackage};

struct MockPool {
    port: u16,
    handle: thread::JoinHandle<Vec<Value>>,
}

/// Start a scripted pool: accepts one connection, answers subscribe and
/// authorize, then runs `script` against the connection. Returns every
/// request line the client sent.
fn spawn_pool<F>(script: F) -> MockPool
where
    F: FnOnce(&mut TcpStream, &mut BufReader<TcpStream>, &mut Vec<Value>) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock pool");
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut reader = BufReader::new(stream);
        let mut requests: Vec<Value> = Vec::new();

        script(&mut writer, &mut reader, &mut requests);
        requests
    });

    MockPool { port, handle }
}

fn read_request(reader: &mut BufReader<TcpStream>, requests: &mut Vec<Value>) -> Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read request");
    let value: Value = serde_json::from_str(line.trim_end()).expect("request json");
    requests.push(value.clone());
    value
}

fn send_line(writer: &mut TcpStream, value: Value) {
    let mut line = value.to_string();
    line.push('\n');
    writer.write_all(line.as_bytes()).expect("write line");
}

fn wait_for<F: Fn() -> bool>(what: &str, timeout: Duration, predicate: F) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return;
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!("timed out waiting for {}", what);
}

/// Answer the standard subscribe + authorize handshake.
fn do_handshake(
    writer: &mut TcpStream,
    reader: &mut BufReader<TcpStream>,
    requests: &mut Vec<Value>,
    extranonce1: &str,
    extranonce2_size: u64,
) {
    let subscribe = read_request(reader, requests);
    assert_eq!(subscribe["method"], "mining.subscribe");
    send_line(
        writer,
        json!({
            "id": subscribe["id"],
            "result": [[["mining.notify", "abc"]], extranonce1, extranonce2_size],
            "error": null
        }),
    );

    let authorize = read_request(reader, requests);
    assert_eq!(authorize["method"], "mining.authorize");
    send_line(
        writer,
        json!({"id": authorize["id"], "result": true, "error": null}),
    );
}

#[test]
fn subscribe_authorize_round_trip() {
    let pool = spawn_pool(|writer, reader, requests| {
        do_handshake(writer, reader, requests, "01020304", 4);
        // Hold the connection open until the client goes away
        let mut line = String::new();
        let _ = reader.read_line(&mut line);
    });

    let session = StratumSession::new();
    session.set_credentials("addr.worker", "x");

    let states = Arc::new(Mutex::new(Vec::new()));
    let state_log = states.clone();
    session.set_connection_callback(Box::new(move |connected| {
        state_log.lock().unwrap().push(connected);
    }));

    session
        .connect_url(&format!("stratum+tcp://127.0.0.1:{}", pool.port))
        .unwrap();

    wait_for("authorized", Duration::from_secs(5), || {
        session.is_authorized()
    });
    assert_eq!(session.state(), SessionState::Authorized);

    session.disconnect();
    let requests = pool.handle.join().unwrap();

    // subscribe carries the client agent, authorize the credentials
    assert_eq!(requests[0]["method"], "mining.subscribe");
    assert!(requests[0]["params"][0]
        .as_str()
        .unwrap()
        .starts_with("tos-miner/"));
    assert_eq!(requests[1]["method"], "mining.authorize");
    assert_eq!(requests[1]["params"][0], "addr.worker");

    let states = states.lock().unwrap();
    assert_eq!(states.first(), Some(&true));
    assert_eq!(states.last(), Some(&false));
}

#[test]
fn notify_produces_work_with_extranonce_base() {
    let pool = spawn_pool(|writer, reader, requests| {
        do_handshake(writer, reader, requests, "01020304", 4);

        let header_hex = "cd".repeat(112);
        send_line(
            writer,
            json!({
                "id": null,
                "method": "mining.notify",
                "params": ["job-1", header_hex, "", 77, true]
            }),
        );

        let mut line = String::new();
        let _ = reader.read_line(&mut line);
    });

    let session = StratumSession::new();
    session.set_credentials("addr.worker", "x");

    let (work_tx, work_rx) = mpsc::channel::<WorkPackage>();
    session.set_work_callback(Box::new(move |work| {
        let _ = work_tx.send(work);
    }));

    session
        .connect_url(&format!("stratum+tcp://127.0.0.1:{}", pool.port))
        .unwrap();

    let work = work_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("work event");

    assert!(work.valid);
    assert_eq!(work.job_id, "job-1");
    assert_eq!(work.height, 77);
    // extranonce1 "01020304" decodes little-endian to 0x04030201
    assert_eq!(work.start_nonce, 0x0403_0201);
    assert_eq!(work.extranonce1, "01020304");
    assert_eq!(work.extranonce2_size, 4);
    assert_eq!(work.header, [0xcd; 112]);

    session.disconnect();
    pool.handle.join().unwrap();
}

#[test]
fn submit_encodes_extranonce2_and_nonce() {
    let pool = spawn_pool(|writer, reader, requests| {
        do_handshake(writer, reader, requests, "00000000", 4);

        let header_hex = "00".repeat(112);
        send_line(
            writer,
            json!({
                "id": null,
                "method": "mining.notify",
                "params": ["job-2", header_hex, "", 1, true]
            }),
        );

        // The submit arrives next; accept it
        let submit = read_request(reader, requests);
        assert_eq!(submit["method"], "mining.submit");
        send_line(
            writer,
            json!({"id": submit["id"], "result": true, "error": null}),
        );

        let mut line = String::new();
        let _ = reader.read_line(&mut line);
    });

    let session = StratumSession::new();
    session.set_credentials("wallet.rig", "x");

    let (work_tx, work_rx) = mpsc::channel::<WorkPackage>();
    session.set_work_callback(Box::new(move |work| {
        let _ = work_tx.send(work);
    }));

    let (share_tx, share_rx) = mpsc::channel::<(bool, String)>();
    session.set_share_callback(Box::new(move |accepted, reason| {
        let _ = share_tx.send((accepted, reason.to_string()));
    }));

    session
        .connect_url(&format!("stratum+tcp://127.0.0.1:{}", pool.port))
        .unwrap();

    let work = work_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("work event");

    // Submit nonce 0x0000000000abcdef; start_nonce is 0
    let solution = Solution::new(0x00ab_cdef, [0u8; 32], 0);
    session.submit_solution(&solution, &work.job_id);

    let (accepted, reason) = share_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("share result");
    assert!(accepted, "share should be accepted: {}", reason);
    assert_eq!(session.accepted_shares(), 1);

    session.disconnect();
    let requests = pool.handle.join().unwrap();

    let submit = requests
        .iter()
        .find(|r| r["method"] == "mining.submit")
        .expect("submit request");
    let params = submit["params"].as_array().unwrap();
    assert_eq!(params[0], "wallet.rig");
    assert_eq!(params[1], "job-2");
    // extranonce2: nonce - start_nonce = 0xabcdef, little-endian, 4 bytes
    assert_eq!(params[2], "efcdab00");
    // nonce: big-endian, 16 hex chars, not zero-stripped
    assert_eq!(params[3], "0000000000abcdef");
}

#[test]
fn set_difficulty_then_notify_derives_target() {
    let pool = spawn_pool(|writer, reader, requests| {
        do_handshake(writer, reader, requests, "01020304", 4);

        send_line(
            writer,
            json!({
                "id": null,
                "method": "mining.set_difficulty",
                "params": [2.0]
            }),
        );
        // Compact notify without a target: session target applies
        let header_hex = "00".repeat(112);
        send_line(
            writer,
            json!({
                "id": null,
                "method": "mining.notify",
                "params": ["job-3", header_hex, "", 9, false]
            }),
        );

        let mut line = String::new();
        let _ = reader.read_line(&mut line);
    });

    let session = StratumSession::new();
    session.set_credentials("a.b", "x");

    let (work_tx, work_rx) = mpsc::channel::<WorkPackage>();
    session.set_work_callback(Box::new(move |work| {
        let _ = work_tx.send(work);
    }));

    session
        .connect_url(&format!("stratum+tcp://127.0.0.1:{}", pool.port))
        .unwrap();

    let work = work_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("work event");

    assert_eq!(work.target, tos_stratum::difficulty_to_target(2.0));
    assert_eq!(session.difficulty(), 2.0);

    session.disconnect();
    pool.handle.join().unwrap();
}

#[test]
fn oversized_line_disconnects_session() {
    let pool = spawn_pool(|writer, reader, requests| {
        do_handshake(writer, reader, requests, "01020304", 4);

        // 65537 bytes without a newline must kill the connection
        let garbage = vec![b'x'; tos_stratum::MAX_LINE_LENGTH + 1];
        let _ = writer.write_all(&garbage);
        let _ = writer.flush();

        // Wait for the client to drop the socket
        let mut line = String::new();
        let _ = reader.read_line(&mut line);
    });

    let session = StratumSession::new();
    session.set_credentials("a.b", "x");
    session.set_auto_reconnect(false);

    let (conn_tx, conn_rx) = mpsc::channel::<bool>();
    session.set_connection_callback(Box::new(move |connected| {
        let _ = conn_tx.send(connected);
    }));

    session
        .connect_url(&format!("stratum+tcp://127.0.0.1:{}", pool.port))
        .unwrap();

    // First event: connected; second: the line-cap disconnect
    assert_eq!(conn_rx.recv_timeout(Duration::from_secs(5)), Ok(true));
    assert_eq!(conn_rx.recv_timeout(Duration::from_secs(10)), Ok(false));
    assert!(session.last_error().contains("65536"));

    session.disconnect();
    pool.handle.join().unwrap();
}

#[test]
fn rejected_share_reported_with_reason() {
    let pool = spawn_pool(|writer, reader, requests| {
        do_handshake(writer, reader, requests, "00000000", 4);

        let header_hex = "00".repeat(112);
        send_line(
            writer,
            json!({
                "id": null,
                "method": "mining.notify",
                "params": ["job-4", header_hex, "", 1, true]
            }),
        );

        let submit = read_request(reader, requests);
        send_line(
            writer,
            json!({
                "id": submit["id"],
                "result": null,
                "error": [23, "Low difficulty share", null]
            }),
        );

        let mut line = String::new();
        let _ = reader.read_line(&mut line);
    });

    let session = StratumSession::new();
    session.set_credentials("w.r", "x");

    let (work_tx, work_rx) = mpsc::channel::<WorkPackage>();
    session.set_work_callback(Box::new(move |work| {
        let _ = work_tx.send(work);
    }));
    let (share_tx, share_rx) = mpsc::channel::<(bool, String)>();
    session.set_share_callback(Box::new(move |accepted, reason| {
        let _ = share_tx.send((accepted, reason.to_string()));
    }));

    session
        .connect_url(&format!("stratum+tcp://127.0.0.1:{}", pool.port))
        .unwrap();

    let work = work_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("work event");
    session.submit_solution(&Solution::new(1, [0u8; 32], 0), &work.job_id);

    let (accepted, reason) = share_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("share result");
    assert!(!accepted);
    assert_eq!(reason, "Low difficulty share");
    assert_eq!(session.rejected_shares(), 1);

    session.disconnect();
    pool.handle.join().unwrap();
}

#[test]
fn graceful_disconnect_reports_drained_requests() {
    let pool = spawn_pool(|writer, reader, requests| {
        do_handshake(writer, reader, requests, "00000000", 4);

        let header_hex = "00".repeat(112);
        send_line(
            writer,
            json!({
                "id": null,
                "method": "mining.notify",
                "params": ["job-5", header_hex, "", 1, true]
            }),
        );

        // Answer the submit after a short delay so it is pending when
        // graceful_disconnect starts polling
        let submit = read_request(reader, requests);
        thread::sleep(Duration::from_millis(300));
        send_line(
            writer,
            json!({"id": submit["id"], "result": true, "error": null}),
        );

        let mut line = String::new();
        let _ = reader.read_line(&mut line);
    });

    let session = StratumSession::new();
    session.set_credentials("w.r", "x");

    let (work_tx, work_rx) = mpsc::channel::<WorkPackage>();
    session.set_work_callback(Box::new(move |work| {
        let _ = work_tx.send(work);
    }));

    session
        .connect_url(&format!("stratum+tcp://127.0.0.1:{}", pool.port))
        .unwrap();

    let work = work_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("work event");
    session.submit_solution(&Solution::new(42, [0u8; 32], 0), &work.job_id);

    let completed = session.graceful_disconnect(5000);
    assert_eq!(completed, 1);
    assert_eq!(session.accepted_shares(), 1);

    pool.handle.join().unwrap();
}
