use std::io::{Read, Write};
use std::net::UdpSocket;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use streamux::{dial, dial_udp_with, listen, Config, Conn, Connection, Error, Listener};

fn fast_cfg() -> Config {
    // Heartbeats every 50ms, dead after 250ms: enough margin that scheduler
    // jitter cannot produce a false disconnect on loopback.
    Config {
        heartbeat: Duration::from_millis(50),
        dead: Duration::from_millis(250),
        ..Config::default()
    }
}

fn pause(ms: u64) {
    thread::sleep(Duration::from_millis(ms));
}

#[test]
fn udp_round_trip_then_dead_peer() {
    let listener = Listener::bind_with("127.0.0.1:0", fast_cfg()).unwrap();
    let addr = listener.local_addr().unwrap();

    let client = dial_udp_with(addr, fast_cfg()).unwrap();
    client.write(b"hello").unwrap();

    let server = listener.accept().unwrap();
    let mut buf = [0u8; 5];
    let n = server.read(&mut buf).unwrap();
    assert_eq!(n, 5);
    assert_eq!(&buf, b"hello");

    // The reverse direction goes out on the shared listening socket.
    server.write(b"world").unwrap();
    let mut buf = [0u8; 5];
    let n = client.read(&mut buf).unwrap();
    assert_eq!(n, 5);
    assert_eq!(&buf, b"world");

    // Stop all traffic from the client, heartbeats included.
    client.close();
    pause(400);

    let mut buf = [0u8; 1];
    assert!(matches!(server.read(&mut buf), Err(Error::Disconnected)));
    assert_eq!(listener.peers(), 0);
}

#[test]
fn heartbeats_prevent_false_disconnect() {
    let listener = Listener::bind_with("127.0.0.1:0", fast_cfg()).unwrap();
    let addr = listener.local_addr().unwrap();

    // The client never writes a payload byte; only heartbeats flow.
    let client = dial_udp_with(addr, fast_cfg()).unwrap();
    let server = listener.accept().unwrap();

    // Well past the dead interval in wall time, liveness must hold.
    for _ in 0..3 {
        let mut buf = [0u8; 4];
        match server.read(&mut buf) {
            Ok(0) => {}
            other => panic!("expected transient stall, got {other:?}"),
        }
    }
    client.close();
}

#[test]
fn two_peers_demultiplex_independently() {
    let listener = Listener::bind_with("127.0.0.1:0", fast_cfg()).unwrap();
    let addr = listener.local_addr().unwrap();

    let one = dial_udp_with(addr, fast_cfg()).unwrap();
    let two = dial_udp_with(addr, fast_cfg()).unwrap();

    for _ in 0..2 {
        one.write(b"aaaa").unwrap();
        two.write(b"bbbb").unwrap();
    }

    let first = listener.accept().unwrap();
    let second = listener.accept().unwrap();
    assert_ne!(
        first.remote_addr().unwrap(),
        second.remote_addr().unwrap()
    );

    // The dialers bind the unspecified address, so match peers by port.
    let one_port = one.local_addr().unwrap().port();
    for conn in [&first, &second] {
        let mut buf = [0u8; 8];
        let n = conn.read(&mut buf).unwrap();
        assert_eq!(n, 8);
        let expected: &[u8] = if conn.remote_addr().unwrap().port() == one_port {
            b"aaaaaaaa"
        } else {
            b"bbbbbbbb"
        };
        assert_eq!(&buf[..], expected);
    }
}

#[test]
fn concurrent_datagrams_yield_single_accept() {
    let listener = Arc::new(Listener::bind_with("127.0.0.1:0", fast_cfg()).unwrap());
    let addr = listener.local_addr().unwrap();

    let raw = UdpSocket::bind("127.0.0.1:0").unwrap();
    for _ in 0..5 {
        raw.send_to(b"x", addr).unwrap();
    }

    let conn = listener.accept().unwrap();
    let mut buf = [0u8; 5];
    let n = conn.read(&mut buf).unwrap();
    assert_eq!(n, 5);
    assert_eq!(&buf, b"xxxxx");

    // No further accept event for the same address.
    let (tx, rx) = mpsc::channel();
    thread::spawn({
        let listener = listener.clone();
        move || {
            let _ = tx.send(listener.accept().is_ok());
        }
    });
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    listener.close();
}

#[test]
fn overflow_drops_whole_datagram() {
    let cfg = Config {
        heartbeat: Duration::from_millis(100),
        dead: Duration::from_secs(5),
        queue_capacity: 8,
        ..Config::default()
    };
    let listener = Listener::bind_with("127.0.0.1:0", cfg).unwrap();
    let addr = listener.local_addr().unwrap();

    let raw = UdpSocket::bind("127.0.0.1:0").unwrap();
    raw.send_to(b"12345678", addr).unwrap();
    pause(50);
    // Queue is full; this one must be rejected wholesale, not truncated,
    // even though it would fit an empty queue.
    raw.send_to(b"ABCD", addr).unwrap();
    pause(50);

    let conn = listener.accept().unwrap();
    let mut buf = [0u8; 8];
    let n = conn.read(&mut buf).unwrap();
    assert_eq!(n, 8);
    assert_eq!(&buf, b"12345678");

    // Subsequent traffic is intact after the drop.
    raw.send_to(b"ok", addr).unwrap();
    let mut buf = [0u8; 2];
    let n = conn.read(&mut buf).unwrap();
    assert_eq!(n, 2);
    assert_eq!(&buf, b"ok");
}

#[test]
fn short_read_is_success_not_failure() {
    let listener = Listener::bind_with("127.0.0.1:0", fast_cfg()).unwrap();
    let addr = listener.local_addr().unwrap();

    let client = dial_udp_with(addr, fast_cfg()).unwrap();
    client.write(b"abc").unwrap();

    let server = listener.accept().unwrap();
    let mut buf = [0u8; 16];
    let n = server.read(&mut buf).unwrap();
    assert_eq!(n, 3);
    assert_eq!(&buf[..3], b"abc");
}

#[test]
fn bytes_arrive_in_write_order_across_chunked_reads() {
    let listener = Listener::bind_with("127.0.0.1:0", fast_cfg()).unwrap();
    let addr = listener.local_addr().unwrap();

    let client = dial_udp_with(addr, fast_cfg()).unwrap();
    for chunk in [&b"abc"[..], b"def", b"ghi"] {
        client.write(chunk).unwrap();
    }
    pause(50);

    let server = listener.accept().unwrap();
    let mut collected = Vec::new();
    while collected.len() < 9 {
        let mut buf = [0u8; 2];
        match server.read(&mut buf).unwrap() {
            0 => continue,
            n => collected.extend_from_slice(&buf[..n]),
        }
    }
    assert_eq!(&collected, b"abcdefghi");
}

#[test]
fn dialed_conn_detects_silent_remote() {
    // The remote is a bare socket that never sends anything back.
    let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
    let addr = silent.local_addr().unwrap();

    let conn = dial_udp_with(addr, fast_cfg()).unwrap();
    pause(300);

    let mut buf = [0u8; 4];
    assert!(matches!(conn.read(&mut buf), Err(Error::Disconnected)));

    // Terminal: later reads fail immediately, no dead-interval wait.
    let start = Instant::now();
    assert!(matches!(conn.read(&mut buf), Err(Error::Disconnected)));
    assert!(start.elapsed() < Duration::from_millis(100));
}

#[test]
fn evicted_peer_is_accepted_as_brand_new() {
    let listener = Listener::bind_with("127.0.0.1:0", fast_cfg()).unwrap();
    let addr = listener.local_addr().unwrap();

    let raw = UdpSocket::bind("127.0.0.1:0").unwrap();
    raw.send_to(b"a", addr).unwrap();

    let first = listener.accept().unwrap();
    let mut buf = [0u8; 1];
    assert_eq!(first.read(&mut buf).unwrap(), 1);
    assert_eq!(&buf, b"a");

    pause(300);
    assert!(matches!(first.read(&mut buf), Err(Error::Disconnected)));
    assert_eq!(listener.peers(), 0);

    // Same source address, fresh lifetime: a second accept event fires.
    raw.send_to(b"b", addr).unwrap();
    let second = listener.accept().unwrap();
    assert_eq!(second.read(&mut buf).unwrap(), 1);
    assert_eq!(&buf, b"b");
}

#[test]
fn dropped_conn_releases_its_registry_entry() {
    let listener = Listener::bind_with("127.0.0.1:0", fast_cfg()).unwrap();
    let addr = listener.local_addr().unwrap();

    let raw = UdpSocket::bind("127.0.0.1:0").unwrap();
    raw.send_to(b"x", addr).unwrap();

    let conn = listener.accept().unwrap();
    assert_eq!(listener.peers(), 1);

    // No explicit close: drop alone must evict the peer, or the registry
    // would grow without bound under accept-then-drop churn.
    drop(conn);
    assert_eq!(listener.peers(), 0);
}

#[test]
fn io_read_adapter_blocks_through_stalls() {
    let listener = Listener::bind_with("127.0.0.1:0", fast_cfg()).unwrap();
    let addr = listener.local_addr().unwrap();

    let client = dial_udp_with(addr, fast_cfg()).unwrap();
    let mut server: Conn = listener.accept().unwrap();

    // Delay the payload past several transient stalls; the io::Read adapter
    // must keep blocking rather than reporting EOF.
    let writer = thread::spawn(move || {
        pause(300);
        client.write(b"late").unwrap();
        client
    });

    let mut buf = [0u8; 4];
    server.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"late");

    let client = writer.join().unwrap();
    client.close();
    // After the client goes silent past the dead interval, the adapter
    // reports a clean end of stream.
    pause(400);
    let mut buf = [0u8; 4];
    assert_eq!(Read::read(&mut server, &mut buf).unwrap(), 0);
}

#[test]
fn generic_entry_points_udp() {
    let listener = listen("udp", "127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let mut client = dial("udp", &addr.to_string()).unwrap();
    client.write_all(b"ping").unwrap();

    let mut server = listener.accept().unwrap();
    let mut buf = [0u8; 4];
    server.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"ping");

    server.write_all(b"pong").unwrap();
    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"pong");

    // Deadline setters are accepted no-ops on packet connections.
    client.set_deadline(Some(Duration::from_millis(1))).unwrap();
    client.set_read_deadline(None).unwrap();
    client.set_write_deadline(None).unwrap();
    client.write_all(b"more").unwrap();

    client.close().unwrap();
    assert!(client.write_all(b"x").is_err());
}

#[test]
fn generic_entry_points_tcp_passthrough() {
    let listener = listen("tcp", "127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let mut client = dial("tcp", &addr.to_string()).unwrap();
    let mut server = listener.accept().unwrap();

    client.write_all(b"over tcp").unwrap();
    let mut buf = [0u8; 8];
    server.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"over tcp");
    assert_eq!(server.remote_addr().unwrap(), client.local_addr().unwrap());
}
