use std::io::Read;
use std::net::TcpListener;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use linkprims_frame::BinaryMessage;
use linkprims_link::{BinaryProtocol, ConnectOptions, Link, LinkConfig, TextProtocol};
use linkprims_transport::{Role, TcpOpener};

fn config() -> LinkConfig {
    LinkConfig::default()
        .with_retry_interval(Duration::from_millis(50))
        .with_missed_heartbeat_limit(Some(50))
        .with_timeout_period(Duration::from_secs(5))
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

fn text_server(config: LinkConfig) -> (Link<TextProtocol>, String) {
    let mut opener = TcpOpener::new("127.0.0.1:0", Role::Server);
    let addr = opener.listen().expect("listener should bind").to_string();
    (Link::new(TextProtocol::default(), opener, config), addr)
}

fn collect(link: &Link<TextProtocol>, want: usize) -> Vec<Bytes> {
    let mut got = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while got.len() < want && Instant::now() < deadline {
        got.extend(link.receive_wait(want - got.len(), Duration::from_millis(100)));
    }
    got
}

#[test]
fn text_messages_flow_both_ways() {
    let (server, addr) = text_server(config());
    server
        .connect(ConnectOptions::default().auto_reconnect(true))
        .expect("server should start");

    let client = Link::tcp(addr, Role::Client, config());
    client
        .connect(ConnectOptions::default().blocking(true))
        .expect("client should connect");
    assert!(wait_until(Duration::from_secs(5), || server.is_connected()));

    client.send("hello").unwrap();
    client.send("second message").unwrap();
    assert_eq!(
        collect(&server, 2),
        vec![
            Bytes::from_static(b"hello"),
            Bytes::from_static(b"second message")
        ]
    );

    server.send("world").unwrap();
    assert_eq!(collect(&client, 1), vec![Bytes::from_static(b"world")]);

    // Idle heartbeats flow but are never delivered.
    assert!(wait_until(Duration::from_secs(5), || {
        client.stats().heartbeats_in > 3 && server.stats().heartbeats_in > 3
    }));
    assert!(client.receive_all().is_empty());
    assert!(server.receive_all().is_empty());

    client.disconnect().unwrap();
    server.disconnect().unwrap();
    assert!(!client.is_connected());
    assert!(!server.is_connected());
}

#[test]
fn server_flushes_queue_to_reconnecting_client() {
    let server_config = config().with_missed_heartbeat_limit(Some(5));
    let (server, addr) = text_server(server_config);
    server
        .connect(ConnectOptions::default().auto_reconnect(true))
        .unwrap();

    let first = Link::tcp(addr.clone(), Role::Client, config());
    first
        .connect(ConnectOptions::default().blocking(true))
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || server.is_connected()));

    first.disconnect().unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || !server.is_connected()),
        "server should notice the dropped client"
    );

    for message in ["a", "b", "c"] {
        server.send(message).unwrap();
    }

    let second = Link::tcp(addr, Role::Client, config());
    second
        .connect(ConnectOptions::default().blocking(true))
        .unwrap();
    assert_eq!(
        collect(&second, 3),
        vec![
            Bytes::from_static(b"a"),
            Bytes::from_static(b"b"),
            Bytes::from_static(b"c")
        ]
    );
    assert!(server.stats().connects >= 2);
}

#[test]
fn silent_peer_times_out() {
    // A peer that accepts and then never writes a byte.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut sink = [0u8; 256];
        // Drain heartbeats until the link closes the socket.
        while matches!(stream.read(&mut sink), Ok(n) if n > 0) {}
    });

    let config = LinkConfig::default()
        .with_timeout_period(Duration::from_millis(200))
        .with_missed_heartbeat_limit(None);
    let client = Link::tcp(addr, Role::Client, config);
    client
        .connect(ConnectOptions::default().blocking(true))
        .unwrap();
    assert!(client.is_connected());

    assert!(wait_until(Duration::from_secs(5), || !client.is_connected()));
    client.disconnect().unwrap();
    peer.join().expect("peer thread should finish");
}

#[test]
fn missed_heartbeats_close_half_open_link() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut sink = [0u8; 256];
        while matches!(stream.read(&mut sink), Ok(n) if n > 0) {}
    });

    let config = LinkConfig::default()
        .with_timeout_period(Duration::from_secs(60))
        .with_missed_heartbeat_limit(Some(3))
        .with_connect_grace(0);
    let client = Link::tcp(addr, Role::Client, config);
    client
        .connect(ConnectOptions::default().blocking(true))
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || !client.is_connected()));
    assert_eq!(client.stats().disconnects, 1);
    drop(client);
    peer.join().expect("peer thread should finish");
}

#[test]
fn one_shot_client_without_server_reports_failure() {
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let client = Link::tcp(
        format!("127.0.0.1:{port}"),
        Role::Client,
        LinkConfig::default().with_connect_timeout(Duration::from_millis(200)),
    );
    let err = client
        .connect(ConnectOptions::default().blocking(true))
        .unwrap_err();
    assert!(matches!(err, linkprims_link::LinkError::ConnectFailed(_)));
    assert!(!client.is_connected());
    assert_eq!(client.stats().connect_failures, 1);
}

#[test]
fn binary_frames_over_loopback() {
    let spacing = Duration::from_micros(100);
    let config = LinkConfig::default().with_timeout_period(Duration::from_secs(5));

    let mut opener = TcpOpener::new("127.0.0.1:0", Role::Server);
    let addr = opener.listen().unwrap().to_string();
    let server = Link::new(BinaryProtocol::new(spacing), opener, config.clone());
    server.connect(ConnectOptions::default()).unwrap();

    let client = Link::new(
        BinaryProtocol::new(spacing),
        TcpOpener::new(addr, Role::Client),
        config,
    );
    client
        .connect(ConnectOptions::default().blocking(true))
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || server.is_connected()));
    // Let both decoders see a quiet line before traffic starts.
    thread::sleep(Duration::from_millis(50));

    let sent = BinaryMessage::new(0xCAFE, vec![1.0, f32::MIN_POSITIVE, -0.0, 1e9]).unwrap();
    client.send(sent.clone()).unwrap();
    let got = server.receive_wait(1, Duration::from_secs(5));
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].header(), 0xCAFE);
    let bits: Vec<u32> = got[0].floats().iter().map(|f| f.to_bits()).collect();
    let expected: Vec<u32> = sent.floats().iter().map(|f| f.to_bits()).collect();
    assert_eq!(bits, expected);
    assert_eq!(server.stats().corrupt_frames, 0);
}
