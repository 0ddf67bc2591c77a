//! Tcp0 end to end: listener and dialer on loopback
//!
//! Usage:
//!   cargo test --test tcp0_echo

use std::cell::RefCell;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use tickwire::{
    ConnectionMode, DialOptions, Dialer, EngineConfig, LinkState, Listener, Protocol, WorkHandler,
    WorkItem,
};

fn config() -> EngineConfig {
    EngineConfig::default()
        .with_max_connections(4)
        .with_max_works(16)
        .with_read_buffers(256, 8)
        .with_disconnect_grace(Duration::from_millis(300))
}

fn upper(item: &mut WorkItem<()>) {
    let body = item.payload().to_ascii_uppercase();
    item.reply(&body);
}

fn framed(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    tickwire::Tcp0::frame_into(payload, &mut out).unwrap();
    out
}

fn run_until<P, H, F>(listener: &mut Listener<P, H>, mut done: F)
where
    P: Protocol,
    H: WorkHandler<P::Message>,
    F: FnMut(&Listener<P, H>) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done(listener) {
        assert!(Instant::now() < deadline, "condition not reached in time");
        listener.run_once();
        thread::sleep(Duration::from_millis(1));
    }
}

/// Reads `len` bytes on a helper thread while the listener keeps ticking.
fn read_while_ticking<P, H>(listener: &mut Listener<P, H>, mut client: TcpStream, len: usize) -> Vec<u8>
where
    P: Protocol,
    H: WorkHandler<P::Message>,
{
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let reader = thread::spawn(move || {
        let mut buf = vec![0u8; len];
        client.read_exact(&mut buf).map(|_| buf)
    });
    run_until(listener, |_| reader.is_finished());
    reader.join().unwrap().unwrap()
}

#[test]
fn test_frame_is_echoed_uppercase() {
    let mut listener = Listener::tcp0("127.0.0.1:0", config(), upper).unwrap();

    let mut client = TcpStream::connect(listener.local_addr()).unwrap();
    run_until(&mut listener, |l| l.connections().len() == 1);

    client.write_all(&framed(b"hello")).unwrap();
    let reply = read_while_ticking(&mut listener, client, 9);

    assert_eq!(&reply[..4], &5i32.to_le_bytes());
    assert_eq!(&reply[4..], b"HELLO");
}

#[test]
fn test_chunked_frames_decode_the_same() {
    let mut listener = Listener::tcp0("127.0.0.1:0", config(), upper).unwrap();

    let mut client = TcpStream::connect(listener.local_addr()).unwrap();
    client.set_nodelay(true).unwrap();
    run_until(&mut listener, |l| l.connections().len() == 1);

    let mut wire = framed(b"first");
    wire.extend(framed(b""));
    wire.extend(framed(b"third one"));

    // Three bytes at a time, ticking in between
    for piece in wire.chunks(3) {
        client.write_all(piece).unwrap();
        listener.run_once();
        thread::sleep(Duration::from_millis(1));
    }

    let mut expected = framed(b"FIRST");
    expected.extend(framed(b""));
    expected.extend(framed(b"THIRD ONE"));
    let reply = read_while_ticking(&mut listener, client, expected.len());
    assert_eq!(reply, expected);
}

#[test]
fn test_invalid_prefix_closes_connection() {
    let mut listener = Listener::tcp0("127.0.0.1:0", config(), upper).unwrap();

    let mut client = TcpStream::connect(listener.local_addr()).unwrap();
    run_until(&mut listener, |l| l.connections().len() == 1);
    let id = listener.connections()[0];

    client.write_all(&(-1i32).to_le_bytes()).unwrap();
    run_until(&mut listener, |l| l.link_state(id) != Some(LinkState::Connected));
    assert_eq!(listener.link_state(id), Some(LinkState::Disconnect));

    run_until(&mut listener, |l| l.connections().is_empty());
}

#[test]
fn test_disconnect_waits_out_grace() {
    let mut listener = Listener::tcp0("127.0.0.1:0", config(), upper).unwrap();

    let _client = TcpStream::connect(listener.local_addr()).unwrap();
    run_until(&mut listener, |l| l.connections().len() == 1);
    let id = listener.connections()[0];

    let requested = Instant::now();
    listener.disconnect(id).unwrap();
    assert_eq!(listener.link_state(id), Some(LinkState::Disconnect));

    listener.run_once();
    assert_eq!(listener.connections(), &[id]);

    run_until(&mut listener, |l| l.connections().is_empty());
    assert!(requested.elapsed() >= Duration::from_millis(300));
    assert_eq!(listener.link_state(id), Some(LinkState::Unused));
}

#[test]
fn test_peer_close_holds_slot_for_grace() {
    let mut listener = Listener::tcp0("127.0.0.1:0", config(), upper).unwrap();
    let released = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&released);
    listener.on_disconnected(move |id| sink.borrow_mut().push(id));

    let client = TcpStream::connect(listener.local_addr()).unwrap();
    run_until(&mut listener, |l| l.connections().len() == 1);
    let id = listener.connections()[0];

    let closed = Instant::now();
    drop(client);
    run_until(&mut listener, |l| l.link_state(id) == Some(LinkState::Disconnect));

    // Still listed and not yet reported while the grace runs
    assert_eq!(listener.connections(), &[id]);
    assert!(released.borrow().is_empty());
    listener.run_once();
    if closed.elapsed() < Duration::from_millis(250) {
        assert_eq!(listener.connections(), &[id]);
    }

    run_until(&mut listener, |l| l.connections().is_empty());
    assert!(closed.elapsed() >= Duration::from_millis(300));
    assert_eq!(listener.link_state(id), Some(LinkState::Unused));
    assert_eq!(&*released.borrow(), &[id]);
}

#[test]
fn test_dialer_talks_to_listener() {
    let mut listener = Listener::tcp0("127.0.0.1:0", config(), upper).unwrap();

    let replies = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&replies);
    let collect = move |item: &mut WorkItem<()>| {
        sink.borrow_mut().push(item.payload().to_vec());
        item.finish();
    };
    let mut dialer = Dialer::tcp0(config(), collect).unwrap();

    let conn = dialer
        .dial(listener.local_addr(), ConnectionMode::Close, DialOptions::new())
        .unwrap();
    dialer.write(conn, b"abc").unwrap();
    dialer.write(conn, b"xyz").unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while replies.borrow().len() < 2 {
        assert!(Instant::now() < deadline, "replies not received");
        listener.run_once();
        dialer.run_once();
        thread::sleep(Duration::from_millis(1));
    }

    assert_eq!(&*replies.borrow(), &[b"ABC".to_vec(), b"XYZ".to_vec()]);
    assert_eq!(dialer.link_state(conn), Some(LinkState::Connected));
}
