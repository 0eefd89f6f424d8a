//! TCP bridge transport against a local listener

use aldl_core::definition::DEFAULT_REQUEST_COMMAND;
use aldl_core::protocol::{Connection, OpenOptions, TcpProvider, TransportError};
use pretty_assertions::assert_eq;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

fn provider(addr: String) -> TcpProvider {
    TcpProvider {
        addr,
        read_timeout: Duration::from_millis(100),
        buf_len: 64,
    }
}

#[test]
fn test_exchange_over_tcp_bridge() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let bridge = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut request = [0u8; 5];
        stream.read_exact(&mut request).unwrap();
        stream.write_all(&[0x20, 0x5A]).unwrap();
        // Second request goes unanswered
        stream.read_exact(&mut request).unwrap();
        // Hold the link open past the client's read timeout
        thread::sleep(Duration::from_millis(300));
        request
    });

    let mut conn = Connection::new();
    conn.open(&mut provider(addr), OpenOptions::default()).unwrap();

    assert_eq!(conn.exchange(&DEFAULT_REQUEST_COMMAND).unwrap(), vec![0x20, 0x5A]);
    // Read timeout yields an empty packet rather than blocking
    assert_eq!(conn.exchange(&DEFAULT_REQUEST_COMMAND).unwrap(), Vec::<u8>::new());

    assert_eq!(bridge.join().unwrap(), DEFAULT_REQUEST_COMMAND);
    conn.close();
}

#[test]
fn test_bridge_hangup_is_bus_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let bridge = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        drop(stream);
    });

    let mut conn = Connection::new();
    conn.open(&mut provider(addr), OpenOptions::default()).unwrap();
    bridge.join().unwrap();

    assert!(matches!(
        conn.exchange(&DEFAULT_REQUEST_COMMAND),
        Err(TransportError::BusError(_))
    ));
}

#[test]
fn test_refused_bridge_is_link_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let mut conn = Connection::new();
    assert!(matches!(
        conn.open(&mut provider(addr), OpenOptions::default()),
        Err(TransportError::LinkRefused(_))
    ));
    assert!(!conn.is_open());
}
