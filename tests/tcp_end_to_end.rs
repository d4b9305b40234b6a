//! Connection manager over real TCP sockets

mod common;

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use common::{assert_quiet, next_event};
use rose_link::connection::EventReceiver;
use rose_link::{ConnectionManager, ConnectionState, Event, ManagerConfig, TcpTransport};

fn tcp_manager() -> (Arc<TcpTransport>, Arc<ConnectionManager>, EventReceiver) {
    let transport = Arc::new(TcpTransport::new(
        "127.0.0.1:0".parse().unwrap(),
        Duration::from_secs(2),
    ));
    let (manager, rx) = ConnectionManager::new(transport.clone(), ManagerConfig::default());
    (transport, manager, rx)
}

async fn read_at_least(rx: &mut EventReceiver, len: usize) -> Vec<u8> {
    let mut received = Vec::new();
    while received.len() < len {
        match next_event(rx).await {
            Event::DataReceived(chunk) => received.extend_from_slice(&chunk),
            other => panic!("unexpected event: {other:?}"),
        }
    }
    received
}

#[tokio::test]
async fn test_tcp_session_lifecycle() {
    let (transport, manager, mut rx) = tcp_manager();

    manager.start();
    assert_eq!(
        next_event(&mut rx).await,
        Event::StateChanged(ConnectionState::Listening)
    );
    let addr = transport.bound_addr().expect("listener bound");

    let mut client = TcpStream::connect(addr).unwrap();
    assert_eq!(
        next_event(&mut rx).await,
        Event::StateChanged(ConnectionState::Connected)
    );

    client.write_all(b"hello").unwrap();
    assert_eq!(read_at_least(&mut rx, 5).await, b"hello");

    assert!(manager.write(b"petal"));
    assert_eq!(
        next_event(&mut rx).await,
        Event::DataSent(bytes::Bytes::from_static(b"petal"))
    );
    let mut reply = [0u8; 5];
    client.read_exact(&mut reply).unwrap();
    assert_eq!(&reply, b"petal");

    // Peer loss re-arms listening on a fresh endpoint
    drop(client);
    assert_eq!(next_event(&mut rx).await, Event::ConnectionFailed);
    assert_eq!(
        next_event(&mut rx).await,
        Event::StateChanged(ConnectionState::Listening)
    );

    // state() waits for the re-listen to finish binding
    assert_eq!(manager.state(), ConnectionState::Listening);
    let addr = transport.bound_addr().expect("listener re-bound");

    let mut client = TcpStream::connect(addr).unwrap();
    assert_eq!(
        next_event(&mut rx).await,
        Event::StateChanged(ConnectionState::Connected)
    );

    manager.stop();
    assert_eq!(
        next_event(&mut rx).await,
        Event::StateChanged(ConnectionState::None)
    );

    let mut buf = [0u8; 8];
    assert_eq!(client.read(&mut buf).unwrap_or(0), 0);
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn test_tcp_dial_between_managers() {
    let (listen_transport, listener, mut listen_rx) = tcp_manager();
    listener.start();
    next_event(&mut listen_rx).await;
    let addr = listen_transport.bound_addr().expect("listener bound");

    let (_dial_transport, dialer, mut dial_rx) = tcp_manager();
    dialer.connect(&addr.to_string());
    assert_eq!(
        next_event(&mut dial_rx).await,
        Event::StateChanged(ConnectionState::Connecting)
    );
    assert_eq!(
        next_event(&mut dial_rx).await,
        Event::StateChanged(ConnectionState::Connected)
    );
    assert_eq!(
        next_event(&mut listen_rx).await,
        Event::StateChanged(ConnectionState::Connected)
    );

    assert!(dialer.write(b"bloom"));
    assert_eq!(dial_rx.recv().await.and_then(|e| e.byte_count()), Some(5));
    assert_eq!(read_at_least(&mut listen_rx, 5).await, b"bloom");

    // The dialer going away is peer loss for the listener
    dialer.stop();
    assert_eq!(next_event(&mut listen_rx).await, Event::ConnectionFailed);
    assert_eq!(
        next_event(&mut listen_rx).await,
        Event::StateChanged(ConnectionState::Listening)
    );
}
