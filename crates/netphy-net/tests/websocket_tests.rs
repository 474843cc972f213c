//! Scenarios over real WebSocket connections on loopback.
//!
//! Servers bind port 0 and every wait is bounded by `POLL_TIMEOUT`.

use futures_util::{SinkExt, StreamExt};
use netphy_net::protocol::DEFAULT_PASSWORD;
use netphy_net::transport::ListenOptions;
use netphy_net::*;
use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

const POLL_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const DRAIN: Duration = Duration::from_millis(300);

fn listen_options(addr: &str) -> ListenOptions {
    ListenOptions {
        addr: addr.parse().unwrap(),
        password: DEFAULT_PASSWORD.to_string(),
        max_connections: 4,
        banned: Vec::new(),
    }
}

/// Tick the server and the clients until `done` holds or time runs out
fn poll_until<F>(
    server: &mut ServerSession,
    clients: &mut [&mut ClientSession],
    log: &mut Vec<SessionEvent>,
    mut done: F,
) -> bool
where
    F: FnMut(&ServerSession, &[&mut ClientSession], &[SessionEvent]) -> bool,
{
    let deadline = Instant::now() + POLL_TIMEOUT;
    while Instant::now() < deadline {
        log.extend(server.update());
        for client in clients.iter_mut() {
            log.extend(client.update());
        }
        if done(server, clients, log) {
            return true;
        }
        thread::sleep(POLL_INTERVAL);
    }
    false
}

fn start_server() -> (ServerSession, SocketAddr) {
    let mut server = ServerSession::new();
    let addr = server
        .start(&WebSocketNetwork::new(), &listen_options("127.0.0.1:0"))
        .unwrap();
    assert_ne!(addr.port(), 0);
    (server, addr)
}

fn connect(addr: SocketAddr, password: &str) -> ClientSession {
    let mut client = ClientSession::new();
    client.connect(&WebSocketNetwork::new(), addr, password).unwrap();
    client
}

#[test]
fn test_client_connects_with_password() {
    let (mut server, addr) = start_server();
    let mut client = connect(addr, DEFAULT_PASSWORD);
    let mut log = Vec::new();

    let connected = poll_until(&mut server, &mut [&mut client], &mut log, |server, clients, _| {
        clients[0].state() == ClientState::Connected && server.peers().len() == 1
    });
    assert!(connected, "client never connected: {log:?}");
    assert_eq!(server.state(), ServerState::Running);

    client.disconnect(DRAIN);
    server.shutdown(DRAIN);
}

#[test]
fn test_wrong_password_leaves_client_idle() {
    let (mut server, addr) = start_server();
    let mut client = connect(addr, "not the password");
    let mut log = Vec::new();

    let refused = poll_until(&mut server, &mut [&mut client], &mut log, |_, clients, _| {
        clients[0].state() == ClientState::Idle
    });
    assert!(refused, "client was never refused: {log:?}");
    assert_eq!(
        client.last_error(),
        Some(ConnectError::Refused(Notice::InvalidPassword))
    );
    assert!(server.peers().is_empty());
    server.shutdown(DRAIN);
}

#[test]
fn test_nobody_listening() {
    // Bind and release a port so nothing is listening on it
    let (mut server, addr) = start_server();
    server.shutdown(DRAIN);

    let mut client = connect(addr, DEFAULT_PASSWORD);
    let deadline = Instant::now() + POLL_TIMEOUT * 2;
    while client.state() != ClientState::Idle && Instant::now() < deadline {
        client.update();
        thread::sleep(POLL_INTERVAL);
    }
    assert_eq!(
        client.last_error(),
        Some(ConnectError::Refused(Notice::ConnectionAttemptFailed))
    );
}

#[test]
fn test_relay_and_start_game() {
    let (mut server, addr) = start_server();
    let mut alice = connect(addr, DEFAULT_PASSWORD);
    let mut bob = connect(addr, DEFAULT_PASSWORD);
    let mut log = Vec::new();

    assert!(poll_until(
        &mut server,
        &mut [&mut alice, &mut bob],
        &mut log,
        |server, clients, _| {
            clients.iter().all(|c| c.state() == ClientState::Connected) && server.peers().len() == 2
        }
    ));

    alice.send_text("gg").unwrap();
    server.broadcast_start_game().unwrap();
    log.clear();

    let delivered = poll_until(&mut server, &mut [&mut alice, &mut bob], &mut log, |_, _, log| {
        let relayed = log
            .iter()
            .filter(|e| matches!(e, SessionEvent::Text { text, .. } if text.ends_with(": gg")))
            .count();
        let starts = log
            .iter()
            .filter(|e| matches!(e, SessionEvent::StartGame { .. }))
            .count();
        // One relay seen by the server and one by bob; a start for each client
        relayed == 2 && starts == 2
    });
    assert!(delivered, "messages missing: {log:?}");

    alice.disconnect(DRAIN);
    bob.disconnect(DRAIN);
    server.shutdown(DRAIN);
}

#[test]
fn test_server_shutdown_releases_port_for_rebind() {
    let (mut server, addr) = start_server();
    let mut client = connect(addr, DEFAULT_PASSWORD);
    let mut log = Vec::new();
    assert!(poll_until(&mut server, &mut [&mut client], &mut log, |server, _, _| {
        server.peers().len() == 1
    }));

    // Leaving with a client still attached must not fail
    server.shutdown(DRAIN);
    assert_eq!(server.state(), ServerState::Idle);

    let deadline = Instant::now() + POLL_TIMEOUT;
    while client.state() != ClientState::Idle && Instant::now() < deadline {
        client.update();
        thread::sleep(POLL_INTERVAL);
    }
    assert!(matches!(client.last_error(), Some(ConnectError::Dropped(_))));

    let mut again = ServerSession::new();
    let rebound = again
        .start(&WebSocketNetwork::new(), &listen_options(&addr.to_string()))
        .unwrap();
    assert_eq!(rebound, addr);
    again.shutdown(DRAIN);
}

#[test]
fn test_version_refusal_leaves_client_idle() {
    // A server speaking another protocol version
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let listener = runtime.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
    let addr = listener.local_addr().unwrap();
    runtime.spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let _ = ws.next().await;
        let refusal = Message::Notice(Notice::IncompatibleProtocolVersion)
            .encode()
            .unwrap();
        ws.send(WsMessage::Binary(refusal)).await.unwrap();
        let _ = ws.send(WsMessage::Close(None)).await;
    });

    let mut client = connect(addr, DEFAULT_PASSWORD);
    let deadline = Instant::now() + POLL_TIMEOUT;
    while client.state() != ClientState::Idle && Instant::now() < deadline {
        client.update();
        thread::sleep(POLL_INTERVAL);
    }
    assert_eq!(client.state(), ClientState::Idle);
    assert_eq!(
        client.last_error(),
        Some(ConnectError::Refused(Notice::IncompatibleProtocolVersion))
    );
}
