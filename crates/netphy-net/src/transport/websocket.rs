//! WebSocket transport over TCP.
//!
//! Each transport owns a small tokio runtime. Connection tasks push inbound
//! packets into an unbounded channel which the game thread drains with
//! `try_recv`, so [`Transport::receive`] never blocks. Every peer has a
//! writer task fed by its own outbound channel; messages to one peer are
//! therefore delivered in send order.

use super::{
    notice_frame, Delivery, Destination, ListenOptions, Network, Packet, PeerId, Transport,
    TransportError,
};
use crate::protocol::{Message, Notice, PROTOCOL_VERSION};
use dashmap::DashMap;
use futures_util::future::join_all;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{accept_async, connect_async};
use tracing::{debug, error, info, warn};

/// Longest wait for the opening handshake frames
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Factory for WebSocket transports
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketNetwork;

impl WebSocketNetwork {
    pub fn new() -> Self {
        Self
    }
}

impl Network for WebSocketNetwork {
    fn open(&self) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(WebSocketTransport::new()?))
    }
}

enum Outbound {
    Data(Vec<u8>),
    Close,
}

/// Connection to one remote endpoint
struct PeerLink {
    addr: SocketAddr,
    outbound: mpsc::UnboundedSender<Outbound>,
    writer: JoinHandle<()>,
}

/// State shared between the game thread and connection tasks
struct Shared {
    peers: DashMap<PeerId, PeerLink>,
    inbound: mpsc::UnboundedSender<Packet>,
}

impl Shared {
    fn deliver(&self, peer: PeerId, addr: SocketAddr, data: Vec<u8>) {
        let _ = self.inbound.send(Packet { peer, addr, data });
    }

    fn send_to_all_except(&self, except: PeerId, data: &[u8]) {
        for link in self.peers.iter().filter(|l| *l.key() != except) {
            let _ = link.outbound.send(Outbound::Data(data.to_vec()));
        }
    }
}

/// Server-side admission rules
struct Gate {
    password: String,
    max_connections: usize,
    banned: Vec<std::net::IpAddr>,
    slots: AtomicUsize,
}

impl Gate {
    fn reserve(&self) -> bool {
        self.slots
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < self.max_connections).then_some(used + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        let _ = self
            .slots
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| used.checked_sub(1));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Unbound,
    Server,
    Client(SocketAddr),
    Closed,
}

pub struct WebSocketTransport {
    runtime: Option<Runtime>,
    shared: Arc<Shared>,
    inbound: mpsc::UnboundedReceiver<Packet>,
    acceptor: Option<JoinHandle<()>>,
    role: Role,
}

impl WebSocketTransport {
    pub fn new() -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("netphy-net")
            .enable_all()
            .build()
            .map_err(TransportError::Runtime)?;
        let (tx, rx) = mpsc::unbounded_channel();

        Ok(Self {
            runtime: Some(runtime),
            shared: Arc::new(Shared {
                peers: DashMap::new(),
                inbound: tx,
            }),
            inbound: rx,
            acceptor: None,
            role: Role::Unbound,
        })
    }

    fn runtime(&self) -> Result<&Runtime, TransportError> {
        self.runtime.as_ref().ok_or(TransportError::Closed)
    }
}

impl Transport for WebSocketTransport {
    fn listen(&mut self, options: &ListenOptions) -> Result<SocketAddr, TransportError> {
        match self.role {
            Role::Unbound => {}
            Role::Closed => return Err(TransportError::Closed),
            Role::Server => return Err(TransportError::AlreadyActive("listening")),
            Role::Client(_) => return Err(TransportError::AlreadyActive("connected")),
        }

        let runtime = self.runtime()?;
        let listener = runtime
            .block_on(TcpListener::bind(options.addr))
            .map_err(|source| TransportError::Bind {
                addr: options.addr,
                source,
            })?;
        let local = listener.local_addr().map_err(|source| TransportError::Bind {
            addr: options.addr,
            source,
        })?;

        let gate = Arc::new(Gate {
            password: options.password.clone(),
            max_connections: options.max_connections,
            banned: options.banned.clone(),
            slots: AtomicUsize::new(0),
        });
        let shared = Arc::clone(&self.shared);
        let acceptor = runtime.spawn(accept_loop(listener, shared, gate));

        info!("WebSocket transport listening on {}", local);
        self.acceptor = Some(acceptor);
        self.role = Role::Server;
        Ok(local)
    }

    fn connect(&mut self, addr: SocketAddr, password: &str) -> Result<(), TransportError> {
        match self.role {
            Role::Unbound => {}
            Role::Closed => return Err(TransportError::Closed),
            Role::Server => return Err(TransportError::AlreadyActive("listening")),
            Role::Client(server) => {
                let linked = self.shared.peers.iter().find(|l| l.addr == server).map(|l| *l.key());
                if let (true, Some(peer)) = (server == addr, linked) {
                    self.shared.deliver(peer, addr, notice_frame(Notice::AlreadyConnected));
                    return Ok(());
                }
                return Err(TransportError::AlreadyActive("connected"));
            }
        }

        let shared = Arc::clone(&self.shared);
        let password = password.to_string();
        self.runtime()?.spawn(async move {
            let server = PeerId::new();
            if let Err(e) = connect_to(addr, password, server, &shared).await {
                warn!("Connection to {} failed: {}", addr, e);
                shared.deliver(server, addr, notice_frame(Notice::ConnectionAttemptFailed));
            }
        });
        self.role = Role::Client(addr);
        Ok(())
    }

    fn send(
        &mut self,
        data: &[u8],
        _delivery: Delivery,
        destination: Destination,
    ) -> Result<(), TransportError> {
        if self.role == Role::Closed {
            return Err(TransportError::Closed);
        }

        let mut sent = 0;
        for link in self.shared.peers.iter() {
            if destination.includes(*link.key())
                && link.outbound.send(Outbound::Data(data.to_vec())).is_ok()
            {
                sent += 1;
            }
        }

        // A server may fan out to nobody; a direct send must reach someone
        let fan_out = self.role == Role::Server && !matches!(destination, Destination::Peer(_));
        if sent == 0 && !fan_out {
            return Err(TransportError::NotConnected);
        }
        Ok(())
    }

    fn receive(&mut self) -> Option<Packet> {
        self.inbound.try_recv().ok()
    }

    fn peers(&self) -> Vec<(PeerId, SocketAddr)> {
        self.shared.peers.iter().map(|l| (*l.key(), l.addr)).collect()
    }

    fn shutdown(&mut self, drain: Duration) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };

        if let Some(acceptor) = self.acceptor.take() {
            acceptor.abort();
        }

        let ids: Vec<PeerId> = self.shared.peers.iter().map(|l| *l.key()).collect();
        let links: Vec<PeerLink> = ids
            .iter()
            .filter_map(|id| self.shared.peers.remove(id).map(|(_, link)| link))
            .collect();
        let writers: Vec<JoinHandle<()>> = links
            .into_iter()
            .map(|link| {
                let _ = link.outbound.send(Outbound::Close);
                link.writer
            })
            .collect();

        let deadline = Instant::now().checked_add(drain);
        let pending = writers.len();
        let drained = runtime.block_on(tokio::time::timeout(drain, join_all(writers)));
        if drained.is_err() {
            warn!("{} peer writers did not drain within {:?}", pending, drain);
        }

        // Whatever the writers left of the drain budget
        let remaining = deadline.map_or(drain, |d| d.saturating_duration_since(Instant::now()));
        runtime.shutdown_timeout(remaining);
        self.role = Role::Closed;
        info!("WebSocket transport shut down");
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Accept TCP connections until aborted
async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, gate: Arc<Gate>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let shared = Arc::clone(&shared);
                let gate = Arc::clone(&gate);
                tokio::spawn(async move {
                    if let Err(e) = handle_incoming(stream, addr, shared, gate).await {
                        debug!("Incoming connection from {} ended: {}", addr, e);
                    }
                });
            }
            Err(e) => error!("Accept failed: {}", e),
        }
    }
}

/// Handshake with one incoming client, then pump its frames
async fn handle_incoming(
    stream: TcpStream,
    addr: SocketAddr,
    shared: Arc<Shared>,
    gate: Arc<Gate>,
) -> Result<(), tungstenite::Error> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let request = match tokio::time::timeout(HANDSHAKE_TIMEOUT, ws_receiver.next()).await {
        Ok(Some(Ok(WsMessage::Binary(data)))) => Message::decode(&data).ok(),
        _ => None,
    };

    let refusal = match request {
        Some(Message::ConnectionRequest { version, password }) => {
            if gate.banned.contains(&addr.ip()) {
                Some(Notice::ConnectionBanned)
            } else if version != PROTOCOL_VERSION {
                Some(Notice::IncompatibleProtocolVersion)
            } else if password != gate.password {
                Some(Notice::InvalidPassword)
            } else if !gate.reserve() {
                Some(Notice::NoFreeIncomingConnections)
            } else {
                None
            }
        }
        _ => Some(Notice::ModifiedPacket),
    };

    if let Some(notice) = refusal {
        info!("Refused {}: {}", addr, notice);
        ws_sender.send(WsMessage::Binary(notice_frame(notice).into())).await?;
        ws_sender.send(WsMessage::Close(None)).await?;
        return Ok(());
    }

    let peer = PeerId::new();
    let (tx, rx) = mpsc::unbounded_channel();
    let _ = tx.send(Outbound::Data(notice_frame(Notice::ConnectionRequestAccepted)));
    let writer = tokio::spawn(write_loop(ws_sender, rx));
    shared.peers.insert(peer, PeerLink { addr, outbound: tx, writer });

    info!("Accepted connection from {}", addr);
    shared.deliver(peer, addr, notice_frame(Notice::NewIncomingConnection));
    shared.send_to_all_except(peer, &notice_frame(Notice::RemoteNewIncomingConnection));

    let ending = read_loop(&mut ws_receiver, peer, addr, &shared).await;
    gate.release();

    // Only report a peer the game thread has not already dropped
    if let Some((_, link)) = shared.peers.remove(&peer) {
        link.writer.abort();
        shared.deliver(peer, addr, notice_frame(ending));
        let remote = match ending {
            Notice::DisconnectionNotification => Notice::RemoteDisconnectionNotification,
            _ => Notice::RemoteConnectionLost,
        };
        shared.send_to_all_except(peer, &notice_frame(remote));
    }
    Ok(())
}

/// Open a client connection and run it until either side closes
async fn connect_to(
    addr: SocketAddr,
    password: String,
    server: PeerId,
    shared: &Arc<Shared>,
) -> Result<(), ConnectFailure> {
    let url = format!("ws://{addr}");
    let (ws_stream, _) = tokio::time::timeout(HANDSHAKE_TIMEOUT, connect_async(url.as_str()))
        .await
        .map_err(|_| ConnectFailure::TimedOut)??;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let request = Message::ConnectionRequest {
        version: PROTOCOL_VERSION,
        password,
    };
    let frame = request.encode().map_err(|_| ConnectFailure::Rejected)?;
    ws_sender.send(WsMessage::Binary(frame.into())).await?;

    let reply = match tokio::time::timeout(HANDSHAKE_TIMEOUT, ws_receiver.next()).await {
        Ok(Some(Ok(WsMessage::Binary(data)))) => Vec::from(data),
        Ok(_) => return Err(ConnectFailure::Rejected),
        Err(_) => return Err(ConnectFailure::TimedOut),
    };

    match Message::decode(&reply) {
        Ok(Message::Notice(Notice::ConnectionRequestAccepted)) => {}
        Ok(Message::Notice(notice)) if notice.is_refusal() => {
            info!("Server {} refused the connection: {}", addr, notice);
            shared.deliver(server, addr, reply);
            return Ok(());
        }
        Ok(Message::Notice(notice)) => {
            info!("Server {} answered the handshake with: {}", addr, notice);
            return Err(ConnectFailure::Rejected);
        }
        _ => return Err(ConnectFailure::Rejected),
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(ws_sender, rx));
    shared.peers.insert(server, PeerLink { addr, outbound: tx, writer });
    shared.deliver(server, addr, reply);
    info!("Connected to {}", addr);

    let ending = read_loop(&mut ws_receiver, server, addr, shared).await;
    if let Some((_, link)) = shared.peers.remove(&server) {
        link.writer.abort();
        shared.deliver(server, addr, notice_frame(ending));
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
enum ConnectFailure {
    #[error("timed out")]
    TimedOut,

    #[error("handshake rejected")]
    Rejected,

    #[error(transparent)]
    WebSocket(#[from] tungstenite::Error),
}

/// Forward frames from one peer until it goes away. Returns the notice
/// describing how the connection ended.
async fn read_loop<S>(receiver: &mut S, peer: PeerId, addr: SocketAddr, shared: &Shared) -> Notice
where
    S: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
{
    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(WsMessage::Binary(data)) => shared.deliver(peer, addr, Vec::from(data)),
            Ok(WsMessage::Close(_)) => return Notice::DisconnectionNotification,
            Ok(WsMessage::Ping(data)) => {
                debug!("Ping from {} ({} bytes)", addr, data.len());
            }
            Ok(_) => {
                warn!("Ignoring non-binary frame from {}", addr);
            }
            Err(e) => {
                warn!("WebSocket error from {}: {}", addr, e);
                return Notice::ConnectionLost;
            }
        }
    }
    Notice::ConnectionLost
}

/// Write queued messages to one peer in order
async fn write_loop<S>(mut sink: S, mut rx: mpsc::UnboundedReceiver<Outbound>)
where
    S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    while let Some(outbound) = rx.recv().await {
        let result = match outbound {
            Outbound::Data(data) => sink.send(WsMessage::Binary(data.into())).await,
            Outbound::Close => {
                let _ = sink.send(WsMessage::Close(None)).await;
                break;
            }
        };
        if result.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DEFAULT_PASSWORD;

    #[test]
    fn test_gate_reserves_up_to_limit() {
        let gate = Gate {
            password: String::new(),
            max_connections: 2,
            banned: Vec::new(),
            slots: AtomicUsize::new(0),
        };
        assert!(gate.reserve());
        assert!(gate.reserve());
        assert!(!gate.reserve());
        gate.release();
        assert!(gate.reserve());
    }

    #[test]
    fn test_send_without_peers_fails_for_clients() {
        let mut transport = WebSocketTransport::new().unwrap();
        assert!(matches!(
            transport.send(b"x", Delivery::RELIABLE_ORDERED, Destination::Broadcast),
            Err(TransportError::NotConnected)
        ));
        transport.shutdown(Duration::from_millis(50));
        assert!(matches!(
            transport.send(b"x", Delivery::RELIABLE_ORDERED, Destination::Broadcast),
            Err(TransportError::Closed)
        ));
    }

    const DRAIN: Duration = Duration::from_millis(200);

    fn listen_options() -> ListenOptions {
        ListenOptions {
            addr: "127.0.0.1:0".parse().unwrap(),
            password: DEFAULT_PASSWORD.to_string(),
            max_connections: 4,
            banned: Vec::new(),
        }
    }

    /// Wait for the next inbound packet, bounded by the handshake timeout
    fn next_packet(transport: &mut WebSocketTransport) -> Option<Packet> {
        let deadline = Instant::now() + HANDSHAKE_TIMEOUT * 2;
        while Instant::now() < deadline {
            if let Some(packet) = transport.receive() {
                return Some(packet);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        None
    }

    #[test]
    fn test_other_protocol_versions_are_refused() {
        let mut server = WebSocketTransport::new().unwrap();
        let addr = server.listen(&listen_options()).unwrap();

        let runtime = Runtime::new().unwrap();
        let reply = runtime.block_on(async move {
            let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
            let request = Message::ConnectionRequest {
                version: PROTOCOL_VERSION + 1,
                password: DEFAULT_PASSWORD.to_string(),
            };
            ws.send(WsMessage::Binary(request.encode().unwrap().into()))
                .await
                .unwrap();
            match ws.next().await {
                Some(Ok(WsMessage::Binary(data))) => Message::decode(&data).unwrap(),
                other => panic!("unexpected reply: {other:?}"),
            }
        });

        assert_eq!(reply, Message::Notice(Notice::IncompatibleProtocolVersion));
        assert!(server.peers().is_empty());
        server.shutdown(DRAIN);
    }

    #[test]
    fn test_unexpected_handshake_reply_fails_the_attempt() {
        // A server that answers every request with a non-refusal notice
        let runtime = Runtime::new().unwrap();
        let listener = runtime.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
        let addr = listener.local_addr().unwrap();
        runtime.spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _ = ws.next().await;
            let frame = notice_frame(Notice::ModifiedPacket);
            ws.send(WsMessage::Binary(frame.into())).await.unwrap();
            while ws.next().await.is_some() {}
        });

        let mut client = WebSocketTransport::new().unwrap();
        client.connect(addr, DEFAULT_PASSWORD).unwrap();
        let packet = next_packet(&mut client).expect("no answer to the connection attempt");
        assert_eq!(
            Message::decode(&packet.data).unwrap(),
            Message::Notice(Notice::ConnectionAttemptFailed)
        );
        client.shutdown(DRAIN);
    }

    #[test]
    fn test_shutdown_stays_within_drain_budget() {
        let mut server = WebSocketTransport::new().unwrap();
        let addr = server.listen(&listen_options()).unwrap();
        let mut client = WebSocketTransport::new().unwrap();
        client.connect(addr, DEFAULT_PASSWORD).unwrap();
        let packet = next_packet(&mut client).unwrap();
        assert_eq!(
            Message::decode(&packet.data).unwrap(),
            Message::Notice(Notice::ConnectionRequestAccepted)
        );

        let started = Instant::now();
        server.shutdown(DRAIN);
        assert!(started.elapsed() < DRAIN + DRAIN / 2);
        client.shutdown(DRAIN);
    }
}
