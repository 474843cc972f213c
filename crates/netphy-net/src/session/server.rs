//! Server role: accept clients, relay their text, broadcast game events.

use super::{Outbox, SessionError, SessionEvent};
use crate::protocol::{Message, Notice};
use crate::transport::{Destination, ListenOptions, Network, Packet, PeerId, Transport};
use netphy_core::{HexCoord, PlayerId};
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Listening,
    Running,
    ShuttingDown,
}

impl ServerState {
    fn name(self) -> &'static str {
        match self {
            ServerState::Idle => "idle",
            ServerState::Listening => "listening",
            ServerState::Running => "running",
            ServerState::ShuttingDown => "shutting down",
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Server side of the star topology
pub struct ServerSession {
    state: ServerState,
    transport: Option<Box<dyn Transport>>,
    local_addr: Option<SocketAddr>,
    peers: BTreeMap<PeerId, SocketAddr>,
    outbox: Outbox,
    started: Instant,
}

impl Default for ServerSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerSession {
    pub fn new() -> Self {
        Self {
            state: ServerState::Idle,
            transport: None,
            local_addr: None,
            peers: BTreeMap::new(),
            outbox: Outbox::default(),
            started: Instant::now(),
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Address the server is bound to, while active
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Connected clients by address
    pub fn peers(&self) -> Vec<SocketAddr> {
        self.peers.values().copied().collect()
    }

    /// Bind and start accepting clients.
    ///
    /// On failure the session stays `Idle` and holds no transport.
    pub fn start(
        &mut self,
        network: &dyn Network,
        options: &ListenOptions,
    ) -> Result<SocketAddr, SessionError> {
        self.require(ServerState::Idle, "start")?;

        let mut transport = network.open()?;
        let addr = transport.listen(options)?;

        self.transport = Some(transport);
        self.local_addr = Some(addr);
        self.started = Instant::now();
        self.state = ServerState::Listening;
        info!("Server listening on {}", addr);
        Ok(addr)
    }

    /// Drain every inbound packet, then flush queued sends
    pub fn update(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        let Some(mut transport) = self.transport.take() else {
            return events;
        };

        if self.state == ServerState::Listening {
            self.state = ServerState::Running;
            debug!("Server running");
        }

        while let Some(packet) = transport.receive() {
            if let Some(event) = self.handle_packet(packet) {
                events.push(event);
            }
        }

        self.outbox.flush(transport.as_mut());
        self.transport = Some(transport);
        events
    }

    fn handle_packet(&mut self, packet: Packet) -> Option<SessionEvent> {
        let Packet { peer, addr, data } = packet;
        let message = match Message::decode(&data) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring packet from {}: {}", addr, e);
                return Some(SessionEvent::Ignored {
                    addr,
                    reason: e.to_string(),
                });
            }
        };

        match message {
            Message::Notice(notice) => {
                match notice {
                    Notice::NewIncomingConnection => {
                        self.peers.insert(peer, addr);
                    }
                    Notice::DisconnectionNotification | Notice::ConnectionLost => {
                        self.peers.remove(&peer);
                    }
                    _ => {}
                }
                info!("{} ({})", notice, addr);
                Some(SessionEvent::Notice { addr, notice })
            }
            Message::FreeText(text) => {
                let line = format!("{addr}: {text}");
                info!("Relaying text from {}", addr);
                if let Err(e) = self.outbox.push(&Message::FreeText(line.clone()), Destination::AllExcept(peer)) {
                    warn!("Could not relay text from {}: {}", addr, e);
                }
                Some(SessionEvent::Text { addr, text: line })
            }
            other => {
                // Game events only flow from the server
                warn!("Ignoring {:?} from client {}", other.id(), addr);
                Some(SessionEvent::Ignored {
                    addr,
                    reason: format!("{:?} is server-only", other.id()),
                })
            }
        }
    }

    /// Queue a message for the next flush
    pub fn send(&mut self, message: &Message, destination: Destination) -> Result<(), SessionError> {
        self.require_active("send")?;
        self.outbox.push(message, destination)?;
        Ok(())
    }

    /// Tell every client that play begins
    pub fn broadcast_start_game(&mut self) -> Result<(), SessionError> {
        info!("Broadcasting start of game");
        self.send(&Message::start_game(), Destination::Broadcast)
    }

    /// Broadcast a console line from the server operator
    pub fn broadcast_text(&mut self, text: &str) -> Result<(), SessionError> {
        self.send(&Message::FreeText(format!("SERVER: {text}")), Destination::Broadcast)
    }

    /// Broadcast an authoritative ownership change, timestamped with the
    /// milliseconds since the session started
    pub fn broadcast_ownership(
        &mut self,
        coord: HexCoord,
        owner: Option<PlayerId>,
    ) -> Result<(), SessionError> {
        self.require_active("broadcast ownership")?;
        let stamp = self.started.elapsed().as_millis() as u64;
        let data = Message::OwnershipUpdate { coord, owner }.encode_timestamped(stamp)?;
        self.outbox.push_raw(data, Destination::Broadcast);
        Ok(())
    }

    /// Flush pending sends, notify clients and release the port.
    ///
    /// Waits at most `drain` for in-flight messages. Safe to call when idle.
    pub fn shutdown(&mut self, drain: Duration) {
        let Some(mut transport) = self.transport.take() else {
            self.state = ServerState::Idle;
            return;
        };

        self.state = ServerState::ShuttingDown;
        info!("Server shutting down ({} clients)", self.peers.len());
        self.outbox.flush(transport.as_mut());
        transport.shutdown(drain);
        drop(transport);

        self.outbox.clear();
        self.peers.clear();
        self.local_addr = None;
        self.state = ServerState::Idle;
        info!("Server stopped");
    }

    fn require(&self, expected: ServerState, operation: &'static str) -> Result<(), SessionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                operation,
                state: self.state.name(),
            })
        }
    }

    fn require_active(&self, operation: &'static str) -> Result<(), SessionError> {
        match self.state {
            ServerState::Listening | ServerState::Running => Ok(()),
            state => Err(SessionError::InvalidState {
                operation,
                state: state.name(),
            }),
        }
    }
}

impl Drop for ServerSession {
    fn drop(&mut self) {
        self.shutdown(Duration::ZERO);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DEFAULT_PASSWORD;
    use crate::transport::MemoryNetwork;

    fn options() -> ListenOptions {
        ListenOptions {
            addr: "127.0.0.1:0".parse().unwrap(),
            password: DEFAULT_PASSWORD.to_string(),
            max_connections: 4,
            banned: Vec::new(),
        }
    }

    #[test]
    fn test_lifecycle_states() {
        let net = MemoryNetwork::new();
        let mut server = ServerSession::new();
        assert_eq!(server.state(), ServerState::Idle);

        let addr = server.start(&net, &options()).unwrap();
        assert_eq!(server.state(), ServerState::Listening);
        assert_eq!(server.local_addr(), Some(addr));

        assert!(server.update().is_empty());
        assert_eq!(server.state(), ServerState::Running);

        server.shutdown(Duration::from_millis(300));
        assert_eq!(server.state(), ServerState::Idle);
        assert!(!net.is_listening(addr));
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let net = MemoryNetwork::new();
        let mut server = ServerSession::new();
        server.start(&net, &options()).unwrap();
        assert!(matches!(
            server.start(&net, &options()),
            Err(SessionError::InvalidState { operation: "start", .. })
        ));
    }

    #[test]
    fn test_failed_bind_stays_idle() {
        let net = MemoryNetwork::new();
        let mut first = ServerSession::new();
        let addr = first.start(&net, &options()).unwrap();

        let mut second = ServerSession::new();
        let mut taken = options();
        taken.addr = addr;
        assert!(matches!(second.start(&net, &taken), Err(SessionError::Transport(_))));
        assert_eq!(second.state(), ServerState::Idle);
        assert!(second.local_addr().is_none());
    }

    #[test]
    fn test_broadcast_requires_active_session() {
        let mut server = ServerSession::new();
        assert!(matches!(
            server.broadcast_start_game(),
            Err(SessionError::InvalidState { state: "idle", .. })
        ));
        assert!(server.broadcast_ownership(HexCoord::new(0, 0), None).is_err());
    }
}
