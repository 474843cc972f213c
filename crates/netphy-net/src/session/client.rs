//! Client role: connect to a server, exchange text, follow game events.

use super::{Outbox, SessionError, SessionEvent};
use crate::protocol::{Message, Notice};
use crate::transport::{Destination, Network, Packet, Transport};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

impl ClientState {
    fn name(self) -> &'static str {
        match self {
            ClientState::Idle => "idle",
            ClientState::Connecting => "connecting",
            ClientState::Connected => "connected",
            ClientState::Disconnecting => "disconnecting",
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why the client ended up back in `Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("connection refused: {0}")]
    Refused(Notice),

    #[error("connection closed: {0}")]
    Dropped(Notice),
}

/// Client side of the star topology
pub struct ClientSession {
    state: ClientState,
    transport: Option<Box<dyn Transport>>,
    server: Option<SocketAddr>,
    outbox: Outbox,
    last_error: Option<ConnectError>,
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientSession {
    pub fn new() -> Self {
        Self {
            state: ClientState::Idle,
            transport: None,
            server: None,
            outbox: Outbox::default(),
            last_error: None,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.server
    }

    /// Reason for the most recent failure, cleared by `connect`
    pub fn last_error(&self) -> Option<ConnectError> {
        self.last_error
    }

    /// Start connecting. The outcome arrives through [`update`](Self::update).
    pub fn connect(
        &mut self,
        network: &dyn Network,
        addr: SocketAddr,
        password: &str,
    ) -> Result<(), SessionError> {
        if self.state != ClientState::Idle {
            return Err(SessionError::InvalidState {
                operation: "connect",
                state: self.state.name(),
            });
        }

        let mut transport = network.open()?;
        transport.connect(addr, password)?;

        self.transport = Some(transport);
        self.server = Some(addr);
        self.last_error = None;
        self.state = ClientState::Connecting;
        info!("Connecting to {}", addr);
        Ok(())
    }

    /// Drain every inbound packet, then flush queued sends
    pub fn update(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        let Some(mut transport) = self.transport.take() else {
            return events;
        };

        while let Some(packet) = transport.receive() {
            let (event, failure) = self.handle_packet(packet);
            events.extend(event);
            if let Some(error) = failure {
                warn!("Leaving session: {}", error);
                self.outbox.clear();
                transport.shutdown(Duration::ZERO);
                self.last_error = Some(error);
                self.server = None;
                self.state = ClientState::Idle;
                return events;
            }
        }

        if self.state == ClientState::Connected {
            self.outbox.flush(transport.as_mut());
        }
        self.transport = Some(transport);
        events
    }

    fn handle_packet(&mut self, packet: Packet) -> (Option<SessionEvent>, Option<ConnectError>) {
        let Packet { addr, data, .. } = packet;
        let message = match Message::decode(&data) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring packet from {}: {}", addr, e);
                let event = SessionEvent::Ignored {
                    addr,
                    reason: e.to_string(),
                };
                return (Some(event), None);
            }
        };

        match message {
            Message::Notice(notice) => {
                info!("{} ({})", notice, addr);
                let failure = self.on_notice(notice);
                (Some(SessionEvent::Notice { addr, notice }), failure)
            }
            Message::StartGame { payload } => (Some(SessionEvent::StartGame { payload }), None),
            Message::FreeText(text) => (Some(SessionEvent::Text { addr, text }), None),
            Message::OwnershipUpdate { coord, owner } => {
                (Some(SessionEvent::Ownership { coord, owner }), None)
            }
            Message::ConnectionRequest { .. } => {
                warn!("Ignoring connection request from {}", addr);
                let event = SessionEvent::Ignored {
                    addr,
                    reason: "unexpected connection request".to_string(),
                };
                (Some(event), None)
            }
        }
    }

    fn on_notice(&mut self, notice: Notice) -> Option<ConnectError> {
        match notice {
            Notice::ConnectionRequestAccepted => {
                self.state = ClientState::Connected;
                None
            }
            Notice::AlreadyConnected if self.state == ClientState::Connected => None,
            refusal if refusal.is_refusal() => Some(ConnectError::Refused(refusal)),
            Notice::DisconnectionNotification | Notice::ConnectionLost => {
                Some(ConnectError::Dropped(notice))
            }
            _ => None,
        }
    }

    /// Queue a line of text for the server
    pub fn send_text(&mut self, text: &str) -> Result<(), SessionError> {
        if self.state != ClientState::Connected {
            return Err(SessionError::InvalidState {
                operation: "send text",
                state: self.state.name(),
            });
        }
        self.outbox.push(&Message::FreeText(text.to_string()), Destination::Broadcast)?;
        Ok(())
    }

    /// Flush pending sends, say goodbye and release the transport.
    ///
    /// Waits at most `drain`. Safe to call when idle.
    pub fn disconnect(&mut self, drain: Duration) {
        let Some(mut transport) = self.transport.take() else {
            self.state = ClientState::Idle;
            return;
        };

        self.state = ClientState::Disconnecting;
        if transport.peers().is_empty() {
            self.outbox.clear();
        } else {
            self.outbox.flush(transport.as_mut());
        }
        transport.shutdown(drain);
        drop(transport);

        self.server = None;
        self.state = ClientState::Idle;
        info!("Disconnected");
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.disconnect(Duration::ZERO);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DEFAULT_PASSWORD;
    use crate::session::ServerSession;
    use crate::transport::{ListenOptions, MemoryNetwork};

    fn serve(net: &MemoryNetwork, max_connections: usize) -> (ServerSession, SocketAddr) {
        let mut server = ServerSession::new();
        let options = ListenOptions {
            addr: "127.0.0.1:0".parse().unwrap(),
            password: DEFAULT_PASSWORD.to_string(),
            max_connections,
            banned: Vec::new(),
        };
        let addr = server.start(net, &options).unwrap();
        (server, addr)
    }

    #[test]
    fn test_connect_with_correct_password() {
        let net = MemoryNetwork::new();
        let (_server, addr) = serve(&net, 4);

        let mut client = ClientSession::new();
        client.connect(&net, addr, DEFAULT_PASSWORD).unwrap();
        assert_eq!(client.state(), ClientState::Connecting);

        let events = client.update();
        assert_eq!(client.state(), ClientState::Connected);
        assert_eq!(
            events,
            vec![SessionEvent::Notice {
                addr,
                notice: Notice::ConnectionRequestAccepted
            }]
        );
        assert!(client.last_error().is_none());
    }

    #[test]
    fn test_wrong_password_returns_to_idle() {
        let net = MemoryNetwork::new();
        let (_server, addr) = serve(&net, 4);

        let mut client = ClientSession::new();
        client.connect(&net, addr, "let me in").unwrap();
        client.update();
        assert_eq!(client.state(), ClientState::Idle);
        assert_eq!(
            client.last_error(),
            Some(ConnectError::Refused(Notice::InvalidPassword))
        );
        assert!(client.server_addr().is_none());

        // A clean retry is possible afterwards
        client.connect(&net, addr, DEFAULT_PASSWORD).unwrap();
        client.update();
        assert_eq!(client.state(), ClientState::Connected);
        assert!(client.last_error().is_none());
    }

    #[test]
    fn test_server_full() {
        let net = MemoryNetwork::new();
        let (_server, addr) = serve(&net, 1);

        let mut first = ClientSession::new();
        first.connect(&net, addr, DEFAULT_PASSWORD).unwrap();
        first.update();

        let mut second = ClientSession::new();
        second.connect(&net, addr, DEFAULT_PASSWORD).unwrap();
        second.update();
        assert_eq!(
            second.last_error(),
            Some(ConnectError::Refused(Notice::NoFreeIncomingConnections))
        );
    }

    #[test]
    fn test_send_text_requires_connection() {
        let mut client = ClientSession::new();
        assert!(matches!(
            client.send_text("hello"),
            Err(SessionError::InvalidState { state: "idle", .. })
        ));
    }

    #[test]
    fn test_lost_connection_records_error() {
        let net = MemoryNetwork::new();
        let (mut server, addr) = serve(&net, 4);
        let mut client = ClientSession::new();
        client.connect(&net, addr, DEFAULT_PASSWORD).unwrap();
        client.update();

        server.shutdown(Duration::from_millis(300));
        client.update();
        assert_eq!(client.state(), ClientState::Idle);
        assert_eq!(
            client.last_error(),
            Some(ConnectError::Dropped(Notice::DisconnectionNotification))
        );
    }
}
