//! In-process transport.
//!
//! Every transport opened from one [`MemoryNetwork`] shares a hub, so a
//! server and its clients can run in one thread with fully deterministic
//! delivery. Connection checks and lifecycle notices mirror the WebSocket
//! transport.

use super::{
    notice_frame, Delivery, Destination, ListenOptions, Network, Packet, PeerId, Transport,
    TransportError,
};
use crate::protocol::Notice;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

const FIRST_EPHEMERAL_PORT: u16 = 49152;

/// Shared in-memory network. Cloning yields a handle to the same hub.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
}

#[derive(Debug)]
struct Hub {
    next_port: u16,
    inboxes: HashMap<PeerId, VecDeque<Packet>>,
    servers: HashMap<SocketAddr, Listener>,
}

#[derive(Debug)]
struct Listener {
    endpoint: PeerId,
    options: ListenOptions,
    clients: BTreeMap<PeerId, SocketAddr>,
}

impl Default for Hub {
    fn default() -> Self {
        Self {
            next_port: FIRST_EPHEMERAL_PORT,
            inboxes: HashMap::new(),
            servers: HashMap::new(),
        }
    }
}

impl Hub {
    fn allocate_port(&mut self) -> u16 {
        loop {
            let port = self.next_port;
            self.next_port = self.next_port.checked_add(1).unwrap_or(FIRST_EPHEMERAL_PORT);
            let taken = self.servers.keys().any(|addr| addr.port() == port);
            if !taken {
                return port;
            }
        }
    }

    fn push(&mut self, to: PeerId, from: PeerId, addr: SocketAddr, data: Vec<u8>) {
        if let Some(inbox) = self.inboxes.get_mut(&to) {
            inbox.push_back(Packet { peer: from, addr, data });
        }
    }

    fn notify(&mut self, to: PeerId, from: PeerId, addr: SocketAddr, notice: Notice) {
        self.push(to, from, addr, notice_frame(notice));
    }

    /// Tell every client of `server` except `except` about a change
    fn notify_others(&mut self, server: SocketAddr, except: PeerId, notice: Notice) {
        let Some(listener) = self.servers.get(&server) else {
            return;
        };
        let endpoint = listener.endpoint;
        let others: Vec<PeerId> = listener.clients.keys().copied().filter(|c| *c != except).collect();
        for other in others {
            self.notify(other, endpoint, server, notice);
        }
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a transport whose address uses the given IP
    pub fn open_from(&self, ip: IpAddr) -> MemoryTransport {
        let mut hub = self.lock();
        let endpoint = PeerId::new();
        let port = hub.allocate_port();
        hub.inboxes.insert(endpoint, VecDeque::new());
        MemoryTransport {
            hub: Arc::clone(&self.hub),
            endpoint,
            addr: SocketAddr::new(ip, port),
            role: Role::Unbound,
        }
    }

    /// Drop the link to the client at `client` without a goodbye, as if
    /// the connection timed out. Returns whether such a client existed.
    pub fn sever(&self, client: SocketAddr) -> bool {
        let mut hub = self.lock();
        let found = hub.servers.iter().find_map(|(server, listener)| {
            listener
                .clients
                .iter()
                .find(|(_, addr)| **addr == client)
                .map(|(id, _)| (*server, listener.endpoint, *id))
        });
        let Some((server, server_endpoint, client_id)) = found else {
            return false;
        };

        if let Some(listener) = hub.servers.get_mut(&server) {
            listener.clients.remove(&client_id);
        }
        hub.notify(client_id, server_endpoint, server, Notice::ConnectionLost);
        hub.notify(server_endpoint, client_id, client, Notice::ConnectionLost);
        hub.notify_others(server, client_id, Notice::RemoteConnectionLost);
        debug!("Severed memory link to {}", client);
        true
    }

    /// Whether a server currently listens on `addr`
    pub fn is_listening(&self, addr: SocketAddr) -> bool {
        self.lock().servers.contains_key(&addr)
    }
}

impl Network for MemoryNetwork {
    fn open(&self) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(self.open_from(IpAddr::V4(Ipv4Addr::LOCALHOST))))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Unbound,
    Server(SocketAddr),
    Client { server: SocketAddr, server_endpoint: PeerId },
    Closed,
}

/// One endpoint on a [`MemoryNetwork`]
#[derive(Debug)]
pub struct MemoryTransport {
    hub: Arc<Mutex<Hub>>,
    endpoint: PeerId,
    addr: SocketAddr,
    role: Role,
}

impl MemoryTransport {
    fn lock(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Whether the server still counts this client as connected
    fn linked(hub: &Hub, server: SocketAddr, server_endpoint: PeerId, me: PeerId) -> bool {
        hub.servers
            .get(&server)
            .is_some_and(|l| l.endpoint == server_endpoint && l.clients.contains_key(&me))
    }
}

impl Transport for MemoryTransport {
    fn listen(&mut self, options: &ListenOptions) -> Result<SocketAddr, TransportError> {
        match self.role {
            Role::Unbound => {}
            Role::Closed => return Err(TransportError::Closed),
            Role::Server(_) => return Err(TransportError::AlreadyActive("listening")),
            Role::Client { .. } => return Err(TransportError::AlreadyActive("connected")),
        }

        let endpoint = self.endpoint;
        let mut hub = self.lock();
        let addr = if options.addr.port() == 0 {
            SocketAddr::new(options.addr.ip(), hub.allocate_port())
        } else {
            options.addr
        };
        if hub.servers.contains_key(&addr) {
            return Err(TransportError::AddrInUse(addr));
        }
        hub.servers.insert(
            addr,
            Listener {
                endpoint,
                options: options.clone(),
                clients: BTreeMap::new(),
            },
        );
        drop(hub);

        self.addr = addr;
        self.role = Role::Server(addr);
        Ok(addr)
    }

    fn connect(&mut self, addr: SocketAddr, password: &str) -> Result<(), TransportError> {
        let me = self.endpoint;
        let my_addr = self.addr;
        let mut hub = self.lock();

        match self.role {
            Role::Unbound => {}
            Role::Closed => return Err(TransportError::Closed),
            Role::Server(_) => return Err(TransportError::AlreadyActive("listening")),
            Role::Client {
                server,
                server_endpoint,
            } => {
                if server == addr && Self::linked(&hub, server, server_endpoint, me) {
                    hub.notify(me, server_endpoint, server, Notice::AlreadyConnected);
                    return Ok(());
                }
                return Err(TransportError::AlreadyActive("connected"));
            }
        }

        let Some(listener) = hub.servers.get(&addr) else {
            hub.notify(me, PeerId::new(), addr, Notice::ConnectionAttemptFailed);
            return Ok(());
        };
        let server_endpoint = listener.endpoint;
        let refusal = if listener.options.banned.contains(&my_addr.ip()) {
            Some(Notice::ConnectionBanned)
        } else if listener.options.password != password {
            Some(Notice::InvalidPassword)
        } else if listener.clients.len() >= listener.options.max_connections {
            Some(Notice::NoFreeIncomingConnections)
        } else {
            None
        };

        if let Some(notice) = refusal {
            hub.notify(me, server_endpoint, addr, notice);
            return Ok(());
        }

        if let Some(listener) = hub.servers.get_mut(&addr) {
            listener.clients.insert(me, my_addr);
        }
        hub.notify(me, server_endpoint, addr, Notice::ConnectionRequestAccepted);
        hub.notify(server_endpoint, me, my_addr, Notice::NewIncomingConnection);
        hub.notify_others(addr, me, Notice::RemoteNewIncomingConnection);
        drop(hub);

        self.role = Role::Client {
            server: addr,
            server_endpoint,
        };
        Ok(())
    }

    fn send(
        &mut self,
        data: &[u8],
        _delivery: Delivery,
        destination: Destination,
    ) -> Result<(), TransportError> {
        let me = self.endpoint;
        let my_addr = self.addr;
        let mut hub = self.lock();

        match self.role {
            Role::Server(addr) => {
                let targets: Vec<PeerId> = hub
                    .servers
                    .get(&addr)
                    .map(|l| l.clients.keys().copied().filter(|c| destination.includes(*c)).collect())
                    .unwrap_or_default();
                if targets.is_empty() && matches!(destination, Destination::Peer(_)) {
                    return Err(TransportError::NotConnected);
                }
                for target in targets {
                    hub.push(target, me, my_addr, data.to_vec());
                }
                Ok(())
            }
            Role::Client {
                server,
                server_endpoint,
            } => {
                if !Self::linked(&hub, server, server_endpoint, me)
                    || !destination.includes(server_endpoint)
                {
                    return Err(TransportError::NotConnected);
                }
                hub.push(server_endpoint, me, my_addr, data.to_vec());
                Ok(())
            }
            Role::Unbound => Err(TransportError::NotConnected),
            Role::Closed => Err(TransportError::Closed),
        }
    }

    fn receive(&mut self) -> Option<Packet> {
        let me = self.endpoint;
        self.lock().inboxes.get_mut(&me)?.pop_front()
    }

    fn peers(&self) -> Vec<(PeerId, SocketAddr)> {
        let hub = self.lock();
        match self.role {
            Role::Server(addr) => hub
                .servers
                .get(&addr)
                .map(|l| l.clients.iter().map(|(id, a)| (*id, *a)).collect())
                .unwrap_or_default(),
            Role::Client {
                server,
                server_endpoint,
            } if Self::linked(&hub, server, server_endpoint, self.endpoint) => {
                vec![(server_endpoint, server)]
            }
            _ => Vec::new(),
        }
    }

    fn shutdown(&mut self, _drain: Duration) {
        let me = self.endpoint;
        let my_addr = self.addr;
        let mut hub = self.lock();

        match self.role {
            Role::Server(addr) => {
                if let Some(listener) = hub.servers.remove(&addr) {
                    for client in listener.clients.keys() {
                        hub.notify(*client, me, addr, Notice::DisconnectionNotification);
                    }
                }
            }
            Role::Client {
                server,
                server_endpoint,
            } => {
                if Self::linked(&hub, server, server_endpoint, me) {
                    if let Some(listener) = hub.servers.get_mut(&server) {
                        listener.clients.remove(&me);
                    }
                    hub.notify(server_endpoint, me, my_addr, Notice::DisconnectionNotification);
                    hub.notify_others(server, me, Notice::RemoteDisconnectionNotification);
                }
            }
            Role::Unbound | Role::Closed => {}
        }

        hub.inboxes.remove(&me);
        drop(hub);
        self.role = Role::Closed;
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        if self.role != Role::Closed {
            self.shutdown(Duration::ZERO);
        }
    }
}
