//! Packet transports.
//!
//! A transport moves whole messages between a server and its clients and
//! reports connection lifecycle changes as one-byte notice packets in the
//! same inbound stream as data. Callers poll with [`Transport::receive`]
//! once per tick; no call blocks for longer than a bounded drain period.

pub mod memory;
pub mod websocket;

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryNetwork;
pub use websocket::WebSocketNetwork;

/// Identity of a remote endpoint, stable for the life of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub Uuid);

impl PeerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

/// A message (or lifecycle notice) received from a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub peer: PeerId,
    pub addr: SocketAddr,
    pub data: Vec<u8>,
}

/// Where an outbound message goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Peer(PeerId),
    Broadcast,
    AllExcept(PeerId),
}

impl Destination {
    pub fn includes(self, peer: PeerId) -> bool {
        match self {
            Destination::Peer(target) => target == peer,
            Destination::Broadcast => true,
            Destination::AllExcept(excluded) => excluded != peer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Immediate,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reliability {
    Unreliable,
    Reliable,
    ReliableOrdered,
}

/// Send options for one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub priority: Priority,
    pub reliability: Reliability,
    pub channel: u8,
}

impl Delivery {
    /// The only delivery class used for gameplay messages
    pub const RELIABLE_ORDERED: Delivery = Delivery {
        priority: Priority::High,
        reliability: Reliability::ReliableOrdered,
        channel: 0,
    };
}

/// Parameters for accepting incoming connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenOptions {
    pub addr: SocketAddr,
    pub password: String,
    pub max_connections: usize,
    pub banned: Vec<IpAddr>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("address {0} is already in use")]
    AddrInUse(SocketAddr),

    #[error("transport is already {0}")]
    AlreadyActive(&'static str),

    #[error("no connected peer matches the destination")]
    NotConnected,

    #[error("transport has been shut down")]
    Closed,

    #[error("failed to start the network runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// A connection-oriented packet transport.
///
/// One transport plays either the server role (after [`listen`](Self::listen))
/// or the client role (after [`connect`](Self::connect)). Connection results
/// arrive asynchronously as notice packets.
pub trait Transport: Send {
    /// Bind and start accepting connections; returns the bound address
    fn listen(&mut self, options: &ListenOptions) -> Result<SocketAddr, TransportError>;

    /// Begin connecting to a server. The outcome is delivered as a notice.
    fn connect(&mut self, addr: SocketAddr, password: &str) -> Result<(), TransportError>;

    /// Queue a whole message for delivery
    fn send(
        &mut self,
        data: &[u8],
        delivery: Delivery,
        destination: Destination,
    ) -> Result<(), TransportError>;

    /// Next inbound packet, if any. Never blocks.
    fn receive(&mut self) -> Option<Packet>;

    /// Currently connected peers
    fn peers(&self) -> Vec<(PeerId, SocketAddr)>;

    /// Notify peers, wait at most `drain` for queued sends, then release
    /// every socket. The transport cannot be reused afterwards.
    fn shutdown(&mut self, drain: Duration);
}

/// Factory for fresh transports, one per session
pub trait Network: Send {
    fn open(&self) -> Result<Box<dyn Transport>, TransportError>;
}

/// Notice packet body
pub(crate) fn notice_frame(notice: crate::protocol::Notice) -> Vec<u8> {
    vec![notice.id() as u8]
}
