//! Server and client sessions.
//!
//! A session wraps one transport for the lifetime of a network mode. It
//! decodes inbound packets into [`SessionEvent`]s, queues outbound messages
//! and flushes them once per [`update`](ServerSession::update).

mod client;
mod server;

pub use client::{ClientSession, ClientState, ConnectError};
pub use server::{ServerSession, ServerState};

use crate::protocol::{Message, Notice, ProtocolError};
use crate::transport::{Delivery, Destination, Transport, TransportError};
use netphy_core::{HexCoord, PlayerId};
use std::collections::VecDeque;
use std::net::SocketAddr;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot {operation} while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Something that happened during one session update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connection lifecycle notice from or about a peer
    Notice { addr: SocketAddr, notice: Notice },
    /// A line of text (already prefixed with its origin where relayed)
    Text { addr: SocketAddr, text: String },
    /// The server started the game
    StartGame { payload: String },
    /// The server changed the owner of a cell
    Ownership {
        coord: HexCoord,
        owner: Option<PlayerId>,
    },
    /// A packet that could not be decoded or is not accepted here
    Ignored { addr: SocketAddr, reason: String },
}

impl SessionEvent {
    /// Line to show on the in-game console
    pub fn console_line(&self) -> String {
        match self {
            SessionEvent::Notice { addr, notice } => format!("{notice} ({addr})"),
            SessionEvent::Text { text, .. } => text.clone(),
            SessionEvent::StartGame { payload } => payload.clone(),
            SessionEvent::Ownership { coord, owner } => match owner {
                Some(id) => format!("Cell {coord} now belongs to player {id}"),
                None => format!("Cell {coord} is unclaimed"),
            },
            SessionEvent::Ignored { addr, reason } => format!("Ignored packet from {addr}: {reason}"),
        }
    }
}

/// Outbound message waiting for the next flush
#[derive(Debug)]
struct Outgoing {
    data: Vec<u8>,
    destination: Destination,
}

/// Queue of encoded messages
#[derive(Debug, Default)]
struct Outbox {
    queue: VecDeque<Outgoing>,
}

impl Outbox {
    fn push(&mut self, message: &Message, destination: Destination) -> Result<(), ProtocolError> {
        self.push_raw(message.encode()?, destination);
        Ok(())
    }

    fn push_raw(&mut self, data: Vec<u8>, destination: Destination) {
        self.queue.push_back(Outgoing { data, destination });
    }

    /// Hand every queued message to the transport in order
    fn flush(&mut self, transport: &mut dyn Transport) {
        while let Some(out) = self.queue.pop_front() {
            if let Err(e) = transport.send(&out.data, Delivery::RELIABLE_ORDERED, out.destination) {
                warn!("Dropped outbound message: {}", e);
            }
        }
    }

    fn clear(&mut self) {
        self.queue.clear();
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}
