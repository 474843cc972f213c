//! Netphy networking and game flow
//!
//! This crate connects the core game data to the outside world:
//! - Binary wire protocol shared by server and client
//! - Packet transports (WebSocket over TCP, and in-memory)
//! - Server and client sessions with their connection lifecycles
//! - The mode coordinator driving title, editor, play, server and client
//!
//! # Modules
//!
//! - [`protocol`]: Message identifiers and the packet codec
//! - [`transport`]: The transport trait and its implementations
//! - [`session`]: Server and client session state machines
//! - [`state`]: Mode coordinator, shared context and console
//! - [`config`]: Defaults, config file and environment overrides

pub mod config;
mod modes;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

pub use config::{Config, ConfigError};
pub use protocol::{Message, MessageId, Notice, ProtocolError};
pub use session::{
    ClientSession, ClientState, ConnectError, ServerSession, ServerState, SessionError,
    SessionEvent,
};
pub use state::{Console, GameContext, ModeKind, StateError, StateManager};
pub use transport::{MemoryNetwork, Network, Transport, TransportError, WebSocketNetwork};
