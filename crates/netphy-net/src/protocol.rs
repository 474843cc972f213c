//! Binary wire protocol shared by server and client.
//!
//! Every message starts with a one-byte identifier. Lifecycle notices are
//! bare identifiers; gameplay messages (`StartGame`, `FreeText`,
//! `OwnershipUpdate`) carry a payload after it. A message may be wrapped in
//! a timestamp header (`[Timestamp][u64 BE]`), in which case the packet
//! identifier is the byte after the header.

use netphy_core::{HexCoord, PlayerId, NO_OWNER};
use std::fmt;
use thiserror::Error;

/// Version exchanged in the connection handshake
pub const PROTOCOL_VERSION: u8 = 1;

/// Well-known server port
pub const SERVER_PORT: u16 = 60000;

/// Static password gating connections
pub const DEFAULT_PASSWORD: &str = "Rumpelstiltskin";

/// Payload carried by every `StartGame` broadcast
pub const START_GAME_PAYLOAD: &str = "START GAME";

/// Longest string an encoded-string field may hold, in bytes
pub const MAX_ENCODED_STRING: usize = 255;

/// First identifier available to game packets
pub const USER_PACKET_BASE: u8 = 0x80;

/// One-byte packet identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageId {
    ConnectionRequest = 1,
    ConnectionRequestAccepted = 2,
    ConnectionAttemptFailed = 3,
    AlreadyConnected = 4,
    NewIncomingConnection = 5,
    NoFreeIncomingConnections = 6,
    DisconnectionNotification = 7,
    ConnectionLost = 8,
    ConnectionBanned = 9,
    InvalidPassword = 10,
    IncompatibleProtocolVersion = 11,
    ModifiedPacket = 12,
    RemoteDisconnectionNotification = 13,
    RemoteConnectionLost = 14,
    RemoteNewIncomingConnection = 15,
    Timestamp = 16,
    StartGame = USER_PACKET_BASE,
    FreeText = USER_PACKET_BASE + 1,
    OwnershipUpdate = USER_PACKET_BASE + 2,
}

impl TryFrom<u8> for MessageId {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        let id = match byte {
            1 => MessageId::ConnectionRequest,
            2 => MessageId::ConnectionRequestAccepted,
            3 => MessageId::ConnectionAttemptFailed,
            4 => MessageId::AlreadyConnected,
            5 => MessageId::NewIncomingConnection,
            6 => MessageId::NoFreeIncomingConnections,
            7 => MessageId::DisconnectionNotification,
            8 => MessageId::ConnectionLost,
            9 => MessageId::ConnectionBanned,
            10 => MessageId::InvalidPassword,
            11 => MessageId::IncompatibleProtocolVersion,
            12 => MessageId::ModifiedPacket,
            13 => MessageId::RemoteDisconnectionNotification,
            14 => MessageId::RemoteConnectionLost,
            15 => MessageId::RemoteNewIncomingConnection,
            16 => MessageId::Timestamp,
            0x80 => MessageId::StartGame,
            0x81 => MessageId::FreeText,
            0x82 => MessageId::OwnershipUpdate,
            other => return Err(ProtocolError::UnknownId(other)),
        };
        Ok(id)
    }
}

/// Errors raised while encoding or decoding a packet
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty packet")]
    Empty,

    #[error("unrecognized packet identifier {0}")]
    UnknownId(u8),

    #[error("packet {0:?} is truncated")]
    Truncated(MessageId),

    #[error("packet {0:?} has trailing bytes")]
    TrailingBytes(MessageId),

    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    #[error("text is missing its terminator")]
    MissingTerminator,

    #[error("text contains an interior NUL byte")]
    InteriorNul,

    #[error("string of {0} bytes exceeds the 255 byte limit")]
    StringTooLong(usize),
}

/// Connection lifecycle notices. None of these carry gameplay payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Notice {
    ConnectionRequestAccepted,
    ConnectionAttemptFailed,
    AlreadyConnected,
    NewIncomingConnection,
    NoFreeIncomingConnections,
    DisconnectionNotification,
    ConnectionLost,
    ConnectionBanned,
    InvalidPassword,
    IncompatibleProtocolVersion,
    ModifiedPacket,
    RemoteDisconnectionNotification,
    RemoteConnectionLost,
    RemoteNewIncomingConnection,
}

impl Notice {
    pub fn id(self) -> MessageId {
        match self {
            Notice::ConnectionRequestAccepted => MessageId::ConnectionRequestAccepted,
            Notice::ConnectionAttemptFailed => MessageId::ConnectionAttemptFailed,
            Notice::AlreadyConnected => MessageId::AlreadyConnected,
            Notice::NewIncomingConnection => MessageId::NewIncomingConnection,
            Notice::NoFreeIncomingConnections => MessageId::NoFreeIncomingConnections,
            Notice::DisconnectionNotification => MessageId::DisconnectionNotification,
            Notice::ConnectionLost => MessageId::ConnectionLost,
            Notice::ConnectionBanned => MessageId::ConnectionBanned,
            Notice::InvalidPassword => MessageId::InvalidPassword,
            Notice::IncompatibleProtocolVersion => MessageId::IncompatibleProtocolVersion,
            Notice::ModifiedPacket => MessageId::ModifiedPacket,
            Notice::RemoteDisconnectionNotification => MessageId::RemoteDisconnectionNotification,
            Notice::RemoteConnectionLost => MessageId::RemoteConnectionLost,
            Notice::RemoteNewIncomingConnection => MessageId::RemoteNewIncomingConnection,
        }
    }

    fn from_id(id: MessageId) -> Option<Self> {
        let notice = match id {
            MessageId::ConnectionRequestAccepted => Notice::ConnectionRequestAccepted,
            MessageId::ConnectionAttemptFailed => Notice::ConnectionAttemptFailed,
            MessageId::AlreadyConnected => Notice::AlreadyConnected,
            MessageId::NewIncomingConnection => Notice::NewIncomingConnection,
            MessageId::NoFreeIncomingConnections => Notice::NoFreeIncomingConnections,
            MessageId::DisconnectionNotification => Notice::DisconnectionNotification,
            MessageId::ConnectionLost => Notice::ConnectionLost,
            MessageId::ConnectionBanned => Notice::ConnectionBanned,
            MessageId::InvalidPassword => Notice::InvalidPassword,
            MessageId::IncompatibleProtocolVersion => Notice::IncompatibleProtocolVersion,
            MessageId::ModifiedPacket => Notice::ModifiedPacket,
            MessageId::RemoteDisconnectionNotification => Notice::RemoteDisconnectionNotification,
            MessageId::RemoteConnectionLost => Notice::RemoteConnectionLost,
            MessageId::RemoteNewIncomingConnection => Notice::RemoteNewIncomingConnection,
            _ => return None,
        };
        Some(notice)
    }

    /// Whether this notice answers a connection attempt with a refusal
    pub fn is_refusal(self) -> bool {
        matches!(
            self,
            Notice::ConnectionAttemptFailed
                | Notice::AlreadyConnected
                | Notice::NoFreeIncomingConnections
                | Notice::ConnectionBanned
                | Notice::InvalidPassword
                | Notice::IncompatibleProtocolVersion
        )
    }

    /// Human-readable console line for this notice
    pub fn describe(self) -> &'static str {
        match self {
            Notice::ConnectionRequestAccepted => "Connection request accepted",
            Notice::ConnectionAttemptFailed => "Connection attempt failed",
            Notice::AlreadyConnected => "Already connected to this server",
            Notice::NewIncomingConnection => "New incoming connection",
            Notice::NoFreeIncomingConnections => "The server is full",
            Notice::DisconnectionNotification => "Disconnected",
            Notice::ConnectionLost => "Connection lost",
            Notice::ConnectionBanned => "We are banned from this server",
            Notice::InvalidPassword => "Invalid password",
            Notice::IncompatibleProtocolVersion => "Incompatible protocol version",
            Notice::ModifiedPacket => "Modified packet detected",
            Notice::RemoteDisconnectionNotification => "Another client disconnected",
            Notice::RemoteConnectionLost => "Another client lost its connection",
            Notice::RemoteNewIncomingConnection => "Another client connected",
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// A decoded packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Handshake frame sent by a connecting client
    ConnectionRequest { version: u8, password: String },
    /// Connection lifecycle notice
    Notice(Notice),
    /// Server-authoritative signal that play begins
    StartGame { payload: String },
    /// A line of chat text
    FreeText(String),
    /// Server-authoritative change of a cell's owner
    OwnershipUpdate {
        coord: HexCoord,
        owner: Option<PlayerId>,
    },
}

impl Message {
    /// The standard start-game broadcast
    pub fn start_game() -> Self {
        Message::StartGame {
            payload: START_GAME_PAYLOAD.to_string(),
        }
    }

    pub fn id(&self) -> MessageId {
        match self {
            Message::ConnectionRequest { .. } => MessageId::ConnectionRequest,
            Message::Notice(notice) => notice.id(),
            Message::StartGame { .. } => MessageId::StartGame,
            Message::FreeText(_) => MessageId::FreeText,
            Message::OwnershipUpdate { .. } => MessageId::OwnershipUpdate,
        }
    }

    /// Serialize to wire bytes
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut out = vec![self.id() as u8];
        match self {
            Message::ConnectionRequest { version, password } => {
                out.push(*version);
                write_terminated(&mut out, password)?;
            }
            Message::Notice(_) => {}
            Message::StartGame { payload } => write_encoded_string(&mut out, payload)?,
            Message::FreeText(text) => write_terminated(&mut out, text)?,
            Message::OwnershipUpdate { coord, owner } => {
                out.extend_from_slice(&coord.x.to_be_bytes());
                out.extend_from_slice(&coord.y.to_be_bytes());
                out.push(owner.unwrap_or(NO_OWNER));
            }
        }
        Ok(out)
    }

    /// Serialize behind a timestamp header
    pub fn encode_timestamped(&self, timestamp: u64) -> Result<Vec<u8>, ProtocolError> {
        let mut out = vec![MessageId::Timestamp as u8];
        out.extend_from_slice(&timestamp.to_be_bytes());
        out.extend(self.encode()?);
        Ok(out)
    }

    /// Parse wire bytes, stripping a timestamp header if present
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let (_, body) = split_timestamp(data)?;
        let (&first, rest) = body.split_first().ok_or(ProtocolError::Empty)?;
        let id = MessageId::try_from(first)?;
        let mut reader = Reader { id, rest };

        let message = match id {
            MessageId::ConnectionRequest => Message::ConnectionRequest {
                version: reader.byte()?,
                password: reader.terminated()?,
            },
            MessageId::StartGame => Message::StartGame {
                payload: reader.encoded_string()?,
            },
            MessageId::FreeText => Message::FreeText(reader.terminated()?),
            MessageId::OwnershipUpdate => {
                let x = reader.i32()?;
                let y = reader.i32()?;
                let owner = reader.byte()?;
                Message::OwnershipUpdate {
                    coord: HexCoord::new(x, y),
                    owner: (owner != NO_OWNER).then_some(owner),
                }
            }
            // A timestamp header inside a timestamped packet
            MessageId::Timestamp => return Err(ProtocolError::Truncated(id)),
            other => match Notice::from_id(other) {
                Some(notice) => Message::Notice(notice),
                None => return Err(ProtocolError::UnknownId(first)),
            },
        };

        reader.finish()?;
        Ok(message)
    }
}

/// Identifier of a raw packet, looking past any timestamp header
pub fn packet_identifier(data: &[u8]) -> Option<u8> {
    let (_, body) = split_timestamp(data).ok()?;
    body.first().copied()
}

/// Timestamp carried by a raw packet, if any
pub fn packet_timestamp(data: &[u8]) -> Option<u64> {
    split_timestamp(data).ok().and_then(|(ts, _)| ts)
}

fn split_timestamp(data: &[u8]) -> Result<(Option<u64>, &[u8]), ProtocolError> {
    match data.first() {
        Some(&b) if b == MessageId::Timestamp as u8 => {
            if data.len() < 1 + 8 + 1 {
                return Err(ProtocolError::Truncated(MessageId::Timestamp));
            }
            let mut stamp = [0u8; 8];
            stamp.copy_from_slice(&data[1..9]);
            Ok((Some(u64::from_be_bytes(stamp)), &data[9..]))
        }
        Some(_) => Ok((None, data)),
        None => Err(ProtocolError::Empty),
    }
}

fn write_terminated(out: &mut Vec<u8>, text: &str) -> Result<(), ProtocolError> {
    if text.as_bytes().contains(&0) {
        return Err(ProtocolError::InteriorNul);
    }
    out.extend_from_slice(text.as_bytes());
    out.push(0);
    Ok(())
}

fn write_encoded_string(out: &mut Vec<u8>, text: &str) -> Result<(), ProtocolError> {
    let len = text.len();
    if len > MAX_ENCODED_STRING {
        return Err(ProtocolError::StringTooLong(len));
    }
    out.extend_from_slice(&(len as u16).to_be_bytes());
    out.extend_from_slice(text.as_bytes());
    Ok(())
}

struct Reader<'a> {
    id: MessageId,
    rest: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.rest.len() < n {
            return Err(ProtocolError::Truncated(self.id));
        }
        let (head, tail) = self.rest.split_at(n);
        self.rest = tail;
        Ok(head)
    }

    fn byte(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    fn i32(&mut self) -> Result<i32, ProtocolError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(i32::from_be_bytes(buf))
    }

    fn terminated(&mut self) -> Result<String, ProtocolError> {
        let end = self
            .rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(ProtocolError::MissingTerminator)?;
        let text = self.take(end)?;
        self.take(1)?;
        String::from_utf8(text.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }

    fn encoded_string(&mut self) -> Result<String, ProtocolError> {
        let mut len = [0u8; 2];
        len.copy_from_slice(self.take(2)?);
        let len = u16::from_be_bytes(len) as usize;
        if len > MAX_ENCODED_STRING {
            return Err(ProtocolError::StringTooLong(len));
        }
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }

    fn finish(self) -> Result<(), ProtocolError> {
        if self.rest.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::TrailingBytes(self.id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_message_leads_with_its_id() {
        let messages = [
            Message::ConnectionRequest {
                version: PROTOCOL_VERSION,
                password: DEFAULT_PASSWORD.to_string(),
            },
            Message::Notice(Notice::ConnectionLost),
            Message::start_game(),
            Message::FreeText("hello".to_string()),
            Message::OwnershipUpdate {
                coord: HexCoord::new(3, 4),
                owner: Some(2),
            },
        ];
        for message in messages {
            let bytes = message.encode().unwrap();
            assert_eq!(bytes[0], message.id() as u8);
            assert_eq!(Message::decode(&bytes).unwrap(), message);
        }
    }

    #[test]
    fn test_start_game_layout() {
        let bytes = Message::start_game().encode().unwrap();
        assert_eq!(bytes[0], 0x80);
        assert_eq!(&bytes[1..3], &[0, 10]);
        assert_eq!(&bytes[3..], b"START GAME");
    }

    #[test]
    fn test_free_text_is_nul_terminated() {
        let bytes = Message::FreeText("hi there".to_string()).encode().unwrap();
        assert_eq!(bytes[0], MessageId::FreeText as u8);
        assert_eq!(&bytes[1..], b"hi there\0");
    }

    #[test]
    fn test_free_text_rejects_interior_nul() {
        assert_eq!(
            Message::FreeText("a\0b".to_string()).encode(),
            Err(ProtocolError::InteriorNul)
        );
    }

    #[test]
    fn test_ownership_update_none_sentinel() {
        let message = Message::OwnershipUpdate {
            coord: HexCoord::new(-1, 7),
            owner: None,
        };
        let bytes = message.encode().unwrap();
        assert_eq!(bytes.len(), 10);
        assert_eq!(bytes[9], NO_OWNER);
        assert_eq!(Message::decode(&bytes).unwrap(), message);
    }

    #[test]
    fn test_unknown_identifier() {
        assert_eq!(Message::decode(&[0xEE, 1, 2]), Err(ProtocolError::UnknownId(0xEE)));
        assert_eq!(Message::decode(&[]), Err(ProtocolError::Empty));
    }

    #[test]
    fn test_truncated_and_trailing() {
        assert_eq!(
            Message::decode(&[MessageId::OwnershipUpdate as u8, 0, 0]),
            Err(ProtocolError::Truncated(MessageId::OwnershipUpdate))
        );
        assert_eq!(
            Message::decode(&[MessageId::ConnectionLost as u8, 9]),
            Err(ProtocolError::TrailingBytes(MessageId::ConnectionLost))
        );
        assert_eq!(
            Message::decode(&[MessageId::FreeText as u8, b'a']),
            Err(ProtocolError::MissingTerminator)
        );
        assert_eq!(
            Message::decode(&[MessageId::StartGame as u8, 0, 5, b'a']),
            Err(ProtocolError::Truncated(MessageId::StartGame))
        );
    }

    #[test]
    fn test_encoded_string_limit() {
        let long = "x".repeat(MAX_ENCODED_STRING + 1);
        assert_eq!(
            Message::StartGame { payload: long }.encode(),
            Err(ProtocolError::StringTooLong(256))
        );
        assert_eq!(
            Message::decode(&[MessageId::StartGame as u8, 1, 0]),
            Err(ProtocolError::StringTooLong(256))
        );
    }

    #[test]
    fn test_timestamp_header() {
        let bytes = Message::start_game().encode_timestamped(0xDEAD_BEEF).unwrap();
        assert_eq!(bytes[0], MessageId::Timestamp as u8);
        assert_eq!(packet_identifier(&bytes), Some(MessageId::StartGame as u8));
        assert_eq!(packet_timestamp(&bytes), Some(0xDEAD_BEEF));
        assert_eq!(Message::decode(&bytes).unwrap(), Message::start_game());

        assert_eq!(
            Message::decode(&[MessageId::Timestamp as u8, 0, 0]),
            Err(ProtocolError::Truncated(MessageId::Timestamp))
        );
    }

    #[test]
    fn test_notice_ids_round_trip() {
        for byte in 2..=15u8 {
            let id = MessageId::try_from(byte).unwrap();
            let notice = Notice::from_id(id).unwrap();
            assert_eq!(notice.id() as u8, byte);
            assert!(!notice.describe().is_empty());
        }
    }

    #[test]
    fn test_refusals_are_handshake_answers() {
        assert!(Notice::InvalidPassword.is_refusal());
        assert!(Notice::IncompatibleProtocolVersion.is_refusal());
        assert!(Notice::ConnectionBanned.is_refusal());
        assert!(!Notice::ConnectionRequestAccepted.is_refusal());
        assert!(!Notice::ModifiedPacket.is_refusal());
        assert!(!Notice::ConnectionLost.is_refusal());
    }
}
