//! Message kinds, close payloads and broadcast envelopes.
//!
//! Both transports share one [`MessageKind`] enumeration whose codes line up
//! with the web-socket opcodes, so a session never needs to know which
//! transport it is driving.

use std::fmt;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use crate::errors::FrameError;
use crate::session::Session;

/// Kind of a message travelling over a transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// UTF-8 text payload.
    Text,
    /// Opaque binary payload.
    Binary,
    /// Close request, optionally carrying a status code and reason.
    Close,
    /// Keepalive probe.
    Ping,
    /// Keepalive reply.
    Pong,
}

impl MessageKind {
    /// Wire code of this kind.
    pub const fn code(self) -> u32 {
        match self {
            Self::Text => 1,
            Self::Binary => 2,
            Self::Close => 8,
            Self::Ping => 9,
            Self::Pong => 10,
        }
    }

    /// Whether this kind is a control frame rather than application data.
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    /// Lowercase name, used as a log field and metric label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Binary => "binary",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}

impl TryFrom<u32> for MessageKind {
    type Error = FrameError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::Text),
            2 => Ok(Self::Binary),
            8 => Ok(Self::Close),
            9 => Ok(Self::Ping),
            10 => Ok(Self::Pong),
            other => Err(FrameError::UnknownKind(other)),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One typed message: a kind plus its payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Message kind.
    pub kind: MessageKind,
    /// Raw payload bytes.
    pub payload: Bytes,
}

impl Message {
    /// Build a message of any kind.
    pub fn new(kind: MessageKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Text message.
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::Text, payload)
    }

    /// Binary message.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::Binary, payload)
    }

    /// Ping with an application-defined payload.
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::Ping, payload)
    }

    /// Pong echoing a ping payload.
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::Pong, payload)
    }

    /// Close message carrying the encoded close payload.
    pub fn close(frame: &CloseFrame) -> Self {
        Self::new(MessageKind::Close, frame.encode())
    }
}

/// Standard close status codes.
pub mod close_code {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Endpoint going away (server shutdown, page navigation).
    pub const GOING_AWAY: u16 = 1001;
    /// Protocol error.
    pub const PROTOCOL_ERROR: u16 = 1002;
    /// Unsupported data.
    pub const UNSUPPORTED_DATA: u16 = 1003;
    /// No status code was present. Never sent on the wire.
    pub const NO_STATUS_RECEIVED: u16 = 1005;
    /// Connection dropped without a close frame. Never sent on the wire.
    pub const ABNORMAL_CLOSURE: u16 = 1006;
    /// Message too big to process.
    pub const MESSAGE_TOO_BIG: u16 = 1009;
    /// Unexpected server condition.
    pub const INTERNAL_ERROR: u16 = 1011;
}

/// Decoded close payload.
///
/// `code == None` is the "no status received" case and encodes to an empty
/// payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CloseFrame {
    /// Status code, if one was sent.
    pub code: Option<u16>,
    /// UTF-8 reason text.
    pub reason: String,
}

impl CloseFrame {
    /// Close frame with a status code and reason.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            reason: reason.into(),
        }
    }

    /// Encode as `code:u16 BE` followed by the reason bytes.
    pub fn encode(&self) -> Bytes {
        match self.code {
            None | Some(close_code::NO_STATUS_RECEIVED) => Bytes::new(),
            Some(code) => {
                let mut buf = BytesMut::with_capacity(2 + self.reason.len());
                buf.put_u16(code);
                buf.put_slice(self.reason.as_bytes());
                buf.freeze()
            }
        }
    }

    /// Decode a close payload. Payloads shorter than two bytes carry no status.
    pub fn decode(payload: &[u8]) -> Self {
        match payload {
            [hi, lo, reason @ ..] => Self {
                code: Some(u16::from_be_bytes([*hi, *lo])),
                reason: String::from_utf8_lossy(reason).into_owned(),
            },
            _ => Self::default(),
        }
    }
}

/// Delivery predicate evaluated against each hub member.
pub type Filter = Arc<dyn Fn(&Session) -> bool + Send + Sync>;

/// A broadcast unit: a message plus an optional delivery filter.
///
/// The filter is evaluated by hub workers only; session queues store the bare
/// [`Message`].
#[derive(Clone)]
pub struct Envelope {
    message: Message,
    filter: Option<Filter>,
}

impl Envelope {
    /// Envelope delivered to every member.
    pub fn new(message: Message) -> Self {
        Self {
            message,
            filter: None,
        }
    }

    /// Envelope delivered to members accepted by `filter`.
    pub fn filtered(message: Message, filter: Filter) -> Self {
        Self {
            message,
            filter: Some(filter),
        }
    }

    /// Message kind.
    pub fn kind(&self) -> MessageKind {
        self.message.kind
    }

    /// The wrapped message.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Whether `session` should receive this envelope. No filter accepts all.
    pub fn accepts(&self, session: &Session) -> bool {
        self.filter.as_ref().is_none_or(|filter| filter(session))
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("kind", &self.message.kind)
            .field("len", &self.message.payload.len())
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
