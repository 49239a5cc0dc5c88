//! Length-prefixed framing for raw byte streams.
//!
//! ```text
//! | size: u32 BE | kind: u32 BE | payload: size bytes |
//! ```
//!
//! [`FrameCodec`] plugs into `tokio_util::codec` so the raw-stream transport
//! gets buffering and partial-read handling from `FramedRead`/`FramedWrite`.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::errors::FrameError;
use crate::message::{Message, MessageKind};

/// Size of the fixed frame header.
pub const HEADER_LEN: usize = 8;

/// Encoder/decoder for the raw-stream wire format.
#[derive(Clone, Debug, Default)]
pub struct FrameCodec {
    max_payload: Option<usize>,
}

impl FrameCodec {
    /// Codec with no read limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec that rejects inbound payloads larger than `limit`.
    pub fn with_max_payload(limit: usize) -> Self {
        Self {
            max_payload: Some(limit),
        }
    }

    /// Change the read limit.
    pub fn set_max_payload(&mut self, limit: Option<usize>) {
        self.max_payload = limit;
    }

    /// Current read limit.
    pub fn max_payload(&self) -> Option<usize> {
        self.max_payload
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, FrameError> {
        if src.len() < HEADER_LEN {
            src.reserve(HEADER_LEN - src.len());
            return Ok(None);
        }

        let (size, code) = {
            let mut header = &src[..HEADER_LEN];
            (header.get_u32() as usize, header.get_u32())
        };
        let kind = MessageKind::try_from(code)?;
        if let Some(limit) = self.max_payload
            && size > limit
        {
            return Err(FrameError::TooLarge { size, limit });
        }

        let total = HEADER_LEN + size;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(size).freeze();
        Ok(Some(Message { kind, payload }))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Message>, FrameError> {
        match self.decode(buf)? {
            Some(message) => Ok(Some(message)),
            None if buf.is_empty() => Ok(None),
            None => Err(FrameError::Truncated(buf.len())),
        }
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), FrameError> {
        let len = item.payload.len();
        let size = u32::try_from(len).map_err(|_| FrameError::Unframeable(len))?;
        dst.reserve(HEADER_LEN + len);
        dst.put_u32(size);
        dst.put_u32(item.kind.code());
        dst.extend_from_slice(&item.payload);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
