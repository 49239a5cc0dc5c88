//! Web-socket transport over an upgraded axum connection.
//!
//! The underlying library answers pings and echoes close frames on its own,
//! so the transport reports `replies_to_control() == true` and the session
//! engine never queues those replies itself.

use std::net::SocketAddr;

use async_trait::async_trait;
use axum::extract::ws::{self, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use switchboard_core::{
    CloseFrame, Message, MessageKind, Transport, TransportError, TransportReader, TransportWriter,
};
use tokio::time::{Instant, timeout_at};

/// [`Transport`] backed by an upgraded axum [`WebSocket`].
pub struct WebSocketTransport {
    socket: WebSocket,
    peer: Option<SocketAddr>,
}

impl WebSocketTransport {
    /// Wrap an upgraded socket.
    pub fn new(socket: WebSocket) -> Self {
        Self { socket, peer: None }
    }

    /// Record the remote address, when the listener provides one.
    #[must_use]
    pub fn with_peer(mut self, peer: Option<SocketAddr>) -> Self {
        self.peer = peer;
        self
    }
}

impl Transport for WebSocketTransport {
    type Reader = WebSocketReader;
    type Writer = WebSocketWriter;

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn split(self) -> (Self::Reader, Self::Writer) {
        let (sink, stream) = self.socket.split();
        (
            WebSocketReader {
                stream,
                deadline: None,
                limit: None,
            },
            WebSocketWriter {
                sink,
                deadline: None,
            },
        )
    }
}

/// Inbound half of a [`WebSocketTransport`].
pub struct WebSocketReader {
    stream: SplitStream<WebSocket>,
    deadline: Option<Instant>,
    limit: Option<usize>,
}

#[async_trait]
impl TransportReader for WebSocketReader {
    async fn read_message(&mut self) -> Result<Message, TransportError> {
        let next = match self.deadline {
            Some(deadline) => timeout_at(deadline, self.stream.next())
                .await
                .map_err(|_| TransportError::ReadTimeout)?,
            None => self.stream.next().await,
        };
        let message = match next {
            Some(Ok(message)) => from_ws(message),
            Some(Err(e)) => return Err(TransportError::Backend(Box::new(e))),
            None => return Err(TransportError::Closed),
        };
        if let Some(limit) = self.limit
            && message.payload.len() > limit
        {
            return Err(TransportError::MessageTooLarge {
                size: message.payload.len(),
                limit,
            });
        }
        Ok(message)
    }

    fn set_read_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    fn set_read_limit(&mut self, limit: usize) {
        self.limit = Some(limit);
    }

    fn replies_to_control(&self) -> bool {
        true
    }
}

/// Outbound half of a [`WebSocketTransport`].
pub struct WebSocketWriter {
    sink: SplitSink<WebSocket, ws::Message>,
    deadline: Option<Instant>,
}

#[async_trait]
impl TransportWriter for WebSocketWriter {
    async fn write_message(&mut self, message: Message) -> Result<(), TransportError> {
        let frame = to_ws(message)?;
        let send = self.sink.send(frame);
        let sent = match self.deadline {
            Some(deadline) => timeout_at(deadline, send)
                .await
                .map_err(|_| TransportError::WriteTimeout)?,
            None => send.await,
        };
        sent.map_err(|e| TransportError::Backend(Box::new(e)))
    }

    fn set_write_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let close = SinkExt::close(&mut self.sink);
        let closed = match self.deadline {
            Some(deadline) => timeout_at(deadline, close)
                .await
                .map_err(|_| TransportError::WriteTimeout)?,
            None => close.await,
        };
        closed.map_err(|e| TransportError::Backend(Box::new(e)))
    }
}

fn from_ws(message: ws::Message) -> Message {
    match message {
        ws::Message::Text(text) => Message::text(Bytes::copy_from_slice(text.as_str().as_bytes())),
        ws::Message::Binary(data) => Message::binary(data),
        ws::Message::Ping(data) => Message::ping(data),
        ws::Message::Pong(data) => Message::pong(data),
        ws::Message::Close(frame) => {
            let frame = frame.map_or_else(CloseFrame::default, |f| {
                CloseFrame::new(f.code, f.reason.as_str())
            });
            Message::close(&frame)
        }
    }
}

fn to_ws(message: Message) -> Result<ws::Message, TransportError> {
    Ok(match message.kind {
        MessageKind::Text => {
            let text = String::from_utf8(message.payload.to_vec())
                .map_err(|e| TransportError::Backend(Box::new(e)))?;
            ws::Message::Text(text.into())
        }
        MessageKind::Binary => ws::Message::Binary(message.payload),
        MessageKind::Ping => ws::Message::Ping(message.payload),
        MessageKind::Pong => ws::Message::Pong(message.payload),
        MessageKind::Close => {
            let frame = CloseFrame::decode(&message.payload);
            ws::Message::Close(frame.code.map(|code| ws::CloseFrame {
                code,
                reason: frame.reason.into(),
            }))
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
