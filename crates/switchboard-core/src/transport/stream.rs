//! Raw-stream transport: any `AsyncRead + AsyncWrite` carrying
//! length-prefixed frames.

use std::net::SocketAddr;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout_at};
use tokio_util::codec::{FramedRead, FramedWrite};

use super::{Transport, TransportReader, TransportWriter};
use crate::errors::TransportError;
use crate::frame::FrameCodec;
use crate::message::Message;

/// Framed transport over a byte stream.
pub struct StreamTransport<S> {
    stream: S,
    peer: Option<SocketAddr>,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wrap a byte stream.
    pub fn new(stream: S) -> Self {
        Self { stream, peer: None }
    }

    /// Record the remote address.
    #[must_use]
    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }
}

impl StreamTransport<TcpStream> {
    /// Wrap an accepted TCP connection, recording its peer address.
    pub fn from_tcp(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        Self { stream, peer }
    }
}

impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    type Reader = StreamReader<ReadHalf<S>>;
    type Writer = StreamWriter<WriteHalf<S>>;

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn split(self) -> (Self::Reader, Self::Writer) {
        let (read, write) = tokio::io::split(self.stream);
        (
            StreamReader {
                frames: FramedRead::new(read, FrameCodec::new()),
                deadline: None,
            },
            StreamWriter {
                frames: FramedWrite::new(write, FrameCodec::new()),
                deadline: None,
            },
        )
    }
}

/// Inbound half of a [`StreamTransport`].
pub struct StreamReader<R> {
    frames: FramedRead<R, FrameCodec>,
    deadline: Option<Instant>,
}

#[async_trait]
impl<R> TransportReader for StreamReader<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn read_message(&mut self) -> Result<Message, TransportError> {
        let next = match self.deadline {
            Some(deadline) => timeout_at(deadline, self.frames.next())
                .await
                .map_err(|_| TransportError::ReadTimeout)?,
            None => self.frames.next().await,
        };
        match next {
            Some(Ok(message)) => Ok(message),
            Some(Err(e)) => Err(e.into()),
            None => Err(TransportError::Closed),
        }
    }

    fn set_read_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    fn set_read_limit(&mut self, limit: usize) {
        self.frames.decoder_mut().set_max_payload(Some(limit));
    }
}

/// Outbound half of a [`StreamTransport`].
pub struct StreamWriter<W> {
    frames: FramedWrite<W, FrameCodec>,
    deadline: Option<Instant>,
}

#[async_trait]
impl<W> TransportWriter for StreamWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn write_message(&mut self, message: Message) -> Result<(), TransportError> {
        let send = self.frames.send(message);
        match self.deadline {
            Some(deadline) => timeout_at(deadline, send)
                .await
                .map_err(|_| TransportError::WriteTimeout)?
                .map_err(TransportError::from),
            None => send.await.map_err(TransportError::from),
        }
    }

    fn set_write_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        SinkExt::close(&mut self.frames)
            .await
            .map_err(TransportError::from)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
