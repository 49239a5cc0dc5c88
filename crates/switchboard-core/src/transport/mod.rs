//! Transport abstraction.
//!
//! A [`Transport`] is split once into a reader, owned by the session input
//! loop, and a writer, owned by the output loop. Control frames (ping, pong,
//! close) come back from [`TransportReader::read_message`] as ordinary
//! messages so the session sees every keepalive and close event.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `stream` | Raw byte stream carrying length-prefixed frames |
//!
//! The web-socket variant lives with the HTTP layer that performs the upgrade.

pub mod stream;

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::errors::TransportError;
use crate::message::Message;

pub use stream::{StreamReader, StreamTransport, StreamWriter};

/// Inbound half of a transport.
#[async_trait]
pub trait TransportReader: Send + 'static {
    /// Read the next message of any kind.
    async fn read_message(&mut self) -> Result<Message, TransportError>;

    /// Absolute deadline for reads. `None` waits forever.
    fn set_read_deadline(&mut self, deadline: Option<Instant>);

    /// Largest payload accepted; bigger messages fail the read.
    fn set_read_limit(&mut self, limit: usize);

    /// Whether the underlying library already answers pings and close frames.
    ///
    /// When `false` the session sends the pong and close replies itself.
    fn replies_to_control(&self) -> bool {
        false
    }
}

/// Outbound half of a transport.
#[async_trait]
pub trait TransportWriter: Send + 'static {
    /// Write one message and flush it.
    async fn write_message(&mut self, message: Message) -> Result<(), TransportError>;

    /// Absolute deadline for writes. `None` waits forever.
    fn set_write_deadline(&mut self, deadline: Option<Instant>);

    /// Flush and shut down the outbound direction.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// A bidirectional message transport.
pub trait Transport: Send + 'static {
    /// Inbound half.
    type Reader: TransportReader;
    /// Outbound half.
    type Writer: TransportWriter;

    /// Remote address, when the transport knows it.
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Split into independently owned halves.
    fn split(self) -> (Self::Reader, Self::Writer);
}
