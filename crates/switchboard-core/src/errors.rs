//! Error types for framing, transports, queues, sessions and the hub.
//!
//! Each concern gets its own enum so callers can match on exactly the
//! conditions they can act on:
//!
//! - [`FrameError`]: malformed raw-stream frames
//! - [`TransportError`]: anything that ends a transport read or write
//! - [`QueueError`]: outbound mailbox conditions
//! - [`SessionError`]: what producers and callbacks see for one session
//! - [`HubError`]: registry and broadcast failures
//! - [`ConfigError`]: rejected session or hub configuration

use std::time::Duration;

use thiserror::Error;

/// Boxed error produced by a transport backend (e.g. the web-socket library).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Raw-stream framing errors.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The stream ended in the middle of a frame.
    #[error("stream ended with {0} bytes of an incomplete frame")]
    Truncated(usize),
    /// A frame header announced a payload larger than the read limit.
    #[error("frame payload of {size} bytes exceeds limit of {limit}")]
    TooLarge {
        /// Announced payload size.
        size: usize,
        /// Configured read limit.
        limit: usize,
    },
    /// The header carried a kind code outside the known set.
    #[error("unknown message kind code {0}")]
    UnknownKind(u32),
    /// An outbound payload does not fit the 32-bit length prefix.
    #[error("payload of {0} bytes cannot be framed")]
    Unframeable(usize),
    /// Underlying stream I/O failure.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that end a transport read or write.
///
/// Every variant is fatal to the session that observed it.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket-level I/O failure.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Protocol violation on the raw-stream transport.
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),
    /// No message arrived before the read deadline.
    #[error("read deadline exceeded")]
    ReadTimeout,
    /// A write did not complete before the write deadline.
    #[error("write deadline exceeded")]
    WriteTimeout,
    /// An inbound message exceeded the configured read limit.
    #[error("message of {size} bytes exceeds read limit of {limit}")]
    MessageTooLarge {
        /// Received payload size.
        size: usize,
        /// Configured read limit.
        limit: usize,
    },
    /// The peer closed the underlying stream.
    #[error("connection closed by peer")]
    Closed,
    /// Error reported by a wrapped transport library.
    #[error("transport backend error: {0}")]
    Backend(#[source] BoxError),
}

/// Outbound queue conditions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue is at capacity; the item was not enqueued.
    #[error("outbound queue is full")]
    Full,
    /// The queue has been disposed.
    #[error("outbound queue is disposed")]
    Disposed,
    /// No item arrived before the dequeue timeout.
    #[error("timed out waiting for outbound message")]
    Timeout,
}

/// Errors surfaced for a single session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session is closing or closed.
    #[error("session closed")]
    Closed,
    /// The outbound queue was full and the message was dropped.
    #[error("outbound queue full, message dropped")]
    Backpressure,
    /// A required attribute was not set.
    #[error("attribute not found: {0}")]
    AttributeNotFound(String),
    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// An application callback reported a failure.
    ///
    /// Not raised by the engine itself. Handlers return it from
    /// [`EventHandler::on_close`](crate::EventHandler::on_close) and the
    /// session forwards it to `on_error` before ending.
    #[error("handler error: {0}")]
    Handler(String),
}

/// Hub operation errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// The hub has been shut down.
    #[error("hub closed")]
    Closed,
    /// A direct write to one of the target sessions failed.
    #[error("write failed: {0}")]
    Write(#[from] SessionError),
}

/// Invalid session or hub configuration.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A size, capacity or duration that must be positive was zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    /// The keepalive period does not leave room for a pong before the read deadline.
    #[error("ping period ({ping_period:?}) must be shorter than pong wait ({pong_wait:?})")]
    PingPeriod {
        /// Configured ping period.
        ping_period: Duration,
        /// Configured pong wait.
        pong_wait: Duration,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
