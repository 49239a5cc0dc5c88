//! # switchboard-core
//!
//! Connection management for many concurrent bidirectional message
//! sessions.
//!
//! An application supplies an [`EventHandler`] and hands accepted
//! transports to a [`Switchboard`]. Each transport becomes a [`Session`]
//! with its own input loop, output loop, keepalive, and a bounded
//! [`OutboundQueue`] that drops instead of blocking when the peer is slow.
//! A [`Hub`] tracks a set of sessions and fans broadcasts out across a pool
//! of shard workers.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `message` | Message kinds, close payloads, broadcast envelopes |
//! | `frame` | Length-prefixed wire format for raw byte streams |
//! | `transport` | Reader/writer traits and the raw-stream transport |
//! | `queue` | Bounded, disposable outbound mailbox |
//! | `session` | Per-connection engine: input/output loops, teardown |
//! | `handler` | Application callbacks with no-op defaults |
//! | `dispatcher` | `Switchboard`: drives a transport through a session |
//! | `hub` | Registry plus sharded broadcast fan-out |
//! | `config` | Session and hub configuration |
//! | `errors` | Error enums per concern |
//! | `logging` | `tracing` subscriber setup |
//! | `telemetry` | Metric names |

#![deny(unsafe_code)]

pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod frame;
pub mod handler;
pub mod hub;
pub mod ids;
pub mod logging;
pub mod message;
pub mod queue;
pub mod session;
pub mod telemetry;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::{HubConfig, SessionConfig};
pub use dispatcher::Switchboard;
pub use errors::{ConfigError, FrameError, HubError, QueueError, SessionError, TransportError};
pub use handler::{EventHandler, NoopHandler};
pub use hub::Hub;
pub use ids::SessionId;
pub use message::{CloseFrame, Envelope, Message, MessageKind, close_code};
pub use queue::OutboundQueue;
pub use session::{Session, SessionState};
pub use transport::{StreamTransport, Transport, TransportReader, TransportWriter};
